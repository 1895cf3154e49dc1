//! List command - show the upstream agent's keys

use anyhow::Result;
use std::path::PathBuf;

use crate::agent::{Agent, Identity, Upstream};
use crate::cli::args::ListArgs;
use crate::filter::AllowList;

/// Execute the list command
pub async fn execute(args: ListArgs, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = super::load_config(config_path.as_deref())?;
    args.apply(&mut config);
    let settings = config.resolve(PathBuf::new)?;

    let keys = Upstream::new(&settings.upstream).list().await?;

    match args.format.as_str() {
        "json" => {
            let entries: Vec<serde_json::Value> = keys
                .iter()
                .map(|key| {
                    serde_json::json!({
                        "algorithm": algorithm(key),
                        "fingerprint": fingerprint(key),
                        "comment": key.comment,
                        "exposed": settings.allow_list.permits(key),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            for key in &keys {
                println!("{}", format_line(key, &settings.allow_list));
            }
        }
    }

    Ok(())
}

fn algorithm(key: &Identity) -> String {
    key.key_type().unwrap_or_else(|| "unknown".to_string())
}

fn fingerprint(key: &Identity) -> String {
    key.fingerprint()
        .map(|fp| fp.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// `<algorithm> <fingerprint> <comment>`, prefixed with `+`/`-` when an allow-list is set
fn format_line(key: &Identity, allow_list: &AllowList) -> String {
    let line = format!("{} {} {}", algorithm(key), fingerprint(key), key.comment);
    if allow_list.is_pass_through() {
        line
    } else if allow_list.permits(key) {
        format!("+ {}", line)
    } else {
        format!("- {}", line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORK: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl user@work.example.com";
    const PERSONAL: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHUu2eEV0kRvK3dMRlSFwHxVoNxCfwjKmAZBlhkNjC4i user@personal.example.com";

    #[test]
    fn test_format_line() {
        let work = Identity::from_openssh(WORK).unwrap();
        let personal = Identity::from_openssh(PERSONAL).unwrap();
        let fp = work.fingerprint().unwrap().to_string();

        let plain = format_line(&work, &AllowList::pass_through());
        assert_eq!(plain, format!("ssh-ed25519 {} user@work.example.com", fp));

        let allow = AllowList::new([WORK]).unwrap();
        assert!(format_line(&work, &allow).starts_with("+ ssh-ed25519 SHA256:"));
        assert!(format_line(&personal, &allow).starts_with("- ssh-ed25519 SHA256:"));
    }

    #[test]
    fn test_unparseable_key() {
        let key = Identity::new(bytes::Bytes::from_static(b"opaque"), "token".to_string());
        assert_eq!(format_line(&key, &AllowList::pass_through()), "unknown unknown token");
    }
}
