//! Config command - show or validate configuration

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::cli::args::ConfigArgs;
use crate::config::{config_search_paths, load_config_or_default};

/// Execute the config command
pub async fn execute(args: ConfigArgs, config_path: Option<PathBuf>) -> Result<()> {
    if args.paths {
        println!("Config search paths (in priority order):");
        for (i, cp) in config_search_paths().iter().enumerate() {
            let exists = if cp.path.is_file() { " [exists]" } else { "" };
            println!("  {}. {}{}", i + 1, cp.description, exists);
            println!("     {}", cp.path.display());
        }
        return Ok(());
    }

    let file = load_config_or_default(config_path.as_deref())?;

    if args.validate {
        file.config
            .resolve(PathBuf::new)
            .context("Configuration is invalid")?;
    }

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&file.config)?),
        _ => {
            match &file.path {
                Some(path) => println!("# Configuration from: {}", path.display()),
                None => println!("# No configuration file found, showing defaults"),
            }
            println!();
            print!(
                "{}",
                toml::to_string_pretty(&file.config).context("Failed to render configuration")?
            );
        }
    }

    if args.validate {
        eprintln!("Configuration is valid");
    }

    Ok(())
}
