//! Configuration file discovery and loading

use std::path::{Path, PathBuf};

use super::Config;

/// Configuration file wrapper with path information
#[derive(Debug, Clone)]
pub struct ConfigFile {
    /// Path where the configuration was loaded from, `None` for defaults
    pub path: Option<PathBuf>,

    /// The parsed configuration
    pub config: Config,
}

/// Configuration file search path with description
#[derive(Debug, Clone)]
pub struct ConfigPath {
    /// The actual file path
    pub path: PathBuf,
    /// Human-readable description for display
    pub description: &'static str,
}

/// Standard configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Application name for directory paths
const APP_NAME: &str = "authsock-scope";

/// Get all configuration search paths with descriptions (in priority order)
///
/// Search order:
/// 1. `$XDG_CONFIG_HOME/authsock-scope/config.toml` (if env var set)
/// 2. `~/.config/authsock-scope/config.toml`
/// 3. `~/.authsock-scope.toml`
/// 4. `/etc/authsock-scope/config.toml`
pub fn config_search_paths() -> Vec<ConfigPath> {
    let mut paths = Vec::new();

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(ConfigPath {
            path: PathBuf::from(xdg).join(APP_NAME).join(CONFIG_FILE_NAME),
            description: "$XDG_CONFIG_HOME/authsock-scope/config.toml",
        });
    }

    if let Some(home) = dirs::home_dir() {
        let dotconfig = home.join(".config").join(APP_NAME).join(CONFIG_FILE_NAME);
        if !paths.iter().any(|p| p.path == dotconfig) {
            paths.push(ConfigPath {
                path: dotconfig,
                description: "~/.config/authsock-scope/config.toml",
            });
        }
        paths.push(ConfigPath {
            path: home.join(format!(".{}.toml", APP_NAME)),
            description: "~/.authsock-scope.toml",
        });
    }

    paths.push(ConfigPath {
        path: PathBuf::from("/etc").join(APP_NAME).join(CONFIG_FILE_NAME),
        description: "/etc/authsock-scope/config.toml",
    });

    paths
}

/// Find the configuration file in standard locations
pub fn find_config_file() -> Option<PathBuf> {
    for cp in config_search_paths() {
        if cp.path.is_file() {
            tracing::debug!(path = %cp.path.display(), "Found configuration file");
            return Some(cp.path);
        }
    }

    tracing::debug!("No configuration file found in standard locations");
    None
}

/// Load configuration from the specified path
pub fn load_config(path: &Path) -> crate::Result<ConfigFile> {
    tracing::debug!("Loading configuration from: {}", path.display());

    let content = std::fs::read_to_string(path).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to read configuration file '{}': {}",
            path.display(),
            e
        ))
    })?;

    let config: Config = toml::from_str(&content).map_err(|e| {
        crate::Error::Config(format!(
            "Failed to parse configuration file '{}': {}",
            path.display(),
            e
        ))
    })?;

    Ok(ConfigFile {
        path: Some(path.to_path_buf()),
        config,
    })
}

/// Load the given file, or the first one found in the search paths, or defaults
pub fn load_config_or_default(path: Option<&Path>) -> crate::Result<ConfigFile> {
    if let Some(path) = path {
        return load_config(path);
    }
    match find_config_file() {
        Some(path) => load_config(&path),
        None => Ok(ConfigFile {
            path: None,
            config: Config::default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_search_paths() {
        let paths = config_search_paths();
        assert!(!paths.is_empty());

        for cp in &paths {
            assert!(cp.path.is_absolute(), "Path should be absolute: {:?}", cp.path);
            assert!(!cp.description.is_empty());
        }
        assert!(
            paths
                .iter()
                .any(|p| p.path.to_string_lossy().contains("authsock-scope/config.toml"))
        );
    }

    #[test]
    fn test_load_config_minimal() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "socket = \"/tmp/minimal.sock\"\n").unwrap();

        let config_file = load_config(&config_path).unwrap();
        assert_eq!(config_file.path.as_deref(), Some(config_path.as_path()));
        assert_eq!(config_file.config.upstream, "$SSH_AUTH_SOCK");
        assert_eq!(config_file.config.idle_timeout, "5m");
    }

    #[test]
    fn test_load_explicit_path_missing() {
        let err = load_config_or_default(Some(Path::new("/nonexistent/path/config.toml")))
            .unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "invalid toml { [ }").unwrap();

        assert!(matches!(
            load_config(&config_path),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_load_config_unknown_field() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "upstream = \"/tmp/socket\"\nsockets = 1\n").unwrap();

        assert!(load_config(&config_path).is_err(), "Should reject unknown fields");
    }

    #[test]
    fn test_load_config_bad_enum_value() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        std::fs::write(&config_path, "list_mode = \"sometimes\"\n").unwrap();

        assert!(load_config(&config_path).is_err());
    }
}
