use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::bato::BASE_URL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryBackend {
    Memory,
    #[default]
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Site the chapter addresses are resolved against
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout for markup and image downloads
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub library: LibraryBackend,

    /// sqlx connection string, only read when `library` is `sqlite`
    #[serde(default)]
    pub database_url: Option<String>,

    /// JSON library file, only read when `library` is `json`
    #[serde(default)]
    pub library_path: Option<PathBuf>,
}

fn default_base_url() -> String {
    BASE_URL.to_string()
}
fn default_user_agent() -> String {
    "manga-window/0.1.0".to_string()
}
fn default_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout(),
            library: LibraryBackend::default(),
            database_url: None,
            library_path: None,
        }
    }
}

pub fn app_config_dir() -> PathBuf {
    let config_dir = dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("manga-window");

    fs::create_dir_all(&config_dir).ok();
    config_dir
}

impl Config {
    pub fn load() -> Self {
        Self::load_from(&app_config_dir().join("config.json"))
    }

    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            if let Ok(content) = fs::read_to_string(path) {
                match serde_json::from_str::<Config>(&content) {
                    Ok(config) => return config,
                    Err(e) => log::warn!("Ignoring malformed config {}: {}", path.display(), e),
                }
            }
        }
        Self::default()
    }

    pub fn library_path(&self) -> PathBuf {
        self.library_path
            .clone()
            .unwrap_or_else(|| app_config_dir().join("library.json"))
    }

    pub fn database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            format!(
                "sqlite://{}",
                app_config_dir().join("library.db").display()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "timeout_secs": 5, "library": "sqlite" }"#).unwrap();

        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.library, LibraryBackend::Sqlite);
        assert_eq!(config.base_url, BASE_URL);
        assert!(config.database_url.is_none());
        assert!(config.library_path.is_none());
    }

    #[test]
    fn missing_or_broken_file_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("manga-window-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let missing = Config::load_from(&dir.join("absent.json"));
        assert_eq!(missing.library, LibraryBackend::Json);

        let broken_path = dir.join("broken.json");
        fs::write(&broken_path, "{ not json").unwrap();
        let broken = Config::load_from(&broken_path);
        assert_eq!(broken.timeout_secs, 30);

        fs::remove_dir_all(&dir).ok();
    }
}
