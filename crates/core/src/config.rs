use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::paths::Paths;

/// Settings for the bridge host: how the remote browser is launched and how
/// sessions behave once attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Explicit browser binary. If None, known install locations are probed.
    #[serde(default)]
    pub chrome_executable: Option<String>,
    #[serde(default = "default_debug_host")]
    pub debug_host: String,
    /// First port tried for `--remote-debugging-port`; probed upward if busy.
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,
    #[serde(default)]
    pub proxy: String,
    /// Extra command-line arguments passed verbatim to the browser.
    #[serde(default)]
    pub other_args: String,
    #[serde(default = "default_store_user_data")]
    pub store_user_data: bool,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_start_url")]
    pub start_url: String,
    /// Copy/paste capability advertised to injected page scripts.
    #[serde(default = "default_sync_copy_paste")]
    pub sync_copy_paste: bool,
    #[serde(default = "default_dark_theme")]
    pub dark_theme: bool,
    /// Optional per-call timeout for correlated requests. None waits forever.
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    #[serde(default = "default_launch_timeout_secs")]
    pub launch_timeout_secs: u64,
}

fn default_debug_host() -> String {
    "localhost".to_string()
}

fn default_debug_port() -> u16 {
    9222
}

fn default_store_user_data() -> bool {
    true
}

fn default_headless() -> bool {
    true
}

fn default_start_url() -> String {
    "https://google.com".to_string()
}

fn default_sync_copy_paste() -> bool {
    true
}

fn default_dark_theme() -> bool {
    true
}

fn default_launch_timeout_secs() -> u64 {
    15
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            chrome_executable: None,
            debug_host: default_debug_host(),
            debug_port: default_debug_port(),
            proxy: String::new(),
            other_args: String::new(),
            store_user_data: default_store_user_data(),
            headless: default_headless(),
            start_url: default_start_url(),
            sync_copy_paste: default_sync_copy_paste(),
            dark_theme: default_dark_theme(),
            call_timeout_ms: None,
            launch_timeout_secs: default_launch_timeout_secs(),
        }
    }
}

impl BridgeConfig {
    /// Load from disk. The file is parsed as JSON5 so hand-edited configs may
    /// carry comments and trailing commas.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BridgeConfig = json5::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.debug_host.trim().is_empty() {
            return Err(Error::Config("debugHost must not be empty".to_string()));
        }
        if self.debug_port == 0 {
            return Err(Error::Config("debugPort must be non-zero".to_string()));
        }
        if self.call_timeout_ms == Some(0) {
            return Err(Error::Config(
                "callTimeoutMs must be positive (omit it to disable the timeout)".to_string(),
            ));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_secs(self.launch_timeout_secs)
    }

    /// Browser args supplied by the user: proxy and free-form extras.
    pub fn user_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let proxy = self.proxy.trim();
        if !proxy.is_empty() {
            args.push(format!("--proxy-server={}", proxy));
        }
        args.extend(self.other_args.split_whitespace().map(str::to_string));
        args
    }

    pub fn color_scheme(&self) -> &'static str {
        if self.dark_theme {
            "dark"
        } else {
            "light"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_object() {
        let cfg: BridgeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.debug_port, 9222);
        assert_eq!(cfg.debug_host, "localhost");
        assert!(cfg.sync_copy_paste);
        assert!(cfg.call_timeout().is_none());
    }

    #[test]
    fn test_load_json5_with_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
  // local dev browser
  "debugPort": 9333,
  "callTimeoutMs": 2500,
  "proxy": "http://127.0.0.1:8080",
}"#,
        )
        .unwrap();
        let cfg = BridgeConfig::load(&path).unwrap();
        assert_eq!(cfg.debug_port, 9333);
        assert_eq!(cfg.call_timeout(), Some(Duration::from_millis(2500)));
        assert_eq!(cfg.user_args(), vec!["--proxy-server=http://127.0.0.1:8080"]);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = BridgeConfig::default();
        cfg.other_args = "--lang=en --mute-audio".to_string();
        cfg.dark_theme = false;
        cfg.save(&path).unwrap();

        let loaded = BridgeConfig::load(&path).unwrap();
        assert_eq!(loaded.user_args(), vec!["--lang=en", "--mute-audio"]);
        assert_eq!(loaded.color_scheme(), "light");
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let cfg = BridgeConfig {
            call_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let cfg = BridgeConfig::load_or_default(&paths).unwrap();
        assert_eq!(cfg.start_url, "https://google.com");
    }
}
