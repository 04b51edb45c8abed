use directories::BaseDirs;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::{env, fs, path::PathBuf, time::Duration};
use url::Url;

#[derive(Clone, Debug, Deserialize)]
pub struct DeepinfraFileConfig {
    pub base_url: Option<String>,
    pub timeout_ms: Option<u64>,
    pub stream_model: Option<String>,
    pub sync_model: Option<String>,
    pub extra_headers: Option<BTreeMap<String, String>>,
}

#[derive(Clone, Debug)]
pub struct DeepinfraConfig {
    pub base_url: Url,
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub stream_model: Option<String>,
    pub sync_model: Option<String>,
    pub extra_headers: Vec<(String, String)>,
}

impl DeepinfraConfig {
    /// Environment beats the config file, the file beats built-in defaults.
    /// A missing file is fine, a malformed one is not.
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        let mut base_url = "https://api.deepinfra.com".to_string();
        let mut timeout_ms = 120_000u64;
        let mut stream_model = None;
        let mut sync_model = None;
        let mut extra_headers = Vec::new();

        if let Some(path) = Self::config_path() {
            if path.exists() {
                let raw = fs::read_to_string(&path)
                    .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?;
                let file_cfg: DeepinfraFileConfig = toml::from_str(&raw)
                    .map_err(|e| anyhow::anyhow!("parse {}: {e}", path.display()))?;
                if let Some(b) = file_cfg.base_url {
                    base_url = b;
                }
                if let Some(t) = file_cfg.timeout_ms {
                    timeout_ms = t;
                }
                stream_model = file_cfg.stream_model;
                sync_model = file_cfg.sync_model;
                if let Some(extra) = file_cfg.extra_headers {
                    extra_headers = extra.into_iter().collect();
                }
            }
        }

        if let Ok(b) = env::var("DEEPINFRA_BASE_URL") {
            base_url = b;
        }
        if let Ok(t) = env::var("DEEPINFRA_TIMEOUT_MS") {
            timeout_ms = t
                .parse()
                .map_err(|_| anyhow::anyhow!("DEEPINFRA_TIMEOUT_MS must be an integer"))?;
        }
        let proxy = env::var("HTTPS_PROXY")
            .ok()
            .or_else(|| env::var("HTTP_PROXY").ok());

        Ok(DeepinfraConfig {
            base_url: Url::parse(&base_url)?,
            timeout: Duration::from_millis(timeout_ms),
            proxy,
            stream_model,
            sync_model,
            extra_headers,
        })
    }

    fn config_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        let p = if cfg!(target_os = "windows") {
            base.home_dir().join(".deepchat").join("config.toml")
        } else {
            base.config_dir().join("deepchat").join("config.toml")
        };
        Some(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_config_accepts_partial_tables() {
        let raw = r#"
            timeout_ms = 5000

            [extra_headers]
            x-trace-tag = "abc"
        "#;
        let cfg: DeepinfraFileConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.base_url, None);
        assert_eq!(cfg.timeout_ms, Some(5000));
        assert_eq!(
            cfg.extra_headers.unwrap().get("x-trace-tag").map(String::as_str),
            Some("abc")
        );
    }

    #[test]
    fn test_file_config_rejects_wrong_types() {
        let raw = "timeout_ms = \"soon\"";
        assert!(toml::from_str::<DeepinfraFileConfig>(raw).is_err());
    }
}
