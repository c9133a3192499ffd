//! Config loader (A1): a JSON benchmark config file layered with CLI
//! overrides into a `BenchConfig`. Grounded in the teacher's
//! `ConfigFile`/`Config` split — a plain deserializable struct plus a
//! wrapper owning the shared `reqwest::Client`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{ModelAuthProvider, StaticAuthProvider, TrussrcAuthProvider};

fn default_port() -> u16 {
    8080
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_enable_streaming() -> bool {
    true
}

fn default_max_requests_per_run() -> u64 {
    1000
}

fn default_max_time_per_run() -> u64 {
    600
}

fn default_num_concurrency() -> Vec<usize> {
    vec![1, 2, 4]
}

fn default_traffic_scenario() -> Vec<String> {
    vec!["D(480,300)".to_string()]
}

fn default_model() -> String {
    "default-model".to_string()
}

/// How the CLI/config resolves a bearer token: a value given directly,
/// or a `~/.trussrc` profile name to look up.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub trussrc_profile: Option<String>,
}

impl AuthConfig {
    pub fn build_provider(&self) -> Result<std::sync::Arc<dyn ModelAuthProvider>> {
        if let Some(token) = &self.token {
            return Ok(std::sync::Arc::new(StaticAuthProvider::new(Some(token.clone()))));
        }
        let profile = self.trussrc_profile.as_deref().unwrap_or("default");
        let provider =
            TrussrcAuthProvider::load(profile).context("loading ~/.trussrc auth profile")?;
        Ok(std::sync::Arc::new(provider))
    }
}

/// The parsed JSON configuration file. Every field has a default so an
/// empty `{}` is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_enable_streaming")]
    pub enable_streaming: bool,

    #[serde(default = "default_max_requests_per_run")]
    pub max_requests_per_run: u64,

    #[serde(default = "default_max_time_per_run")]
    pub max_time_per_run: u64,

    #[serde(default = "default_num_concurrency")]
    pub num_concurrency: Vec<usize>,

    #[serde(default = "default_traffic_scenario")]
    pub traffic_scenario: Vec<String>,

    #[serde(default = "default_model")]
    pub model: String,

    pub url: String,

    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            enable_streaming: default_enable_streaming(),
            max_requests_per_run: default_max_requests_per_run(),
            max_time_per_run: default_max_time_per_run(),
            num_concurrency: default_num_concurrency(),
            traffic_scenario: default_traffic_scenario(),
            model: default_model(),
            url: String::new(),
            auth: AuthConfig::default(),
        }
    }
}

/// Runtime configuration, wrapping the parsed file. Kept separate from
/// `ConfigFile` so CLI overrides can be layered on without re-parsing.
#[derive(Debug, Clone)]
pub struct BenchConfig {
    pub file: ConfigFile,
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        let contents = fs::read_to_string(&expanded)
            .with_context(|| format!("reading config file at {expanded}"))?;
        let file: ConfigFile =
            serde_json::from_str(&contents).with_context(|| "parsing config JSON")?;
        Ok(Self { file })
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(_) if !path.exists() => Ok(Self { file: ConfigFile::default() }),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_object_parses_with_defaults() {
        let file: ConfigFile = serde_json::from_str(r#"{"url": "http://localhost:9000"}"#).unwrap();
        assert_eq!(file.port, 8080);
        assert_eq!(file.host, "0.0.0.0");
        assert!(file.enable_streaming);
        assert_eq!(file.num_concurrency, vec![1, 2, 4]);
    }

    #[test]
    fn overrides_are_respected() {
        let json = r#"{"url": "http://x", "port": 9090, "num_concurrency": [8, 16]}"#;
        let file: ConfigFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.port, 9090);
        assert_eq!(file.num_concurrency, vec![8, 16]);
    }

    #[test]
    fn loads_from_a_real_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"url": "http://localhost:1234", "port": 1234}}"#).unwrap();
        let config = BenchConfig::load(file.path()).unwrap();
        assert_eq!(config.file.port, 1234);
        assert_eq!(config.file.url, "http://localhost:1234");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = BenchConfig::load_or_default(Path::new("/nonexistent/path.json")).unwrap();
        assert_eq!(config.file.port, 8080);
    }
}
