//! Auth provider (A2): resolves a bearer token either from a directly
//! supplied value or from a `~/.trussrc`-style INI profile. The core
//! consumes this via `ModelAuthProvider` and never parses the file
//! itself (spec §6).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("could not resolve home directory")]
    NoHomeDir,
    #[error("trussrc file not found at {0}")]
    NotFound(PathBuf),
    #[error("profile {0:?} not found in trussrc")]
    ProfileNotFound(String),
}

pub trait ModelAuthProvider: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Token supplied directly (CLI flag, env var), replacing the teacher's
/// global mutable auth-provider singleton with an explicit value owned
/// by `ExecutorConfig`.
pub struct StaticAuthProvider {
    token: Option<String>,
}

impl StaticAuthProvider {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl ModelAuthProvider for StaticAuthProvider {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

#[derive(Debug, Clone, Default)]
struct TrussrcProfile {
    remote_url: Option<String>,
    api_key: Option<String>,
}

/// Parses `~/.trussrc`: an INI file with `[profile_name]` sections each
/// carrying `remote_url`/`api_key` keys. Hand-rolled line scanner (the
/// teacher prefers small manual parsers over a new crate for this kind
/// of structured-but-tiny format, e.g. its custom `TransformerEntry`
/// deserializer) rather than adding an INI dependency.
pub struct TrussrcAuthProvider {
    token: Option<String>,
}

impl TrussrcAuthProvider {
    /// Loads the default `~/.trussrc`, selecting `profile` (default
    /// `"default"`, per the supplemented multi-profile feature recovered
    /// from the original source).
    pub fn load(profile: &str) -> Result<Self, AuthError> {
        let home = dirs::home_dir().ok_or(AuthError::NoHomeDir)?;
        let path = home.join(".trussrc");
        Self::load_from_path(&path, profile)
    }

    pub fn load_from_path(path: &std::path::Path, profile: &str) -> Result<Self, AuthError> {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        let path = PathBuf::from(expanded);
        let contents =
            fs::read_to_string(&path).map_err(|_| AuthError::NotFound(path.clone()))?;
        let profiles = parse_trussrc(&contents);
        let selected = profiles.get(profile).ok_or_else(|| AuthError::ProfileNotFound(profile.to_string()))?;
        Ok(Self { token: selected.api_key.clone() })
    }
}

impl ModelAuthProvider for TrussrcAuthProvider {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

fn parse_trussrc(contents: &str) -> HashMap<String, TrussrcProfile> {
    let mut profiles: HashMap<String, TrussrcProfile> = HashMap::new();
    let mut current: Option<String> = None;

    for raw_line in contents.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            current = Some(name.trim().to_string());
            profiles.entry(name.trim().to_string()).or_default();
            continue;
        }
        let Some(name) = current.as_ref() else { continue };
        let Some((key, value)) = line.split_once('=') else { continue };
        let key = key.trim();
        let value = value.trim().trim_matches('"').to_string();
        let profile = profiles.entry(name.clone()).or_default();
        match key {
            "remote_url" => profile.remote_url = Some(value),
            "api_key" => profile.api_key = Some(value),
            _ => {}
        }
    }

    profiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_multiple_profiles() {
        let contents = "[default]\nremote_url = https://api.example.com\napi_key = abc123\n\n[staging]\nremote_url = https://staging.example.com\napi_key = xyz789\n";
        let profiles = parse_trussrc(contents);
        assert_eq!(profiles["default"].api_key.as_deref(), Some("abc123"));
        assert_eq!(profiles["staging"].api_key.as_deref(), Some("xyz789"));
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let contents = "# comment\n\n[default]\n; another comment\napi_key = tok\n";
        let profiles = parse_trussrc(contents);
        assert_eq!(profiles["default"].api_key.as_deref(), Some("tok"));
    }

    #[test]
    fn loads_from_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[default]\napi_key = from-file\n").unwrap();
        let provider = TrussrcAuthProvider::load_from_path(file.path(), "default").unwrap();
        assert_eq!(provider.bearer_token().as_deref(), Some("from-file"));
    }

    #[test]
    fn missing_profile_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[default]\napi_key = tok\n").unwrap();
        let result = TrussrcAuthProvider::load_from_path(file.path(), "nonexistent");
        assert!(result.is_err());
    }
}
