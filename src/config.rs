//! Configuration management
//!
//! Settings come from built-in defaults, an optional `config.json` in the
//! config directory, and `SF_*` environment variables, in that order of
//! precedence.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;
use crate::Result;
use crate::error::Error;

/// Alias whose login URL comes from `SF_LOGIN_URL`; every other alias uses `SF_SANDBOX_URL`
pub const PRODUCTION_ALIAS: &str = "org";

const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";
const DEFAULT_REDIRECT_URI: &str = "http://localhost:1717/callback";
const DEFAULT_SCOPES: &str = "api";
const DEFAULT_CALLBACK_PORT: u16 = 1717;

/// Resolved connection settings, consumed as a static record by the connect flow
#[derive(Debug, Clone)]
pub struct Config {
    /// Provider base URL, without trailing slash
    pub login_url: String,

    /// Connected app consumer key
    pub client_id: String,

    /// Connected app consumer secret (public clients have none)
    pub client_secret: Option<String>,

    /// Must match the callback registered on the connected app exactly
    pub redirect_uri: String,

    /// Space separated OAuth scopes
    pub scopes: String,

    /// Local port the callback listener binds
    pub callback_port: u16,

    /// Maximum wait for the browser redirect; `None` waits forever
    pub callback_timeout_secs: Option<u64>,

    /// Directory holding `environments.json`
    pub data_dir: PathBuf,
}

/// On-disk shape of `config.json`; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub login_url: Option<String>,

    #[serde(default)]
    pub sandbox_url: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub client_secret: Option<String>,

    #[serde(default)]
    pub redirect_uri: Option<String>,

    #[serde(default)]
    pub scopes: Option<String>,

    #[serde(default)]
    pub callback_port: Option<u16>,

    #[serde(default)]
    pub callback_timeout_secs: Option<u64>,

    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    /// Resolve a config for `alias` from a parsed config file and an environment lookup.
    pub fn resolve<F>(file: ConfigFile, alias: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let login_url = if alias == PRODUCTION_ALIAS {
            var("SF_LOGIN_URL").or(file.login_url)
        } else {
            var("SF_SANDBOX_URL").or(file.sandbox_url)
        }
        .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string());

        let client_id = var("SF_CLIENT_ID")
            .or(file.client_id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| Error::Config("SF_CLIENT_ID is not set".to_string()))?;

        let callback_port = match var("SF_CALLBACK_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                Error::Config(format!("SF_CALLBACK_PORT is not a valid port: {}", raw))
            })?,
            None => file.callback_port.unwrap_or(DEFAULT_CALLBACK_PORT),
        };

        let callback_timeout_secs = match var("SF_CALLBACK_TIMEOUT") {
            Some(raw) => Some(raw.parse::<u64>().map_err(|_| {
                Error::Config(format!("SF_CALLBACK_TIMEOUT is not a number of seconds: {}", raw))
            })?),
            None => file.callback_timeout_secs,
        };

        let config = Self {
            login_url: login_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret: var("SF_CLIENT_SECRET").or(file.client_secret),
            redirect_uri: var("SF_REDIRECT_URI")
                .or(file.redirect_uri)
                .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string()),
            scopes: var("SF_SCOPES")
                .or(file.scopes)
                .unwrap_or_else(|| DEFAULT_SCOPES.to_string()),
            callback_port,
            callback_timeout_secs,
            data_dir: resolve_data_dir(file.data_dir, &var),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        Url::parse(&self.login_url)
            .map_err(|e| Error::Config(format!("Invalid login URL {}: {}", self.login_url, e)))?;

        let redirect = Url::parse(&self.redirect_uri)
            .map_err(|e| Error::Config(format!("Invalid redirect URI {}: {}", self.redirect_uri, e)))?;

        if let Some(port) = redirect.port_or_known_default() {
            if port != self.callback_port {
                tracing::warn!(
                    "Redirect URI port {} differs from callback port {}",
                    port,
                    self.callback_port
                );
            }
        }

        Ok(())
    }

    /// `{login_url}/services/oauth2/authorize`
    pub fn authorize_endpoint(&self) -> String {
        format!("{}/services/oauth2/authorize", self.login_url)
    }

    /// `{login_url}/services/oauth2/token`
    pub fn token_endpoint(&self) -> String {
        format!("{}/services/oauth2/token", self.login_url)
    }

    /// Path component of the redirect URI, served by the callback listener
    pub fn callback_path(&self) -> String {
        Url::parse(&self.redirect_uri)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| "/callback".to_string())
    }

    pub fn callback_timeout(&self) -> Option<Duration> {
        self.callback_timeout_secs.map(Duration::from_secs)
    }

    /// Registry file of connected environments
    pub fn environments_path(&self) -> PathBuf {
        self.data_dir.join("environments.json")
    }
}

/// Get the config directory path
///
/// `$SFAUTH_HOME` when set, otherwise `~/.sfauth`.
pub fn config_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("SFAUTH_HOME") {
        return PathBuf::from(home);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sfauth")
}

/// Get the config file path
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Read `config.json` if it exists
pub fn load_file(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }

    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Invalid config file {:?}: {}", path, e)))
}

fn resolve_data_dir<F>(from_file: Option<PathBuf>, var: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    var("SF_DATA_DIR")
        .map(PathBuf::from)
        .or(from_file)
        .unwrap_or_else(config_dir)
}

/// Load configuration for `alias` from the config file and process environment
pub fn load(alias: &str) -> Result<Config> {
    let file = load_file(&config_path())?;
    Config::resolve(file, alias, |key| std::env::var(key).ok())
}

/// Registry directory, resolved without requiring OAuth client settings
pub fn load_data_dir() -> Result<PathBuf> {
    let file = load_file(&config_path())?;
    Ok(resolve_data_dir(file.data_dir, |key| {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(
            ConfigFile::default(),
            "org",
            env_of(&[("SF_CLIENT_ID", "abc"), ("SF_DATA_DIR", "/tmp/sfauth")]),
        )
        .unwrap();

        assert_eq!(config.login_url, "https://login.salesforce.com");
        assert_eq!(config.redirect_uri, "http://localhost:1717/callback");
        assert_eq!(config.scopes, "api");
        assert_eq!(config.callback_port, 1717);
        assert!(config.client_secret.is_none());
        assert!(config.callback_timeout().is_none());
        assert_eq!(config.callback_path(), "/callback");
        assert_eq!(config.environments_path(), PathBuf::from("/tmp/sfauth/environments.json"));
    }

    #[test]
    fn test_missing_client_id() {
        let result = Config::resolve(ConfigFile::default(), "org", env_of(&[]));
        assert!(matches!(result, Err(Error::Config(_))));

        let result = Config::resolve(ConfigFile::default(), "org", env_of(&[("SF_CLIENT_ID", "  ")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_login_url_by_alias() {
        let env = env_of(&[
            ("SF_CLIENT_ID", "abc"),
            ("SF_LOGIN_URL", "https://prod.example.com/"),
            ("SF_SANDBOX_URL", "https://test.salesforce.com"),
        ]);

        let prod = Config::resolve(ConfigFile::default(), "org", &env).unwrap();
        assert_eq!(prod.login_url, "https://prod.example.com");
        assert_eq!(prod.token_endpoint(), "https://prod.example.com/services/oauth2/token");

        let sandbox = Config::resolve(ConfigFile::default(), "sandbox", &env).unwrap();
        assert_eq!(sandbox.login_url, "https://test.salesforce.com");
        assert_eq!(
            sandbox.authorize_endpoint(),
            "https://test.salesforce.com/services/oauth2/authorize"
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile {
            client_id: Some("from-file".to_string()),
            scopes: Some("api refresh_token".to_string()),
            callback_port: Some(9000),
            ..Default::default()
        };
        let config = Config::resolve(
            file,
            "org",
            env_of(&[("SF_CLIENT_ID", "from-env"), ("SF_CALLBACK_TIMEOUT", "120")]),
        )
        .unwrap();

        assert_eq!(config.client_id, "from-env");
        assert_eq!(config.scopes, "api refresh_token");
        assert_eq!(config.callback_port, 9000);
        assert_eq!(config.callback_timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_invalid_port() {
        let result = Config::resolve(
            ConfigFile::default(),
            "org",
            env_of(&[("SF_CLIENT_ID", "abc"), ("SF_CALLBACK_PORT", "not-a-port")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_redirect_uri() {
        let result = Config::resolve(
            ConfigFile::default(),
            "org",
            env_of(&[("SF_CLIENT_ID", "abc"), ("SF_REDIRECT_URI", "not a url")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");

        assert!(load_file(&path).unwrap().client_id.is_none());

        std::fs::write(&path, r#"{"client_id": "abc", "callback_port": 8080}"#).unwrap();
        let file = load_file(&path).unwrap();
        assert_eq!(file.client_id.as_deref(), Some("abc"));
        assert_eq!(file.callback_port, Some(8080));

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_file(&path), Err(Error::Config(_))));
    }
}
