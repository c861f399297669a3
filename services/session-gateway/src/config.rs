//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Both secrets (the Bungie client secret and the cookie secret) come from
//! the environment or from a file named in the TOML, never from the TOML
//! itself.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bungie_auth::{AUTHORIZE_ENDPOINT, Secret, TOKEN_ENDPOINT};
use bungie_session::{CookieOptions, SameSite, SessionSettings};
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub bungie: BungieConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Externally visible origin of the gateway. Absolute return URLs on this
    /// origin are accepted without listing it in `allowed_return_origins`.
    #[serde(default)]
    pub public_base_url: Option<String>,
}

/// Bungie.net application registration
#[derive(Debug, Deserialize)]
pub struct BungieConfig {
    pub client_id: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub client_secret: Secret,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_prefix: String,
    pub grace_period_secs: u64,
    pub flow_max_age_secs: u64,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub path: String,
    pub default_return_url: String,
    pub allowed_return_origins: Vec<String>,
    /// 0 disables refresh coalescing.
    pub coalesce_window_secs: u64,
    pub secret_file: Option<PathBuf>,
    #[serde(skip)]
    pub secret: Secret,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let settings = SessionSettings::default();
        Self {
            cookie_prefix: settings.cookie_prefix,
            grace_period_secs: settings.grace_period.as_secs(),
            flow_max_age_secs: settings.flow_max_age.as_secs(),
            secure: settings.cookie_options.secure,
            http_only: settings.cookie_options.http_only,
            same_site: settings.cookie_options.same_site,
            path: settings.cookie_options.path,
            default_return_url: settings.default_return_url,
            allowed_return_origins: settings.allowed_return_origins,
            coalesce_window_secs: settings.coalesce_window.map_or(0, |w| w.as_secs()),
            secret_file: None,
            secret: Secret::default(),
        }
    }
}

fn default_max_connections() -> usize {
    1000
}

fn default_authorize_url() -> String {
    AUTHORIZE_ENDPOINT.into()
}

fn default_token_url() -> String {
    TOKEN_ENDPOINT.into()
}

fn default_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order, for each secret:
    /// 1. env var (`BUNGIE_CLIENT_SECRET`, `SESSION_SECRET`)
    /// 2. the `*_file` path from config
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        require_http_url("authorize_url", &config.bungie.authorize_url)?;
        require_http_url("token_url", &config.bungie.token_url)?;
        if let Some(ref base) = config.server.public_base_url {
            require_http_url("public_base_url", base)?;
        }
        for origin in &config.session.allowed_return_origins {
            require_http_url("allowed_return_origins", origin)?;
        }

        if config.bungie.client_id.trim().is_empty() {
            return Err(Error::Config("client_id must not be empty".into()));
        }
        if config.bungie.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be greater than 0".into()));
        }
        if config.server.max_connections == 0 {
            return Err(Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }
        if config.session.flow_max_age_secs == 0 {
            return Err(Error::Config(
                "flow_max_age_secs must be greater than 0".into(),
            ));
        }
        if config.session.cookie_prefix.is_empty() {
            return Err(Error::Config("cookie_prefix must not be empty".into()));
        }

        config.bungie.client_secret = resolve_secret(
            "BUNGIE_CLIENT_SECRET",
            config.bungie.client_secret_file.as_deref(),
        )?;
        config.session.secret =
            resolve_secret("SESSION_SECRET", config.session.secret_file.as_deref())?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("bungie-session-gateway.toml")
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.bungie.timeout_secs)
    }

    /// Engine settings derived from the `[session]` table.
    pub fn session_settings(&self) -> SessionSettings {
        let session = &self.session;
        let mut allowed_return_origins = session.allowed_return_origins.clone();
        if let Some(ref base) = self.server.public_base_url {
            allowed_return_origins.push(base.clone());
        }
        SessionSettings {
            cookie_prefix: session.cookie_prefix.clone(),
            cookie_options: CookieOptions {
                http_only: session.http_only,
                secure: session.secure,
                same_site: session.same_site,
                path: session.path.clone(),
            },
            grace_period: Duration::from_secs(session.grace_period_secs),
            flow_max_age: Duration::from_secs(session.flow_max_age_secs),
            default_return_url: session.default_return_url.clone(),
            allowed_return_origins,
            coalesce_window: (session.coalesce_window_secs > 0)
                .then(|| Duration::from_secs(session.coalesce_window_secs)),
        }
    }
}

fn require_http_url(field: &str, value: &str) -> Result<()> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        _ => Err(Error::Config(format!(
            "{field} must be an http:// or https:// URL, got: {value}"
        ))),
    }
}

fn resolve_secret(env_var: &str, file: Option<&Path>) -> Result<Secret> {
    let value = if let Ok(value) = std::env::var(env_var) {
        value
    } else if let Some(path) = file {
        std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?
    } else {
        return Err(Error::Config(format!(
            "{env_var} is not set and no secret file is configured"
        )));
    };
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Config(format!("{env_var} must not be empty")));
    }
    Ok(Secret::new(value))
}
