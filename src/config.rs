// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interfaces for parsing configuration files

use crate::authz::Consistency;
use crate::backoff::RetryPolicy;
use crate::db;
use crate::migration::MigrationConfig;
use crate::query::QueryConfig;
use camino::Utf8Path;
use camino::Utf8PathBuf;
use dropshot::ConfigDropshot;
use dropshot::ConfigLogging;
use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DurationMilliSeconds;
use slog_error_chain::SlogInlineError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Overrides the authorization store URL
pub const ENV_SPICEDB_URL: &str = "SPICEDB_URL";
/// Overrides the authorization store bearer token
pub const ENV_SPICEDB_PSK: &str = "SPICEDB_PSK";
/// Overrides the content database URL
pub const ENV_CONTENT_POSTGRES_URI: &str = "CONTENT_POSTGRES_URI";

/// Configuration for the whole service
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    /// Dropshot configuration for the content API server
    pub dropshot: ConfigDropshot,
    /// Server-wide logging configuration
    pub log: ConfigLogging,
    pub database: db::Config,
    pub authz: AuthzConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// How to reach the authorization store
#[serde_as]
#[derive(Clone, Deserialize, Serialize)]
pub struct AuthzConfig {
    /// Base URL of the store's HTTP API
    pub url: String,
    /// Pre-shared key sent as a bearer token
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub consistency: Consistency,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Most resources sent in a single bulk check
    #[serde(default = "default_max_batch_check")]
    pub max_batch_check: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "connect_timeout_ms", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_max_batch_check() -> usize {
    100
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(2)
}

impl fmt::Debug for AuthzConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthzConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("consistency", &self.consistency)
            .field("retry", &self.retry)
            .field("max_batch_check", &self.max_batch_check)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Config {
    /// Load a `Config` from the given TOML file
    ///
    /// Values from the environment (see [`ENV_SPICEDB_URL`],
    /// [`ENV_SPICEDB_PSK`] and [`ENV_CONTENT_POSTGRES_URI`]) take precedence
    /// over the file.
    pub fn from_file(path: &Utf8Path) -> Result<Config, LoadError> {
        let file_contents = std::fs::read_to_string(path)
            .map_err(|err| LoadError::Io { path: path.into(), err })?;
        Config::from_toml(path, &file_contents, |name| std::env::var(name).ok())
    }

    fn from_toml(
        path: &Utf8Path,
        contents: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Config, LoadError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|err| LoadError::Parse { path: path.into(), err })?;
        config.apply_overrides(env);
        config
            .validate()
            .map_err(|message| LoadError::Invalid { path: path.into(), message })?;
        Ok(config)
    }

    fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(url) = env(ENV_SPICEDB_URL) {
            self.authz.url = url;
        }
        if let Some(token) = env(ENV_SPICEDB_PSK) {
            self.authz.token = token;
        }
        if let Some(url) = env(ENV_CONTENT_POSTGRES_URI) {
            self.database.url = url;
        }
    }

    fn validate(&self) -> Result<(), String> {
        if self.authz.url.is_empty() {
            return Err("authz.url must not be empty".to_string());
        }
        if self.database.url.is_empty() {
            return Err("database.url must not be empty".to_string());
        }
        if self.authz.max_batch_check == 0 {
            return Err("authz.max_batch_check must be positive".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("database.max_connections must be positive".to_string());
        }
        let durations = [
            ("authz.retry.call_timeout_ms", self.authz.retry.call_timeout),
            ("authz.retry.max_elapsed_ms", self.authz.retry.max_elapsed),
            ("query.request_timeout_ms", self.query.request_timeout),
            ("database.connection_timeout_ms", self.database.connection_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(format!("{name} must be positive"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, SlogInlineError)]
pub enum LoadError {
    #[error("error reading \"{path}\": {err}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing \"{path}\": {err}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: toml::de::Error,
    },
    #[error("invalid configuration in \"{path}\": {message}")]
    Invalid { path: Utf8PathBuf, message: String },
}
