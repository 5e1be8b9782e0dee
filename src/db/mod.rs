// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities for working with the content database

mod datastore;
mod error;
pub mod model;
pub mod pagination;
mod pool;
pub mod schema;

pub use datastore::DataStore;
pub use pool::Pool;

use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DurationMilliSeconds;
use std::fmt;
use std::time::Duration;

/// Database configuration
#[serde_as]
#[derive(Clone, Deserialize, PartialEq, Serialize)]
pub struct Config {
    /// PostgreSQL connection URL.  May carry a password.
    pub url: String,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "connection_timeout_ms", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_connections() -> u32 {
    16
}

impl Config {
    /// The URL with any password replaced, suitable for logging
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        let Some((userinfo, host)) = rest.rsplit_once('@') else {
            return self.url.clone();
        };
        match userinfo.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
            None => self.url.clone(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("url", &self.redacted_url())
            .field("connection_timeout", &self.connection_timeout)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}
