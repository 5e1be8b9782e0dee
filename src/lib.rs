// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Authorization-aware content catalog
//!
//! Package metadata lives in a relational store.  Who may see it is decided
//! by a separate relation-tuple authorization store.  This crate migrates
//! ownership rows into relation tuples ([`migration`]) and answers content
//! queries filtered by what the caller may view ([`query`]).

pub mod authz;
pub mod backoff;
pub mod cache_refresh;
pub mod config;
pub mod content;
mod context;
pub mod db;
mod error;
pub mod http_entrypoints;
pub mod migration;
pub mod query;
pub mod sim;
pub mod test_util;
pub mod views;

pub use config::Config;
pub use context::ServerContext;
pub use error::Error;

use authz::AuthorizationClient;
use authz::RelationStore;
use authz::SpiceDbClient;
use content::ContentStore;
use dropshot::ConfigDropshot;
use dropshot::HandlerTaskMode;
use dropshot::HttpServer;
use query::QueryFilterCoordinator;
use slog::info;
use slog::o;
use slog::Logger;
use slog_error_chain::SlogInlineError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// What a process does once started
///
/// Exactly one mode runs per process, so a migration never shares a process
/// with the content API.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunMode {
    /// Serve the content API
    Serve,
    MigrateHostsAndSystems,
    MigratePackages,
    /// Hosts and systems, then packages
    MigrateAll,
    RefreshPackageCaches,
}

impl FromStr for RunMode {
    type Err = String;

    /// Accepts the command-line names as well as the values historically
    /// used for `RUN_ACTION`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "serve" => Ok(RunMode::Serve),
            "migrate-hosts-and-systems" | "MIGRATE_CONTENT_TO_SPICEDB" => {
                Ok(RunMode::MigrateHostsAndSystems)
            }
            "migrate-packages" | "MIGRATE_PACKAGES_TO_SPICEDB" => {
                Ok(RunMode::MigratePackages)
            }
            "migrate-all" => Ok(RunMode::MigrateAll),
            "refresh-package-caches" | "REFRESH_PACKAGE_CACHES" => {
                Ok(RunMode::RefreshPackageCaches)
            }
            _ => Err(format!("unknown run mode {s:?}")),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunMode::Serve => "serve",
            RunMode::MigrateHostsAndSystems => "migrate-hosts-and-systems",
            RunMode::MigratePackages => "migrate-packages",
            RunMode::MigrateAll => "migrate-all",
            RunMode::RefreshPackageCaches => "refresh-package-caches",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error, SlogInlineError)]
pub enum StartError {
    #[error("failed to initialize logger")]
    InitializeLogger(#[source] std::io::Error),
    #[error("failed to create authorization store client")]
    InitializeAuthzClient(#[source] reqwest::Error),
    #[error("failed to initialize HTTP server")]
    InitializeHttpServer(#[source] dropshot::BuildError),
}

/// The two backing stores, however they are implemented
#[derive(Clone)]
pub struct Stores {
    pub content: Arc<dyn ContentStore>,
    pub relations: Arc<dyn RelationStore>,
}

impl Stores {
    /// Connect to the stores named in `config`
    ///
    /// Connections are made lazily, so this succeeds even if neither store is
    /// up yet.
    pub fn from_config(log: &Logger, config: &Config) -> Result<Stores, StartError> {
        info!(log, "setting up content database pool";
            "url" => config.database.redacted_url());
        let pool = Arc::new(db::Pool::new(log, &config.database));
        let datastore = db::DataStore::new(log, pool);
        let spicedb = SpiceDbClient::new(
            log,
            &config.authz.url,
            &config.authz.token,
            config.authz.consistency,
            config.authz.connect_timeout,
        )
        .map_err(StartError::InitializeAuthzClient)?;
        Ok(Stores { content: Arc::new(datastore), relations: Arc::new(spicedb) })
    }

    pub fn authorization_client(
        &self,
        log: &Logger,
        config: &Config,
    ) -> AuthorizationClient {
        AuthorizationClient::new(
            log,
            self.relations.clone(),
            config.authz.retry.clone(),
            config.authz.max_batch_check,
        )
    }
}

/// Build the root logger from the `[log]` section of `config`.
pub fn root_logger(config: &Config) -> Result<Logger, StartError> {
    config
        .log
        .to_logger("inventory-access")
        .map_err(StartError::InitializeLogger)
}

/// Start the content API server.
///
/// Handlers are cancelled when their client disconnects, which also cancels
/// any authorization or relational calls still in flight for that request.
pub fn start_server(
    log: &Logger,
    dropshot_config: &ConfigDropshot,
    coordinator: QueryFilterCoordinator,
) -> Result<HttpServer<Arc<ServerContext>>, StartError> {
    let context = ServerContext::new(log, coordinator);
    let config = ConfigDropshot {
        default_handler_task_mode: HandlerTaskMode::CancelOnDisconnect,
        ..dropshot_config.clone()
    };
    let server = dropshot::ServerBuilder::new(
        http_entrypoints::api(),
        Arc::new(context),
        log.new(o!("component" => "dropshot")),
    )
    .config(config)
    .start()
    .map_err(StartError::InitializeHttpServer)?;
    info!(log, "content API listening"; "address" => %server.local_addr());
    Ok(server)
}
