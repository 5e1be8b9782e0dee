// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable program to run the content catalog or one of its maintenance
//! jobs

use anyhow::anyhow;
use anyhow::Context;
use camino::Utf8PathBuf;
use clap::Parser;
use inventory_access::cache_refresh::PackageCacheRefresher;
use inventory_access::migration::MigrationEngine;
use inventory_access::migration::MigrationOptions;
use inventory_access::query::QueryFilterCoordinator;
use inventory_access::Config;
use inventory_access::RunMode;
use inventory_access::Stores;
use slog::error;
use slog::info;
use slog::Logger;

#[derive(Debug, Parser)]
#[clap(
    name = "inventory-access",
    about = "Authorization-filtered content catalog and tuple migration"
)]
struct Args {
    /// What to run.  Also read from RUN_ACTION, which accepts the legacy
    /// values MIGRATE_CONTENT_TO_SPICEDB, MIGRATE_PACKAGES_TO_SPICEDB and
    /// REFRESH_PACKAGE_CACHES.
    #[clap(
        long,
        env = "RUN_ACTION",
        default_value = "serve",
        value_parser = parse_run_mode
    )]
    mode: RunMode,

    /// Ignore the saved migration checkpoint and start from the first row
    #[clap(long, action)]
    restart: bool,

    #[clap(name = "CONFIG_FILE_PATH", action)]
    config_file_path: Utf8PathBuf,
}

fn parse_run_mode(s: &str) -> Result<RunMode, String> {
    s.parse()
}

#[tokio::main]
async fn main() {
    if let Err(error) = do_run().await {
        eprintln!("inventory-access: {error:#}");
        std::process::exit(1);
    }
}

async fn do_run() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config_file_path)
        .context("loading configuration")?;
    let log = inventory_access::root_logger(&config)?;
    info!(log, "starting"; "mode" => %args.mode);

    let stores = Stores::from_config(&log, &config)?;
    let result = run(&log, &config, &stores, args.mode, MigrationOptions {
        restart: args.restart,
    })
    .await;
    if let Err(error) = &result {
        error!(log, "{} failed", args.mode; "error" => format!("{error:#}"));
    }
    result
}

async fn run(
    log: &Logger,
    config: &Config,
    stores: &Stores,
    mode: RunMode,
    options: MigrationOptions,
) -> anyhow::Result<()> {
    let authz = stores.authorization_client(log, config);
    let engine = || {
        MigrationEngine::new(
            log,
            stores.content.clone(),
            authz.clone(),
            config.migration.clone(),
        )
    };

    match mode {
        RunMode::Serve => {
            let coordinator = QueryFilterCoordinator::new(
                log,
                authz.clone(),
                stores.content.clone(),
                config.query.clone(),
            );
            let server =
                inventory_access::start_server(log, &config.dropshot, coordinator)?;
            server.await.map_err(|e| anyhow!("server stopped: {e}"))
        }
        RunMode::MigrateHostsAndSystems => {
            engine().migrate_hosts_and_systems(options).await?;
            Ok(())
        }
        RunMode::MigratePackages => {
            engine().migrate_packages().await?;
            Ok(())
        }
        RunMode::MigrateAll => {
            engine().migrate_all(options).await?;
            Ok(())
        }
        RunMode::RefreshPackageCaches => {
            PackageCacheRefresher::new(log, stores.content.clone())
                .refresh()
                .await?;
            Ok(())
        }
    }
}
