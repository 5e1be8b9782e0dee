// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Primary interface for database read and write operations

use super::error::public_error_from_pool;
use super::model::PackageWithOwner;
use super::model::System;
use super::pagination::DataPageParams;
use super::pool::DbConnection;
use super::Pool;
use crate::content::ContentQuery;
use crate::content::ContentStore;
use crate::Error;
use async_bb8_diesel::ConnectionManager;
use async_trait::async_trait;
use slog::o;
use slog::Logger;
use std::sync::Arc;

mod checkpoint;
mod package;
mod package_cache;
mod system;

type DataStoreConnection<'a> =
    bb8::PooledConnection<'a, ConnectionManager<DbConnection>>;

pub struct DataStore {
    log: Logger,
    pool: Arc<Pool>,
}

impl DataStore {
    pub fn new(log: &Logger, pool: Arc<Pool>) -> Self {
        DataStore { log: log.new(o!("component" => "DataStore")), pool }
    }

    async fn pool_connection(&self) -> Result<DataStoreConnection<'_>, Error> {
        self.pool.pool().get().await.map_err(public_error_from_pool)
    }
}

#[async_trait]
impl ContentStore for DataStore {
    async fn systems_list_page(
        &self,
        pagparams: &DataPageParams,
    ) -> Result<Vec<System>, Error> {
        self.system_list(pagparams).await
    }

    async fn packages_list_unsynced_page(
        &self,
        pagparams: &DataPageParams,
    ) -> Result<Vec<PackageWithOwner>, Error> {
        self.package_list_unsynced(pagparams).await
    }

    async fn packages_count_unsynced(&self) -> Result<u64, Error> {
        self.package_count_unsynced().await
    }

    async fn packages_mark_synced(
        &self,
        package_ids: &[i64],
    ) -> Result<usize, Error> {
        self.package_mark_synced(package_ids).await
    }

    async fn content_packages_list(
        &self,
        query: &ContentQuery,
        pagparams: &DataPageParams,
    ) -> Result<Vec<PackageWithOwner>, Error> {
        self.package_list_content(query, pagparams).await
    }

    async fn checkpoint_get(&self, name: &str) -> Result<Option<i64>, Error> {
        self.migration_checkpoint_get(name).await
    }

    async fn checkpoint_set(
        &self,
        name: &str,
        last_id: i64,
    ) -> Result<(), Error> {
        self.migration_checkpoint_set(name, last_id).await
    }

    async fn package_caches_refresh(&self) -> Result<usize, Error> {
        self.package_cache_refresh().await
    }
}
