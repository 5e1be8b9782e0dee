// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed access to the relational content store
//!
//! Nothing here knows about authorization.  Rows come back with enough
//! ownership metadata (reporting system and its organization) for callers to
//! build the permission checks themselves.

use crate::db::model::PackageWithOwner;
use crate::db::model::System;
use crate::db::pagination::DataPageParams;
use crate::Error;
use async_trait::async_trait;

/// Relational filter given by the caller of the content API
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PackageFilter {
    pub organization_id: Option<i64>,
    /// Exact package name
    pub name: Option<String>,
}

/// One relational content query
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ContentQuery {
    pub filter: PackageFilter,
    /// If set, only packages reported by these systems are returned.  An empty
    /// list matches nothing.
    pub admissible_systems: Option<Vec<i64>>,
}

/// The capability we need from the relational store.
///
/// Every listing walks its table in ascending primary-key order.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// One page of systems (the ownership records for hosts and systems)
    async fn systems_list_page(
        &self,
        pagparams: &DataPageParams,
    ) -> Result<Vec<System>, Error>;

    /// One page of packages with `synced = false`
    async fn packages_list_unsynced_page(
        &self,
        pagparams: &DataPageParams,
    ) -> Result<Vec<PackageWithOwner>, Error>;

    async fn packages_count_unsynced(&self) -> Result<u64, Error>;

    /// Set `synced = true` on the given packages.  Never sets it back to
    /// false.  Returns the number of rows that changed.
    async fn packages_mark_synced(&self, package_ids: &[i64])
        -> Result<usize, Error>;

    /// One page of packages matching `query`
    async fn content_packages_list(
        &self,
        query: &ContentQuery,
        pagparams: &DataPageParams,
    ) -> Result<Vec<PackageWithOwner>, Error>;

    /// Last primary key recorded for the named migration
    async fn checkpoint_get(&self, name: &str) -> Result<Option<i64>, Error>;

    async fn checkpoint_set(&self, name: &str, last_id: i64)
        -> Result<(), Error>;

    /// Recompute the denormalized package cache.  Returns the number of cache
    /// rows written or removed.
    async fn package_caches_refresh(&self) -> Result<usize, Error>;
}
