// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory content store

use crate::content::ContentQuery;
use crate::content::ContentStore;
use crate::db::model::Package;
use crate::db::model::PackageName;
use crate::db::model::PackageWithOwner;
use crate::db::model::System;
use crate::db::pagination::DataPageParams;
use crate::Error;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// A [`ContentStore`] over in-memory tables, with failure injection.
#[derive(Default)]
pub struct SimContentStore {
    inner: Mutex<SimTables>,
}

#[derive(Default)]
struct SimTables {
    systems: BTreeMap<i64, System>,
    package_names: BTreeMap<i64, PackageName>,
    packages: BTreeMap<i64, Package>,
    package_cache: BTreeMap<(i64, i64), i64>,
    checkpoints: BTreeMap<String, i64>,

    latency: Option<Duration>,
    unavailable: bool,
    page_fetches: usize,
    fail_page_fetches_after: Option<usize>,
    mark_synced_failures: usize,
}

impl SimContentStore {
    pub fn new() -> SimContentStore {
        SimContentStore::default()
    }

    pub fn insert_system(&self, id: i64, organization_id: Option<i64>) {
        self.inner.lock().unwrap().systems.insert(
            id,
            System { id, organization_id, display_name: format!("system-{id}") },
        );
    }

    pub fn insert_package_name(&self, id: i64, name: &str) {
        self.inner.lock().unwrap().package_names.insert(
            id,
            PackageName {
                id,
                name: name.to_string(),
                summary: format!("{name} summary"),
            },
        );
    }

    pub fn insert_package(&self, package: Package) {
        self.inner.lock().unwrap().packages.insert(package.id, package);
    }

    pub fn package(&self, id: i64) -> Option<Package> {
        self.inner.lock().unwrap().packages.get(&id).cloned()
    }

    pub fn synced_package_ids(&self) -> Vec<i64> {
        self.inner
            .lock()
            .unwrap()
            .packages
            .values()
            .filter(|p| p.synced)
            .map(|p| p.id)
            .collect()
    }

    pub fn checkpoint(&self, name: &str) -> Option<i64> {
        self.inner.lock().unwrap().checkpoints.get(name).copied()
    }

    pub fn package_cache(&self) -> BTreeMap<(i64, i64), i64> {
        self.inner.lock().unwrap().package_cache.clone()
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().unwrap().latency = Some(latency);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    /// Let `count` more page fetches succeed, then fail the rest as
    /// unavailable.  `None` removes the limit.
    pub fn fail_page_fetches_after(&self, count: Option<usize>) {
        let mut tables = self.inner.lock().unwrap();
        let served = tables.page_fetches;
        tables.fail_page_fetches_after = count.map(|c| served + c);
    }

    /// Fail the next `count` synced-flag updates.
    pub fn fail_mark_synced(&self, count: usize) {
        self.inner.lock().unwrap().mark_synced_failures = count;
    }

    /// Number of page fetches served so far
    pub fn page_fetches(&self) -> usize {
        self.inner.lock().unwrap().page_fetches
    }

    async fn enter(&self) -> Result<(), Error> {
        let latency = self.inner.lock().unwrap().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.inner.lock().unwrap().unavailable {
            return Err(unavailable());
        }
        Ok(())
    }

    async fn enter_page_fetch(&self) -> Result<(), Error> {
        self.enter().await?;
        let mut tables = self.inner.lock().unwrap();
        if let Some(limit) = tables.fail_page_fetches_after {
            if tables.page_fetches >= limit {
                return Err(unavailable());
            }
        }
        tables.page_fetches += 1;
        Ok(())
    }
}

fn unavailable() -> Error {
    Error::RelationalUnavailable { message: "simulated outage".to_string() }
}

fn page<T>(
    rows: impl Iterator<Item = (i64, T)>,
    pagparams: &DataPageParams,
) -> Vec<T> {
    rows.filter(|(id, _)| pagparams.marker.map_or(true, |m| *id > m))
        .take(pagparams.limit.get() as usize)
        .map(|(_, row)| row)
        .collect()
}

impl SimTables {
    fn with_owner(&self, package: &Package) -> PackageWithOwner {
        let organization_id = package
            .system_id
            .and_then(|id| self.systems.get(&id))
            .and_then(|s| s.organization_id);
        PackageWithOwner { package: package.clone(), organization_id }
    }

    fn matches(&self, query: &ContentQuery, row: &PackageWithOwner) -> bool {
        let package = &row.package;
        if let Some(organization_id) = query.filter.organization_id {
            if row.organization_id != Some(organization_id) {
                return false;
            }
        }
        if let Some(name) = &query.filter.name {
            match self.package_names.get(&package.name_id) {
                Some(n) if n.name == *name => (),
                _ => return false,
            }
        }
        if let Some(systems) = &query.admissible_systems {
            match package.system_id {
                Some(id) if systems.contains(&id) => (),
                _ => return false,
            }
        }
        // Same as the inner join on package_name.
        self.package_names.contains_key(&package.name_id)
    }
}

#[async_trait]
impl ContentStore for SimContentStore {
    async fn systems_list_page(
        &self,
        pagparams: &DataPageParams,
    ) -> Result<Vec<System>, Error> {
        self.enter_page_fetch().await?;
        let tables = self.inner.lock().unwrap();
        Ok(page(
            tables.systems.iter().map(|(id, s)| (*id, s.clone())),
            pagparams,
        ))
    }

    async fn packages_list_unsynced_page(
        &self,
        pagparams: &DataPageParams,
    ) -> Result<Vec<PackageWithOwner>, Error> {
        self.enter_page_fetch().await?;
        let tables = self.inner.lock().unwrap();
        Ok(page(
            tables
                .packages
                .values()
                .filter(|p| !p.synced)
                .map(|p| (p.id, tables.with_owner(p))),
            pagparams,
        ))
    }

    async fn packages_count_unsynced(&self) -> Result<u64, Error> {
        self.enter().await?;
        let tables = self.inner.lock().unwrap();
        Ok(tables.packages.values().filter(|p| !p.synced).count() as u64)
    }

    async fn packages_mark_synced(
        &self,
        package_ids: &[i64],
    ) -> Result<usize, Error> {
        self.enter().await?;
        let mut tables = self.inner.lock().unwrap();
        if tables.mark_synced_failures > 0 {
            tables.mark_synced_failures -= 1;
            return Err(unavailable());
        }
        let mut updated = 0;
        for id in package_ids {
            if let Some(package) = tables.packages.get_mut(id) {
                if !package.synced {
                    package.synced = true;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn content_packages_list(
        &self,
        query: &ContentQuery,
        pagparams: &DataPageParams,
    ) -> Result<Vec<PackageWithOwner>, Error> {
        self.enter_page_fetch().await?;
        let tables = self.inner.lock().unwrap();
        Ok(page(
            tables
                .packages
                .values()
                .map(|p| (p.id, tables.with_owner(p)))
                .filter(|(_, row)| tables.matches(query, row)),
            pagparams,
        ))
    }

    async fn checkpoint_get(&self, name: &str) -> Result<Option<i64>, Error> {
        self.enter().await?;
        Ok(self.inner.lock().unwrap().checkpoints.get(name).copied())
    }

    async fn checkpoint_set(
        &self,
        name: &str,
        last_id: i64,
    ) -> Result<(), Error> {
        self.enter().await?;
        self.inner.lock().unwrap().checkpoints.insert(name.to_string(), last_id);
        Ok(())
    }

    async fn package_caches_refresh(&self) -> Result<usize, Error> {
        self.enter().await?;
        let mut tables = self.inner.lock().unwrap();
        let mut systems_by_key: BTreeMap<(i64, i64), Vec<i64>> = BTreeMap::new();
        for package in tables.packages.values() {
            let Some(system_id) = package.system_id else { continue };
            let Some(organization_id) =
                tables.systems.get(&system_id).and_then(|s| s.organization_id)
            else {
                continue;
            };
            let systems = systems_by_key
                .entry((organization_id, package.name_id))
                .or_default();
            if !systems.contains(&system_id) {
                systems.push(system_id);
            }
        }
        let counts: BTreeMap<(i64, i64), i64> = systems_by_key
            .into_iter()
            .map(|(key, systems)| (key, systems.len() as i64))
            .collect();
        let removed = tables
            .package_cache
            .keys()
            .filter(|key| !counts.contains_key(key))
            .count();
        let touched = counts.len() + removed;
        tables.package_cache = counts;
        Ok(touched)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::content::PackageFilter;
    use assert_matches::assert_matches;
    use std::num::NonZeroU32;

    fn package(id: i64, name_id: i64, system_id: Option<i64>) -> Package {
        Package {
            id,
            name_id,
            evra: "1-2".to_string(),
            description_hash: "Testing".to_string(),
            summary_hash: "FooBar".to_string(),
            advisory_id: 321,
            synced: false,
            system_id,
        }
    }

    #[tokio::test]
    async fn test_content_list_filters_and_pages() {
        let store = SimContentStore::new();
        store.insert_system(1, Some(10));
        store.insert_system(2, Some(20));
        store.insert_package_name(100, "kernel");
        store.insert_package_name(101, "bash");
        for id in 1..=5 {
            store.insert_package(package(id, 100, Some(1)));
        }
        store.insert_package(package(6, 101, Some(1)));
        store.insert_package(package(7, 100, Some(2)));

        let query = ContentQuery {
            filter: PackageFilter {
                organization_id: Some(10),
                name: Some("kernel".to_string()),
            },
            ..Default::default()
        };
        let first = DataPageParams::first_page(NonZeroU32::new(3).unwrap());
        let rows = store.content_packages_list(&query, &first).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.package.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        let rows = store
            .content_packages_list(&query, &first.next_page(3))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.package.id).collect();
        assert_eq!(ids, vec![4, 5]);

        let scoped = ContentQuery { admissible_systems: Some(vec![]), ..query };
        assert!(store
            .content_packages_list(&scoped, &first)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = SimContentStore::new();
        store.insert_system(1, Some(10));
        let first = DataPageParams::first_page(NonZeroU32::new(1).unwrap());

        store.fail_page_fetches_after(Some(1));
        store.systems_list_page(&first).await.unwrap();
        let error = store.systems_list_page(&first).await.unwrap_err();
        assert_matches!(error, Error::RelationalUnavailable { .. });
        store.fail_page_fetches_after(None);
        store.systems_list_page(&first).await.unwrap();
        assert_eq!(store.page_fetches(), 2);
    }

    #[tokio::test]
    async fn test_package_cache_refresh() {
        let store = SimContentStore::new();
        store.insert_system(1, Some(10));
        store.insert_system(2, Some(10));
        store.insert_system(3, None);
        store.insert_package(package(1, 100, Some(1)));
        store.insert_package(package(2, 100, Some(2)));
        store.insert_package(package(3, 100, Some(2)));
        store.insert_package(package(4, 101, Some(3)));

        assert_eq!(store.package_caches_refresh().await.unwrap(), 1);
        assert_eq!(
            store.package_cache(),
            BTreeMap::from([((10, 100), 2)])
        );
    }
}
