// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on [`Package`]s.

use super::DataStore;
use crate::content::ContentQuery;
use crate::db::error::public_error_from_diesel;
use crate::db::model::Package;
use crate::db::model::PackageWithOwner;
use crate::db::pagination::DataPageParams;
use crate::db::schema::package;
use crate::db::schema::package_name;
use crate::db::schema::system;
use crate::Error;
use async_bb8_diesel::AsyncRunQueryDsl;
use diesel::prelude::*;
use slog::debug;

fn with_owner(rows: Vec<(Package, Option<i64>)>) -> Vec<PackageWithOwner> {
    rows.into_iter()
        .map(|(package, organization_id)| PackageWithOwner {
            package,
            organization_id,
        })
        .collect()
}

impl DataStore {
    /// List a page of packages whose tuples have not been migrated, with the
    /// organization of the reporting system.
    pub async fn package_list_unsynced(
        &self,
        pagparams: &DataPageParams,
    ) -> Result<Vec<PackageWithOwner>, Error> {
        let mut query = package::table
            .left_join(
                system::table.on(package::system_id.eq(system::id.nullable())),
            )
            .filter(package::synced.eq(false))
            .select((Package::as_select(), system::organization_id.nullable()))
            .order(package::id.asc())
            .limit(pagparams.limit_i64())
            .into_boxed();
        if let Some(marker) = pagparams.marker {
            query = query.filter(package::id.gt(marker));
        }

        let rows = query
            .load_async::<(Package, Option<i64>)>(
                &*self.pool_connection().await?,
            )
            .await
            .map_err(public_error_from_diesel)?;
        Ok(with_owner(rows))
    }

    pub async fn package_count_unsynced(&self) -> Result<u64, Error> {
        let count = package::table
            .filter(package::synced.eq(false))
            .count()
            .get_result_async::<i64>(&*self.pool_connection().await?)
            .await
            .map_err(public_error_from_diesel)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Mark packages as synced.  Rows that are already synced are left
    /// alone.
    pub async fn package_mark_synced(
        &self,
        package_ids: &[i64],
    ) -> Result<usize, Error> {
        if package_ids.is_empty() {
            return Ok(0);
        }
        let updated = diesel::update(package::table)
            .filter(package::id.eq_any(package_ids.to_vec()))
            .filter(package::synced.eq(false))
            .set(package::synced.eq(true))
            .execute_async(&*self.pool_connection().await?)
            .await
            .map_err(public_error_from_diesel)?;
        debug!(self.log, "marked packages synced";
            "requested" => package_ids.len(),
            "updated" => updated,
        );
        Ok(updated)
    }

    /// List a page of packages for the content API.
    pub async fn package_list_content(
        &self,
        content_query: &ContentQuery,
        pagparams: &DataPageParams,
    ) -> Result<Vec<PackageWithOwner>, Error> {
        if let Some(systems) = &content_query.admissible_systems {
            if systems.is_empty() {
                return Ok(Vec::new());
            }
        }

        let mut query = package::table
            .left_join(
                system::table.on(package::system_id.eq(system::id.nullable())),
            )
            .inner_join(
                package_name::table.on(package::name_id.eq(package_name::id)),
            )
            .select((Package::as_select(), system::organization_id.nullable()))
            .order(package::id.asc())
            .limit(pagparams.limit_i64())
            .into_boxed();

        if let Some(marker) = pagparams.marker {
            query = query.filter(package::id.gt(marker));
        }
        let filter = &content_query.filter;
        if let Some(organization_id) = filter.organization_id {
            query = query.filter(system::organization_id.eq(organization_id));
        }
        if let Some(name) = &filter.name {
            query = query.filter(package_name::name.eq(name.clone()));
        }
        if let Some(systems) = &content_query.admissible_systems {
            query = query.filter(package::system_id.eq_any(systems.clone()));
        }

        let rows = query
            .load_async::<(Package, Option<i64>)>(
                &*self.pool_connection().await?,
            )
            .await
            .map_err(public_error_from_diesel)?;
        Ok(with_owner(rows))
    }
}
