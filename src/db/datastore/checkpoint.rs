// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on migration checkpoints.

use super::DataStore;
use crate::db::error::public_error_from_diesel;
use crate::db::schema::migration_checkpoint::dsl;
use crate::Error;
use async_bb8_diesel::AsyncRunQueryDsl;
use chrono::Utc;
use diesel::prelude::*;

impl DataStore {
    pub async fn migration_checkpoint_get(
        &self,
        name: &str,
    ) -> Result<Option<i64>, Error> {
        dsl::migration_checkpoint
            .filter(dsl::name.eq(name.to_string()))
            .select(dsl::last_id)
            .first_async::<i64>(&*self.pool_connection().await?)
            .await
            .optional()
            .map_err(public_error_from_diesel)
    }

    /// Record `last_id` as the position of the named migration.
    pub async fn migration_checkpoint_set(
        &self,
        name: &str,
        last_id: i64,
    ) -> Result<(), Error> {
        let now = Utc::now();
        diesel::insert_into(dsl::migration_checkpoint)
            .values((
                dsl::name.eq(name.to_string()),
                dsl::last_id.eq(last_id),
                dsl::time_modified.eq(now),
            ))
            .on_conflict(dsl::name)
            .do_update()
            .set((dsl::last_id.eq(last_id), dsl::time_modified.eq(now)))
            .execute_async(&*self.pool_connection().await?)
            .await
            .map_err(public_error_from_diesel)?;
        Ok(())
    }
}
