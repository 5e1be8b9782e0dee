// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on the denormalized package cache.

use super::DataStore;
use crate::db::error::public_error_from_diesel;
use crate::Error;
use async_bb8_diesel::AsyncRunQueryDsl;
use diesel::sql_types::BigInt;
use diesel::QueryableByName;
use slog::info;

// Recomputes every (organization, package name) row in one statement, so a
// concurrent reader sees either the old cache or the new one.
const REFRESH_PACKAGE_CACHE_SQL: &str = "
WITH counts AS (
    SELECT s.organization_id, p.name_id,
           COUNT(DISTINCT p.system_id) AS systems_count
    FROM package p
    JOIN system s ON s.id = p.system_id
    WHERE s.organization_id IS NOT NULL
    GROUP BY s.organization_id, p.name_id
), upserted AS (
    INSERT INTO package_cache
        (organization_id, name_id, systems_count, time_modified)
    SELECT organization_id, name_id, systems_count, now() FROM counts
    ON CONFLICT (organization_id, name_id) DO UPDATE
        SET systems_count = EXCLUDED.systems_count,
            time_modified = EXCLUDED.time_modified
    RETURNING 1
), removed AS (
    DELETE FROM package_cache pc
    WHERE NOT EXISTS (
        SELECT 1 FROM counts c
        WHERE c.organization_id = pc.organization_id
          AND c.name_id = pc.name_id
    )
    RETURNING 1
)
SELECT (SELECT COUNT(*) FROM upserted) + (SELECT COUNT(*) FROM removed)
    AS rows_touched
";

#[derive(QueryableByName)]
struct RefreshOutcome {
    #[diesel(sql_type = BigInt)]
    rows_touched: i64,
}

impl DataStore {
    pub async fn package_cache_refresh(&self) -> Result<usize, Error> {
        let outcome = diesel::sql_query(REFRESH_PACKAGE_CACHE_SQL)
            .get_result_async::<RefreshOutcome>(
                &*self.pool_connection().await?,
            )
            .await
            .map_err(public_error_from_diesel)?;
        let rows = usize::try_from(outcome.rows_touched).unwrap_or(0);
        info!(self.log, "refreshed package cache"; "rows_touched" => rows);
        Ok(rows)
    }
}
