// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recompute the denormalized per-organization package counts

use crate::content::ContentStore;
use crate::Error;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use std::sync::Arc;
use std::time::Instant;

pub struct PackageCacheRefresher {
    log: Logger,
    content: Arc<dyn ContentStore>,
}

impl PackageCacheRefresher {
    pub fn new(
        log: &Logger,
        content: Arc<dyn ContentStore>,
    ) -> PackageCacheRefresher {
        PackageCacheRefresher {
            log: log.new(o!("component" => "PackageCacheRefresher")),
            content,
        }
    }

    /// Refresh every `package_cache` row, returning the number of rows
    /// inserted, updated or removed.
    pub async fn refresh(&self) -> Result<usize, Error> {
        let started = Instant::now();
        info!(self.log, "refreshing package caches");
        match self.content.package_caches_refresh().await {
            Ok(rows_touched) => {
                info!(self.log, "refreshed package caches";
                    "rows_touched" => rows_touched,
                    "elapsed" => ?started.elapsed(),
                );
                Ok(rows_touched)
            }
            Err(error) => {
                warn!(self.log, "failed to refresh package caches"; &error);
                Err(error)
            }
        }
    }
}
