// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::query::QueryFilterCoordinator;
use slog::Logger;

/// Shared state available to all API request handlers
pub struct ServerContext {
    log: Logger,
    coordinator: QueryFilterCoordinator,
}

impl ServerContext {
    pub fn new(log: &Logger, coordinator: QueryFilterCoordinator) -> Self {
        ServerContext { log: log.clone(), coordinator }
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    pub fn coordinator(&self) -> &QueryFilterCoordinator {
        &self.coordinator
    }
}
