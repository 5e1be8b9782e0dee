// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities shared by unit and integration tests

use crate::backoff::RetryPolicy;
use dropshot::test_util::LogContext;
use dropshot::ConfigLogging;
use dropshot::ConfigLoggingIfExists;
use dropshot::ConfigLoggingLevel;
use std::time::Duration;

/// Set up a [`LogContext`] appropriate for a test named `test_name`
///
/// Call `cleanup_successful()` on the returned context at the end of a
/// passing test so its log file is removed.
pub fn test_setup_log(test_name: &str) -> LogContext {
    let log_config = ConfigLogging::File {
        level: ConfigLoggingLevel::Trace,
        path: "UNUSED".into(),
        if_exists: ConfigLoggingIfExists::Fail,
    };

    LogContext::new(test_name, &log_config)
}

/// A retry policy that gives up quickly, so failure paths don't slow tests
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        call_timeout: Duration::from_millis(100),
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        max_elapsed: Duration::from_millis(200),
    }
}
