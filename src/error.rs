// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling facilities for the content catalog and the tuple migration.

use crate::authz::MalformedRecord;
use crate::migration::MigrationSummary;
use dropshot::ClientErrorStatusCode;
use dropshot::HttpError;
use slog_error_chain::SlogInlineError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, SlogInlineError)]
pub enum Error {
    /// A relational row could not be converted into relation tuples.
    #[error(transparent)]
    MalformedRecord(#[from] MalformedRecord),

    /// The authorization store could not be reached within the retry budget.
    ///
    /// On the read path this is a "deny"; on the migration path it ends the
    /// run.
    #[error("authorization store unavailable: {message}")]
    AuthorizationUnavailable { message: String },

    /// The authorization store answered, but refused the request as invalid.
    #[error("authorization store rejected request: {message}")]
    AuthorizationRejected { message: String },

    /// The relational store could not be reached.
    #[error("relational store unavailable: {message}")]
    RelationalUnavailable { message: String },

    /// A migration run completed, but left records unsynced.
    #[error(
        "migration of {} incomplete: {} record(s) remain unsynced",
        .0.table,
        .0.unsynced_remaining
    )]
    PartialMigrationFailure(MigrationSummary),

    #[error("missing or invalid principal: {message}")]
    Unauthenticated { message: String },

    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("request did not complete within {timeout:?}")]
    RequestTimedOut { timeout: Duration },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl Error {
    pub fn internal_error(message: &str) -> Error {
        Error::Internal { message: message.to_owned() }
    }

    /// Whether this error means one of the backing stores is unreachable, as
    /// opposed to a problem with a particular record or request.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Error::AuthorizationUnavailable { .. }
                | Error::RelationalUnavailable { .. }
        )
    }
}

impl From<Error> for HttpError {
    fn from(err: Error) -> Self {
        match err {
            Error::Unauthenticated { .. } => HttpError::for_client_error(
                Some("Unauthenticated".to_string()),
                ClientErrorStatusCode::UNAUTHORIZED,
                err.to_string(),
            ),
            Error::InvalidRequest { .. } => HttpError::for_bad_request(
                Some("InvalidRequest".to_string()),
                err.to_string(),
            ),
            Error::RelationalUnavailable { .. } => HttpError::for_unavail(
                Some("RelationalUnavailable".to_string()),
                err.to_string(),
            ),
            Error::AuthorizationUnavailable { .. } => HttpError::for_unavail(
                Some("AuthorizationUnavailable".to_string()),
                err.to_string(),
            ),
            Error::RequestTimedOut { .. } => HttpError::for_unavail(
                Some("RequestTimedOut".to_string()),
                err.to_string(),
            ),
            Error::MalformedRecord(_)
            | Error::AuthorizationRejected { .. }
            | Error::PartialMigrationFailure(_)
            | Error::Internal { .. } => {
                HttpError::for_internal_error(err.to_string())
            }
        }
    }
}
