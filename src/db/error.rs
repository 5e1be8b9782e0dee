// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error handling and conversions.

use crate::Error;
use async_bb8_diesel::ConnectionError;
use diesel::result::DatabaseErrorInformation;
use diesel::result::DatabaseErrorKind as DieselErrorKind;
use diesel::result::Error as DieselError;

/// Summarizes details provided with a database error.
fn format_database_error(
    kind: DieselErrorKind,
    info: &dyn DatabaseErrorInformation,
) -> String {
    let mut rv =
        format!("database error (kind = {:?}): {}\n", kind, info.message());
    if let Some(details) = info.details() {
        rv.push_str(&format!("DETAILS: {}\n", details));
    }
    if let Some(hint) = info.hint() {
        rv.push_str(&format!("HINT: {}\n", hint));
    }
    if let Some(table_name) = info.table_name() {
        rv.push_str(&format!("TABLE NAME: {}\n", table_name));
    }
    if let Some(constraint_name) = info.constraint_name() {
        rv.push_str(&format!("CONSTRAINT NAME: {}\n", constraint_name));
    }
    rv
}

/// Converts a Diesel error to a crate error.
///
/// A lost connection is reported as [`Error::RelationalUnavailable`], which
/// callers treat as an infrastructure fault rather than a bad request.
pub fn public_error_from_diesel(error: DieselError) -> Error {
    match error {
        DieselError::DatabaseError(
            kind @ (DieselErrorKind::ClosedConnection
            | DieselErrorKind::UnableToSendCommand),
            info,
        ) => Error::RelationalUnavailable {
            message: format_database_error(kind, &*info),
        },
        DieselError::DatabaseError(kind, info) => Error::Internal {
            message: format_database_error(kind, &*info),
        },
        error => Error::Internal {
            message: format!("unexpected database error: {:#}", error),
        },
    }
}

/// Converts a failure to check out a pooled connection.
pub fn public_error_from_pool(error: bb8::RunError<ConnectionError>) -> Error {
    match error {
        bb8::RunError::User(error) => Error::RelationalUnavailable {
            message: format!("failed to access connection pool: {error}"),
        },
        bb8::RunError::TimedOut => Error::RelationalUnavailable {
            message: "timed out waiting for a database connection".to_string(),
        },
    }
}
