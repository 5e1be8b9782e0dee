// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The capability we need from the remote authorization store

use super::ObjectRef;
use super::Permission;
use super::RelationTuple;
use super::ResourceType;
use async_trait::async_trait;
use slog_error_chain::SlogInlineError;
use thiserror::Error;

#[derive(Clone, Debug, Error, SlogInlineError)]
pub enum RelationStoreError {
    /// The store could not be reached, timed out, or is overloaded.  Worth
    /// retrying.
    #[error("authorization store unavailable: {message}")]
    Unavailable { message: String },
    /// The store refused the request.  Retrying won't help.
    #[error("authorization store rejected request: {message}")]
    Rejected { message: String },
}

impl RelationStoreError {
    pub fn unavailable(message: impl ToString) -> RelationStoreError {
        RelationStoreError::Unavailable { message: message.to_string() }
    }

    pub fn rejected(message: impl ToString) -> RelationStoreError {
        RelationStoreError::Rejected { message: message.to_string() }
    }
}

/// Acknowledgement of a tuple write
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WriteConfirmation {
    /// Number of tuples the store confirmed (new or already present)
    pub tuples: usize,
    /// Store revision token at which the write became visible, if the store
    /// reports one
    pub written_at: Option<String>,
}

/// A relation-tuple graph service.
///
/// Writes have set semantics: writing a tuple that is already present
/// succeeds and changes nothing.  Everything else about retries and timeouts
/// is left to [`super::AuthorizationClient`].
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Whether `subject` has `permission` on `resource`
    async fn check_permission(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resource: &ObjectRef,
    ) -> Result<bool, RelationStoreError>;

    /// Evaluate `permission` for `subject` on each of `resources` in one
    /// round trip.  Resources the store says nothing about may be absent from
    /// the output.
    async fn check_bulk_permissions(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resources: &[ObjectRef],
    ) -> Result<Vec<(ObjectRef, bool)>, RelationStoreError>;

    /// Idempotently write `tuples`.
    async fn write_relationships(
        &self,
        tuples: &[RelationTuple],
    ) -> Result<WriteConfirmation, RelationStoreError>;

    /// Ids of every object of `resource_type` on which `subject` has
    /// `permission`
    async fn lookup_resources(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resource_type: ResourceType,
    ) -> Result<Vec<String>, RelationStoreError>;
}
