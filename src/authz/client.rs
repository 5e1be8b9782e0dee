// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed façade over the remote authorization store

use super::ObjectRef;
use super::Permission;
use super::RelationStore;
use super::RelationStoreError;
use super::RelationTuple;
use super::ResourceType;
use super::WriteConfirmation;
use crate::backoff::retry_notify;
use crate::backoff::BackoffError;
use crate::backoff::Deadline;
use crate::backoff::RetryPolicy;
use crate::Error;
use futures::Future;
use slog::debug;
use slog::o;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Result of evaluating one permission on one resource
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckOutcome {
    Allowed,
    Denied,
    /// The store could not give an answer.  Treated as [`CheckOutcome::Denied`]
    /// by every reader.
    Indeterminate,
}

/// Outcome of a [`AuthorizationClient::batch_check()`] for every resource that
/// was asked about
#[derive(Clone, Debug, Default)]
pub struct BatchCheckResult {
    outcomes: BTreeMap<ObjectRef, CheckOutcome>,
}

impl BatchCheckResult {
    /// A result in which every one of `resources` is indeterminate
    pub fn indeterminate<'a>(
        resources: impl IntoIterator<Item = &'a ObjectRef>,
    ) -> BatchCheckResult {
        BatchCheckResult {
            outcomes: resources
                .into_iter()
                .map(|r| (r.clone(), CheckOutcome::Indeterminate))
                .collect(),
        }
    }

    pub fn outcome(&self, resource: &ObjectRef) -> CheckOutcome {
        self.outcomes
            .get(resource)
            .copied()
            .unwrap_or(CheckOutcome::Indeterminate)
    }

    /// Only an explicit "allowed" answer counts.
    pub fn is_allowed(&self, resource: &ObjectRef) -> bool {
        self.outcome(resource) == CheckOutcome::Allowed
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectRef, CheckOutcome)> {
        self.outcomes.iter().map(|(r, o)| (r, *o))
    }
}

/// Client for the authorization store.
///
/// Every call is bounded by the per-attempt budget of the [`RetryPolicy`]
/// and, if one was attached with [`AuthorizationClient::with_deadline()`], by
/// the caller's deadline.  Unavailability is retried with bounded exponential
/// backoff and then reported as [`Error::AuthorizationUnavailable`]; a
/// rejection is reported right away as [`Error::AuthorizationRejected`].
///
/// The client is cheap to clone and shares the underlying store.
#[derive(Clone)]
pub struct AuthorizationClient {
    log: Logger,
    store: Arc<dyn RelationStore>,
    policy: RetryPolicy,
    max_batch_check: usize,
    deadline: Option<Deadline>,
}

impl AuthorizationClient {
    pub fn new(
        log: &Logger,
        store: Arc<dyn RelationStore>,
        policy: RetryPolicy,
        max_batch_check: usize,
    ) -> AuthorizationClient {
        AuthorizationClient {
            log: log.new(o!("component" => "AuthorizationClient")),
            store,
            policy,
            max_batch_check: max_batch_check.max(1),
            deadline: None,
        }
    }

    /// Returns a client whose calls also stop at `deadline`.
    pub fn with_deadline(&self, deadline: Deadline) -> AuthorizationClient {
        AuthorizationClient { deadline: Some(deadline), ..self.clone() }
    }

    /// Whether `subject` has `permission` on `resource`
    pub async fn check(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resource: &ObjectRef,
    ) -> Result<bool, Error> {
        let store = &self.store;
        self.call("check", || store.check_permission(subject, permission, resource))
            .await
    }

    /// Evaluate `permission` for `subject` on each of `resources`.
    ///
    /// Every input resource has an entry in the result.  Anything the store
    /// did not answer for, including every resource of a chunk whose call
    /// failed, is [`CheckOutcome::Indeterminate`].
    pub async fn batch_check(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resources: &[ObjectRef],
    ) -> BatchCheckResult {
        let mut result = BatchCheckResult::indeterminate(resources);
        let requested: BTreeSet<&ObjectRef> = resources.iter().collect();

        for chunk in resources.chunks(self.max_batch_check) {
            let store = &self.store;
            let answers = match self
                .call("batch_check", || {
                    store.check_bulk_permissions(subject, permission, chunk)
                })
                .await
            {
                Ok(answers) => answers,
                Err(error) => {
                    warn!(self.log, "leaving chunk indeterminate";
                        "resources" => chunk.len(),
                        "first" => chunk.first().map(|r| r.to_string()),
                        "error" => InlineErrorChain::new(&error),
                    );
                    continue;
                }
            };

            for (resource, allowed) in answers {
                // Ignore anything we didn't ask about.
                if !requested.contains(&resource) {
                    continue;
                }
                let outcome = if allowed {
                    CheckOutcome::Allowed
                } else {
                    CheckOutcome::Denied
                };
                result.outcomes.insert(resource, outcome);
            }
        }

        result
    }

    /// Idempotently write `tuples` to the store.
    pub async fn write_tuples(
        &self,
        tuples: &[RelationTuple],
    ) -> Result<WriteConfirmation, Error> {
        if tuples.is_empty() {
            return Ok(WriteConfirmation { tuples: 0, written_at: None });
        }
        let store = &self.store;
        self.call("write_tuples", || store.write_relationships(tuples)).await
    }

    /// Ids of every object of `resource_type` that `subject` has `permission`
    /// on
    pub async fn lookup_resources(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resource_type: ResourceType,
    ) -> Result<BTreeSet<String>, Error> {
        let store = &self.store;
        let ids = self
            .call("lookup_resources", || {
                store.lookup_resources(subject, permission, resource_type)
            })
            .await?;
        Ok(ids.into_iter().collect())
    }

    async fn call<'a, T, F, Fut>(
        &'a self,
        operation: &'static str,
        store_call: F,
    ) -> Result<T, Error>
    where
        F: Fn() -> Fut + 'a,
        Fut: Future<Output = Result<T, RelationStoreError>> + 'a,
    {
        let policy = &self.policy;
        let deadline = self.deadline.as_ref();
        let store_call = &store_call;

        let attempt = move || async move {
            let Some(budget) = policy.attempt_budget(deadline) else {
                return Err(BackoffError::permanent(
                    RelationStoreError::unavailable("request deadline passed"),
                ));
            };
            match tokio::time::timeout(budget, store_call()).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(error @ RelationStoreError::Unavailable { .. })) => {
                    Err(BackoffError::transient(error))
                }
                Ok(Err(error @ RelationStoreError::Rejected { .. })) => {
                    Err(BackoffError::permanent(error))
                }
                Err(_) => Err(BackoffError::transient(
                    RelationStoreError::unavailable(format!(
                        "no response within {budget:?}"
                    )),
                )),
            }
        };
        let log_failure = |error: RelationStoreError, delay: Duration| {
            warn!(
                self.log,
                "authorization store call failed";
                "operation" => operation,
                "retry_after" => ?delay,
                &error,
            );
        };

        let result =
            retry_notify(policy.backoff(deadline), attempt, log_failure).await;
        match result {
            Ok(value) => {
                debug!(self.log, "authorization store call"; "operation" => operation);
                Ok(value)
            }
            Err(RelationStoreError::Unavailable { message }) => {
                Err(Error::AuthorizationUnavailable {
                    message: format!("{operation}: {message}"),
                })
            }
            Err(RelationStoreError::Rejected { message }) => {
                Err(Error::AuthorizationRejected {
                    message: format!("{operation}: {message}"),
                })
            }
        }
    }
}
