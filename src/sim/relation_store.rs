// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory relation-tuple graph

use crate::authz::ObjectRef;
use crate::authz::Permission;
use crate::authz::Relation;
use crate::authz::RelationStore;
use crate::authz::RelationStoreError;
use crate::authz::RelationTuple;
use crate::authz::ResourceType;
use crate::authz::WriteConfirmation;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration;

/// A [`RelationStore`] that keeps tuples in memory and evaluates the content
/// schema (`schema/content.zed`) by walking them.
///
/// Failures and latency can be injected to exercise the retry, timeout and
/// fail-closed paths.
#[derive(Default)]
pub struct SimRelationStore {
    inner: Mutex<SimState>,
}

#[derive(Default)]
struct SimState {
    tuples: BTreeSet<RelationTuple>,
    latency: Option<Duration>,
    transient_failures: usize,
    unavailable: bool,
    rejected_resources: BTreeSet<ObjectRef>,
    withheld_resources: BTreeSet<ObjectRef>,
    failing_checks: BTreeSet<ObjectRef>,
    calls: usize,
    write_calls: usize,
    revision: u64,
}

impl SimRelationStore {
    pub fn new() -> SimRelationStore {
        SimRelationStore::default()
    }

    /// Add tuples directly, bypassing failure injection.
    pub fn insert_tuples(&self, tuples: impl IntoIterator<Item = RelationTuple>) {
        self.inner.lock().unwrap().tuples.extend(tuples);
    }

    pub fn tuples(&self) -> BTreeSet<RelationTuple> {
        self.inner.lock().unwrap().tuples.clone()
    }

    pub fn contains(&self, tuple: &RelationTuple) -> bool {
        self.inner.lock().unwrap().tuples.contains(tuple)
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().unwrap().latency = Some(latency);
    }

    /// Make the next `count` calls fail as unavailable.
    pub fn fail_next_calls(&self, count: usize) {
        self.inner.lock().unwrap().transient_failures = count;
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().unavailable = unavailable;
    }

    /// Reject any write that includes a tuple on `resource`.
    pub fn reject_writes_for(&self, resource: ObjectRef) {
        self.inner.lock().unwrap().rejected_resources.insert(resource);
    }

    /// Leave `resource` out of bulk check answers.
    pub fn withhold_answers_for(&self, resource: ObjectRef) {
        self.inner.lock().unwrap().withheld_resources.insert(resource);
    }

    /// Fail, as unavailable, any bulk check that includes `resource`.
    pub fn fail_checks_for(&self, resource: ObjectRef) {
        self.inner.lock().unwrap().failing_checks.insert(resource);
    }

    /// Number of calls received, including failed ones
    pub fn calls(&self) -> usize {
        self.inner.lock().unwrap().calls
    }

    pub fn write_calls(&self) -> usize {
        self.inner.lock().unwrap().write_calls
    }

    async fn enter(&self, is_write: bool) -> Result<(), RelationStoreError> {
        let latency = {
            let mut state = self.inner.lock().unwrap();
            state.calls += 1;
            if is_write {
                state.write_calls += 1;
            }
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.inner.lock().unwrap();
        if state.unavailable {
            return Err(RelationStoreError::unavailable("simulated outage"));
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(RelationStoreError::unavailable(
                "simulated transient failure",
            ));
        }
        Ok(())
    }
}

impl SimState {
    fn can_view(&self, subject: &ObjectRef, resource: &ObjectRef) -> bool {
        match resource.resource_type {
            ResourceType::User => subject == resource,
            ResourceType::Organization => self.tuples.iter().any(|t| {
                t.resource == *resource
                    && matches!(t.relation, Relation::Viewer | Relation::Admin)
                    && t.subject == *subject
            }),
            ResourceType::System => self
                .targets(resource, Relation::Organization)
                .any(|org| self.can_view(subject, org)),
            ResourceType::Package => self
                .targets(resource, Relation::System)
                .any(|system| self.can_view(subject, system)),
        }
    }

    fn targets<'a>(
        &'a self,
        resource: &'a ObjectRef,
        relation: Relation,
    ) -> impl Iterator<Item = &'a ObjectRef> + 'a {
        self.tuples
            .iter()
            .filter(move |t| t.resource == *resource && t.relation == relation)
            .map(|t| &t.subject)
    }

    fn check(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resource: &ObjectRef,
    ) -> bool {
        match permission {
            Permission::View => self.can_view(subject, resource),
        }
    }
}

#[async_trait]
impl RelationStore for SimRelationStore {
    async fn check_permission(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resource: &ObjectRef,
    ) -> Result<bool, RelationStoreError> {
        self.enter(false).await?;
        Ok(self.inner.lock().unwrap().check(subject, permission, resource))
    }

    async fn check_bulk_permissions(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resources: &[ObjectRef],
    ) -> Result<Vec<(ObjectRef, bool)>, RelationStoreError> {
        self.enter(false).await?;
        let state = self.inner.lock().unwrap();
        if let Some(resource) =
            resources.iter().find(|r| state.failing_checks.contains(*r))
        {
            return Err(RelationStoreError::unavailable(format!(
                "simulated failure checking {resource}"
            )));
        }
        Ok(resources
            .iter()
            .filter(|r| !state.withheld_resources.contains(*r))
            .map(|r| (r.clone(), state.check(subject, permission, r)))
            .collect())
    }

    async fn write_relationships(
        &self,
        tuples: &[RelationTuple],
    ) -> Result<WriteConfirmation, RelationStoreError> {
        self.enter(true).await?;
        let mut state = self.inner.lock().unwrap();
        if let Some(bad) =
            tuples.iter().find(|t| state.rejected_resources.contains(&t.resource))
        {
            return Err(RelationStoreError::rejected(format!(
                "invalid relationship {bad}"
            )));
        }
        state.tuples.extend(tuples.iter().cloned());
        state.revision += 1;
        Ok(WriteConfirmation {
            tuples: tuples.len(),
            written_at: Some(state.revision.to_string()),
        })
    }

    async fn lookup_resources(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resource_type: ResourceType,
    ) -> Result<Vec<String>, RelationStoreError> {
        self.enter(false).await?;
        let state = self.inner.lock().unwrap();
        let candidates: BTreeSet<&ObjectRef> = state
            .tuples
            .iter()
            .flat_map(|t| [&t.resource, &t.subject])
            .filter(|o| o.resource_type == resource_type)
            .collect();
        Ok(candidates
            .into_iter()
            .filter(|o| state.check(subject, permission, o))
            .map(|o| o.id.clone())
            .collect())
    }
}
