// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Migration of relational ownership facts into the authorization store
//!
//! A run walks a source table in ascending primary-key order, one page at a
//! time.  Each row is converted into relation tuples with
//! [`tuples_for_record()`] and the tuples of a page are written to the
//! authorization store in batches, with a bounded number of batches in
//! flight.  Tuple writes are set-semantic, so writing a tuple twice is
//! harmless and any run can be repeated.
//!
//! Failures are handled by scope:
//!
//! * a malformed row is logged, counted and skipped
//! * a batch the store rejects is logged and counted; its rows stay unsynced
//!   and the run moves on
//! * an unreachable store (either one) ends the run with an error
//!
//! Packages track their progress in the `synced` column: rows whose tuples
//! were confirmed are flagged in one bulk update per page, and the next run
//! only looks at rows still unflagged.  If that update fails the tuples are
//! already in place; the next run re-writes them (a no-op) and sets the
//! flag.  Systems have no such column, so their progress is kept in a
//! checkpoint row instead.

use crate::authz::tuples_for_record;
use crate::authz::AuthorizationClient;
use crate::authz::OwnershipRecord;
use crate::authz::RelationTuple;
use crate::content::ContentStore;
use crate::db::model::System;
use crate::db::pagination::DataPageParams;
use crate::Error;
use futures::stream;
use futures::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use slog::info;
use slog::o;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use std::collections::BTreeSet;
use std::num::NonZeroU32;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Name of the checkpoint row for the hosts and systems migration
pub const HOSTS_AND_SYSTEMS_CHECKPOINT: &str = "hosts_and_systems";

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MigrationConfig {
    /// Rows read from the relational store per page
    #[serde(default = "default_page_size")]
    pub page_size: NonZeroU32,
    /// Records whose tuples are written in one call
    #[serde(default = "default_write_batch_size")]
    pub write_batch_size: NonZeroUsize,
    /// Maximum number of write calls in flight
    #[serde(default = "default_write_workers")]
    pub write_workers: NonZeroUsize,
}

fn default_page_size() -> NonZeroU32 {
    NonZeroU32::new(500).unwrap()
}

fn default_write_batch_size() -> NonZeroUsize {
    NonZeroUsize::new(100).unwrap()
}

fn default_write_workers() -> NonZeroUsize {
    NonZeroUsize::new(4).unwrap()
}

impl Default for MigrationConfig {
    fn default() -> Self {
        MigrationConfig {
            page_size: default_page_size(),
            write_batch_size: default_write_batch_size(),
            write_workers: default_write_workers(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MigrationOptions {
    /// Ignore any saved checkpoint and start from the first row.
    pub restart: bool,
}

/// What one migration run did
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct MigrationSummary {
    /// Source table
    pub table: &'static str,
    pub pages: usize,
    pub records_seen: usize,
    pub tuples_written: usize,
    /// Records whose tuples the store confirmed
    pub records_migrated: usize,
    pub malformed: usize,
    /// Records in batches the store rejected
    pub failed_records: usize,
    /// Records whose tuples were written but whose synced flag could not be
    /// set
    pub flag_update_failures: usize,
    /// Records left to migrate at the end of the run
    pub unsynced_remaining: u64,
}

impl MigrationSummary {
    fn new(table: &'static str) -> MigrationSummary {
        MigrationSummary { table, ..Default::default() }
    }
}

/// Result of writing one page of records
struct PageOutcome {
    /// Ids of records whose tuples were confirmed, ascending
    migrated: Vec<i64>,
    /// Set if the authorization store became unreachable
    aborted: Option<Error>,
}

pub struct MigrationEngine {
    log: Logger,
    content: Arc<dyn ContentStore>,
    authz: AuthorizationClient,
    config: MigrationConfig,
}

impl MigrationEngine {
    pub fn new(
        log: &Logger,
        content: Arc<dyn ContentStore>,
        authz: AuthorizationClient,
        config: MigrationConfig,
    ) -> MigrationEngine {
        MigrationEngine {
            log: log.new(o!("component" => "MigrationEngine")),
            content,
            authz,
            config,
        }
    }

    /// Migrate the system -> organization ownership of every system.
    ///
    /// Resumes after the saved checkpoint unless `options.restart` is set.
    pub async fn migrate_hosts_and_systems(
        &self,
        options: MigrationOptions,
    ) -> Result<MigrationSummary, Error> {
        let log = self.log.new(o!("table" => "system"));
        let mut summary = MigrationSummary::new(HOSTS_AND_SYSTEMS_CHECKPOINT);

        let resume_after = if options.restart {
            None
        } else {
            self.content
                .checkpoint_get(HOSTS_AND_SYSTEMS_CHECKPOINT)
                .await
                .map_err(|e| self.aborted(&log, &summary, e))?
        };
        info!(log, "migrating hosts and systems"; "resume_after" => ?resume_after);

        let mut pagparams = DataPageParams {
            marker: resume_after,
            limit: self.config.page_size,
        };
        let mut checkpoint_held = false;
        loop {
            let systems = self
                .content
                .systems_list_page(&pagparams)
                .await
                .map_err(|e| self.aborted(&log, &summary, e))?;
            let Some(last_id) = systems.last().map(|s| s.id) else {
                break;
            };
            summary.pages += 1;
            summary.records_seen += systems.len();

            let records: Vec<_> =
                systems.iter().map(System::ownership_record).collect();
            let outcome = self.write_page(&log, &records, &mut summary).await;
            summary.records_migrated += outcome.migrated.len();
            if let Some(error) = outcome.aborted {
                return Err(self.aborted(&log, &summary, error));
            }

            // Once a row has failed or was malformed, later pages must not
            // move the checkpoint past it, so a resumed run picks it up.
            checkpoint_held |=
                summary.failed_records > 0 || summary.malformed > 0;
            if !checkpoint_held {
                self.content
                    .checkpoint_set(HOSTS_AND_SYSTEMS_CHECKPOINT, last_id)
                    .await
                    .map_err(|e| self.aborted(&log, &summary, e))?;
            }
            info!(log, "migrated page";
                "last_id" => last_id,
                "records" => systems.len(),
                "checkpoint_held" => checkpoint_held,
            );

            if systems.len() < self.page_len() {
                break;
            }
            pagparams = pagparams.next_page(last_id);
        }

        summary.unsynced_remaining =
            (summary.failed_records + summary.malformed) as u64;
        self.finish(&log, summary)
    }

    /// Migrate the package -> system ownership of every unsynced package,
    /// flagging each package whose tuples are confirmed.
    pub async fn migrate_packages(&self) -> Result<MigrationSummary, Error> {
        let log = self.log.new(o!("table" => "package"));
        let mut summary = MigrationSummary::new("packages");
        info!(log, "migrating packages");

        let mut pagparams = DataPageParams::first_page(self.config.page_size);
        loop {
            let packages = self
                .content
                .packages_list_unsynced_page(&pagparams)
                .await
                .map_err(|e| self.aborted(&log, &summary, e))?;
            let Some(last_id) = packages.last().map(|p| p.package.id) else {
                break;
            };
            summary.pages += 1;
            summary.records_seen += packages.len();

            let records: Vec<_> =
                packages.iter().map(|p| p.ownership_record()).collect();
            let outcome = self.write_page(&log, &records, &mut summary).await;

            if !outcome.migrated.is_empty() {
                match self.content.packages_mark_synced(&outcome.migrated).await
                {
                    Ok(_) => summary.records_migrated += outcome.migrated.len(),
                    Err(error) => {
                        warn!(log, "failed to mark packages synced";
                            "records" => outcome.migrated.len(),
                            &error,
                        );
                        summary.flag_update_failures += outcome.migrated.len();
                    }
                }
            }
            if let Some(error) = outcome.aborted {
                return Err(self.aborted(&log, &summary, error));
            }
            info!(log, "migrated page";
                "last_id" => last_id,
                "records" => packages.len(),
            );

            if packages.len() < self.page_len() {
                break;
            }
            pagparams = pagparams.next_page(last_id);
        }

        summary.unsynced_remaining = self
            .content
            .packages_count_unsynced()
            .await
            .map_err(|e| self.aborted(&log, &summary, e))?;
        self.finish(&log, summary)
    }

    /// Run the hosts and systems migration, then the packages migration.
    ///
    /// A partial failure of the first does not stop the second.
    pub async fn migrate_all(
        &self,
        options: MigrationOptions,
    ) -> Result<Vec<MigrationSummary>, Error> {
        let hosts = match self.migrate_hosts_and_systems(options).await {
            Ok(summary) => Ok(summary),
            Err(Error::PartialMigrationFailure(summary)) => Err(summary),
            Err(error) => return Err(error),
        };
        let packages = self.migrate_packages().await?;
        match hosts {
            Ok(hosts) => Ok(vec![hosts, packages]),
            Err(hosts) => Err(Error::PartialMigrationFailure(hosts)),
        }
    }

    fn page_len(&self) -> usize {
        self.config.page_size.get() as usize
    }

    /// Convert `records` and write their tuples in batches.
    async fn write_page(
        &self,
        log: &Logger,
        records: &[OwnershipRecord],
        summary: &mut MigrationSummary,
    ) -> PageOutcome {
        let mut convertible = Vec::with_capacity(records.len());
        for record in records {
            match tuples_for_record(record) {
                Ok(tuples) => convertible.push((record.id(), tuples)),
                Err(error) => {
                    warn!(log, "skipping malformed record";
                        "kind" => %error.kind,
                        "id" => error.id,
                        "error" => InlineErrorChain::new(&error),
                    );
                    summary.malformed += 1;
                }
            }
        }

        let batches = convertible.chunks(self.config.write_batch_size.get());
        let results: Vec<_> = stream::iter(batches.map(|batch| async move {
            let ids: Vec<i64> = batch.iter().map(|(id, _)| *id).collect();
            let tuples: Vec<RelationTuple> = batch
                .iter()
                .flat_map(|(_, tuples)| tuples.iter().cloned())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let result = self.authz.write_tuples(&tuples).await;
            (ids, tuples.len(), result)
        }))
        .buffer_unordered(self.config.write_workers.get())
        .collect()
        .await;

        let mut outcome = PageOutcome { migrated: Vec::new(), aborted: None };
        for (ids, ntuples, result) in results {
            match result {
                Ok(_) => {
                    summary.tuples_written += ntuples;
                    outcome.migrated.extend(ids);
                }
                Err(error) if error.is_connectivity() => {
                    summary.failed_records += ids.len();
                    outcome.aborted.get_or_insert(error);
                }
                Err(error) => {
                    warn!(log, "tuple batch rejected";
                        "first_id" => ids.first().copied(),
                        "records" => ids.len(),
                        &error,
                    );
                    summary.failed_records += ids.len();
                }
            }
        }
        outcome.migrated.sort_unstable();
        outcome
    }

    fn finish(
        &self,
        log: &Logger,
        summary: MigrationSummary,
    ) -> Result<MigrationSummary, Error> {
        info!(log, "migration finished"; "summary" => ?summary);
        if summary.unsynced_remaining > 0 {
            Err(Error::PartialMigrationFailure(summary))
        } else {
            Ok(summary)
        }
    }

    fn aborted(
        &self,
        log: &Logger,
        summary: &MigrationSummary,
        error: Error,
    ) -> Error {
        warn!(log, "migration aborted"; "summary" => ?summary, &error);
        error
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::authz::ObjectRef;
    use crate::authz::Permission;
    use crate::authz::Relation;
    use crate::db::model::Package;
    use crate::sim::SimContentStore;
    use crate::sim::SimRelationStore;
    use crate::test_util::fast_retry_policy;
    use crate::test_util::test_setup_log;
    use assert_matches::assert_matches;

    fn package(id: i64, system_id: Option<i64>) -> Package {
        Package {
            id,
            name_id: 123,
            evra: "1-2".to_string(),
            description_hash: "Testing".to_string(),
            summary_hash: "FooBar".to_string(),
            advisory_id: 321,
            synced: false,
            system_id,
        }
    }

    fn config(page_size: u32, write_batch_size: usize) -> MigrationConfig {
        MigrationConfig {
            page_size: NonZeroU32::new(page_size).unwrap(),
            write_batch_size: NonZeroUsize::new(write_batch_size).unwrap(),
            write_workers: NonZeroUsize::new(2).unwrap(),
        }
    }

    struct Harness {
        content: Arc<SimContentStore>,
        relations: Arc<SimRelationStore>,
        engine: MigrationEngine,
    }

    impl Harness {
        fn new(log: &Logger, config: MigrationConfig) -> Harness {
            let content = Arc::new(SimContentStore::new());
            let relations = Arc::new(SimRelationStore::new());
            let authz = AuthorizationClient::new(
                log,
                relations.clone(),
                fast_retry_policy(),
                100,
            );
            let engine =
                MigrationEngine::new(log, content.clone(), authz, config);
            Harness { content, relations, engine }
        }

        async fn can_view(&self, user: &str, resource: ObjectRef) -> bool {
            crate::authz::RelationStore::check_permission(
                &*self.relations,
                &ObjectRef::user(user),
                Permission::View,
                &resource,
            )
            .await
            .unwrap()
        }
    }

    #[tokio::test]
    async fn test_package_becomes_visible_after_migration() {
        let logctx = test_setup_log("test_package_becomes_visible_after_migration");
        let harness = Harness::new(&logctx.log, config(10, 10));
        harness.content.insert_system(1, Some(1));
        harness.content.insert_package(package(1, Some(1)));
        harness.relations.insert_tuples([RelationTuple::new(
            ObjectRef::organization(1),
            Relation::Viewer,
            ObjectRef::user("alice"),
        )]);

        assert!(!harness.can_view("alice", ObjectRef::package(1)).await);

        let summary = harness.engine.migrate_packages().await.unwrap();
        assert_eq!(summary.records_migrated, 1);
        assert_eq!(summary.tuples_written, 2);
        assert_eq!(summary.unsynced_remaining, 0);
        assert!(harness.content.package(1).unwrap().synced);
        assert!(harness.can_view("alice", ObjectRef::package(1)).await);
        assert!(!harness.can_view("bob", ObjectRef::package(1)).await);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_malformed_record_is_skipped() {
        let logctx = test_setup_log("test_malformed_record_is_skipped");
        let harness = Harness::new(&logctx.log, config(10, 10));
        harness.content.insert_system(1, Some(1));
        harness.content.insert_package(package(1, Some(1)));
        harness.content.insert_package(package(2, None));
        harness.content.insert_package(package(3, Some(1)));

        let error = harness.engine.migrate_packages().await.unwrap_err();
        let summary = assert_matches!(
            error,
            Error::PartialMigrationFailure(summary) => summary
        );
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.records_migrated, 2);
        assert_eq!(summary.unsynced_remaining, 1);
        assert_eq!(harness.content.synced_package_ids(), vec![1, 3]);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_migration_is_idempotent() {
        let logctx = test_setup_log("test_migration_is_idempotent");
        let harness = Harness::new(&logctx.log, config(2, 1));
        for id in 1..=3 {
            harness.content.insert_system(id, Some(10 + id));
        }
        for id in 1..=5 {
            harness.content.insert_package(package(id, Some(id % 3 + 1)));
        }

        harness.engine.migrate_packages().await.unwrap();
        let tuples = harness.relations.tuples();
        let synced = harness.content.synced_package_ids();
        assert_eq!(synced, vec![1, 2, 3, 4, 5]);

        let summary = harness.engine.migrate_packages().await.unwrap();
        assert_eq!(summary.records_seen, 0);
        assert_eq!(harness.relations.tuples(), tuples);
        assert_eq!(harness.content.synced_package_ids(), synced);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_interrupted_migration_resumes() {
        let logctx = test_setup_log("test_interrupted_migration_resumes");
        let interrupted = Harness::new(&logctx.log, config(2, 1));
        let uninterrupted = Harness::new(&logctx.log, config(2, 1));
        for harness in [&interrupted, &uninterrupted] {
            for id in 1..=5 {
                harness.content.insert_system(id, Some(100));
            }
        }

        // Fail after the first page.
        interrupted.content.fail_page_fetches_after(Some(1));
        let error = interrupted
            .engine
            .migrate_hosts_and_systems(MigrationOptions::default())
            .await
            .unwrap_err();
        assert_matches!(error, Error::RelationalUnavailable { .. });
        assert_eq!(
            interrupted.content.checkpoint(HOSTS_AND_SYSTEMS_CHECKPOINT),
            Some(2)
        );

        interrupted.content.fail_page_fetches_after(None);
        let summary = interrupted
            .engine
            .migrate_hosts_and_systems(MigrationOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.records_seen, 3);
        assert_eq!(summary.records_migrated, 3);

        uninterrupted
            .engine
            .migrate_hosts_and_systems(MigrationOptions::default())
            .await
            .unwrap();
        assert_eq!(interrupted.relations.tuples(), uninterrupted.relations.tuples());
        assert_eq!(
            interrupted.content.checkpoint(HOSTS_AND_SYSTEMS_CHECKPOINT),
            Some(5)
        );

        // A restart ignores the checkpoint.
        let summary = interrupted
            .engine
            .migrate_hosts_and_systems(MigrationOptions { restart: true })
            .await
            .unwrap();
        assert_eq!(summary.records_seen, 5);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_rejected_batch_holds_checkpoint() {
        let logctx = test_setup_log("test_rejected_batch_holds_checkpoint");
        let harness = Harness::new(&logctx.log, config(2, 1));
        for id in 1..=4 {
            harness.content.insert_system(id, Some(100));
        }
        harness.relations.reject_writes_for(ObjectRef::system(2));

        let error = harness
            .engine
            .migrate_hosts_and_systems(MigrationOptions::default())
            .await
            .unwrap_err();
        let summary = assert_matches!(
            error,
            Error::PartialMigrationFailure(summary) => summary
        );
        assert_eq!(summary.failed_records, 1);
        assert_eq!(summary.records_migrated, 3);
        assert_eq!(summary.unsynced_remaining, 1);
        assert_eq!(
            harness.content.checkpoint(HOSTS_AND_SYSTEMS_CHECKPOINT),
            None
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_repaired_system_is_migrated_on_resume() {
        let logctx =
            test_setup_log("test_repaired_system_is_migrated_on_resume");
        let harness = Harness::new(&logctx.log, config(10, 10));
        harness.content.insert_system(1, None);
        harness.content.insert_system(2, Some(1));

        let error = harness
            .engine
            .migrate_hosts_and_systems(MigrationOptions::default())
            .await
            .unwrap_err();
        let summary = assert_matches!(
            error,
            Error::PartialMigrationFailure(summary) => summary
        );
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.records_migrated, 1);
        assert_eq!(
            harness.content.checkpoint(HOSTS_AND_SYSTEMS_CHECKPOINT),
            None
        );

        harness.content.insert_system(1, Some(1));
        let summary = harness
            .engine
            .migrate_hosts_and_systems(MigrationOptions::default())
            .await
            .unwrap();
        assert_eq!(summary.records_seen, 2);
        assert_eq!(summary.malformed, 0);
        assert!(harness.relations.contains(&RelationTuple::new(
            ObjectRef::system(1),
            Relation::Organization,
            ObjectRef::organization(1),
        )));
        assert_eq!(
            harness.content.checkpoint(HOSTS_AND_SYSTEMS_CHECKPOINT),
            Some(2)
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_unavailable_store_aborts_run() {
        let logctx = test_setup_log("test_unavailable_store_aborts_run");
        let harness = Harness::new(&logctx.log, config(10, 10));
        harness.content.insert_system(1, Some(1));
        harness.content.insert_package(package(1, Some(1)));
        harness.relations.set_unavailable(true);

        let error = harness.engine.migrate_packages().await.unwrap_err();
        assert_matches!(error, Error::AuthorizationUnavailable { .. });
        assert!(harness.content.synced_package_ids().is_empty());
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_failed_flag_update_heals_on_next_run() {
        let logctx = test_setup_log("test_failed_flag_update_heals_on_next_run");
        let harness = Harness::new(&logctx.log, config(10, 10));
        harness.content.insert_system(1, Some(1));
        harness.content.insert_package(package(1, Some(1)));
        harness.content.insert_package(package(2, Some(1)));
        harness.content.fail_mark_synced(1);

        let error = harness.engine.migrate_packages().await.unwrap_err();
        let summary = assert_matches!(
            error,
            Error::PartialMigrationFailure(summary) => summary
        );
        assert_eq!(summary.flag_update_failures, 2);
        assert_eq!(summary.unsynced_remaining, 2);
        let tuples = harness.relations.tuples();
        assert!(tuples.contains(&RelationTuple::new(
            ObjectRef::package(1),
            Relation::System,
            ObjectRef::system(1),
        )));

        let summary = harness.engine.migrate_packages().await.unwrap();
        assert_eq!(summary.records_migrated, 2);
        assert_eq!(harness.content.synced_package_ids(), vec![1, 2]);
        assert_eq!(harness.relations.tuples(), tuples);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_migrate_all() {
        let logctx = test_setup_log("test_migrate_all");
        let harness = Harness::new(&logctx.log, config(10, 10));
        harness.content.insert_system(1, Some(1));
        harness.content.insert_system(2, Some(2));
        harness.content.insert_package(package(1, Some(1)));

        let summaries = harness
            .engine
            .migrate_all(MigrationOptions::default())
            .await
            .unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].records_migrated, 2);
        assert_eq!(summaries[1].records_migrated, 1);
        assert!(harness.relations.contains(&RelationTuple::new(
            ObjectRef::system(2),
            Relation::Organization,
            ObjectRef::organization(2),
        )));
        logctx.cleanup_successful();
    }
}
