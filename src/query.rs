// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Authorization-filtered content queries
//!
//! [`QueryFilterCoordinator`] answers "which packages matching this filter
//! can this principal see".  The relational store says which rows match; the
//! authorization store says which of those the principal may view.  A row is
//! returned only if the authorization store confirmed the permission.  If the
//! authorization store can't be reached, rows are left out (the request still
//! succeeds).  If the relational store can't be reached, the request fails.
//!
//! Two strategies are available and return the same rows for the same state:
//!
//! * pre-filter: ask the authorization store which systems the principal can
//!   view, query only packages reported by those systems, then bulk-check
//!   those packages.  A package whose own tuple is missing is not viewable
//!   even if its system is, and the `synced` flag is never taken as proof
//!   that the tuple exists.
//! * post-filter: query candidate packages page by page and bulk-check each
//!   page.  The check of one page overlaps the fetch of the next.

use crate::authz::AuthorizationClient;
use crate::authz::BatchCheckResult;
use crate::authz::CheckOutcome;
use crate::authz::ObjectRef;
use crate::authz::Permission;
use crate::authz::ResourceType;
use crate::backoff::Deadline;
use crate::content::ContentQuery;
use crate::content::ContentStore;
use crate::content::PackageFilter;
use crate::db::model::Package;
use crate::db::pagination::DataPageParams;
use crate::Error;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use serde_with::serde_as;
use serde_with::DurationMilliSeconds;
use slog::debug;
use slog::o;
use slog::warn;
use slog::Logger;
use std::num::NonZeroU32;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

/// How a content query is evaluated
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, JsonSchema, PartialEq, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QueryStrategy {
    /// Post-filter when a package name is given, pre-filter otherwise
    #[default]
    Auto,
    PreFilter,
    PostFilter,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct QueryConfig {
    #[serde(default)]
    pub default_strategy: QueryStrategy,
    /// Deadline for a whole request
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "request_timeout_ms", default = "default_request_timeout")]
    pub request_timeout: Duration,
    /// Rows fetched per relational round trip
    #[serde(default = "default_page_size")]
    pub page_size: NonZeroU32,
    /// Largest set of systems put into a single relational query
    #[serde(default = "default_max_scope_size")]
    pub max_scope_size: NonZeroUsize,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_page_size() -> NonZeroU32 {
    NonZeroU32::new(200).unwrap()
}

fn default_max_scope_size() -> NonZeroUsize {
    NonZeroUsize::new(1000).unwrap()
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig {
            default_strategy: QueryStrategy::Auto,
            request_timeout: default_request_timeout(),
            page_size: default_page_size(),
            max_scope_size: default_max_scope_size(),
        }
    }
}

/// The caller, as resolved upstream
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Principal {
    user_id: String,
}

impl Principal {
    /// Parse a principal given as `alice` or `user:alice`.
    pub fn parse(value: &str) -> Result<Principal, Error> {
        let user_id = value.trim();
        let user_id = user_id.strip_prefix("user:").unwrap_or(user_id);
        let valid_char = |c: char| {
            c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '|' | '-' | '=' | '+')
        };
        if user_id.is_empty()
            || user_id.len() > 128
            || !user_id.chars().all(valid_char)
        {
            return Err(Error::Unauthenticated {
                message: format!("invalid principal {value:?}"),
            });
        }
        Ok(Principal { user_id: user_id.to_string() })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn subject(&self) -> ObjectRef {
        ObjectRef::user(&self.user_id)
    }
}

#[derive(Clone, Debug, Default)]
pub struct PackageQuery {
    pub filter: PackageFilter,
    /// Overrides the configured default
    pub strategy: Option<QueryStrategy>,
}

pub struct QueryFilterCoordinator {
    log: Logger,
    authz: AuthorizationClient,
    content: Arc<dyn ContentStore>,
    config: QueryConfig,
}

impl QueryFilterCoordinator {
    pub fn new(
        log: &Logger,
        authz: AuthorizationClient,
        content: Arc<dyn ContentStore>,
        config: QueryConfig,
    ) -> QueryFilterCoordinator {
        QueryFilterCoordinator {
            log: log.new(o!("component" => "QueryFilterCoordinator")),
            authz,
            content,
            config,
        }
    }

    /// Strategy used for `query`, with `Auto` resolved
    pub fn strategy_for(&self, query: &PackageQuery) -> QueryStrategy {
        match query.strategy.unwrap_or(self.config.default_strategy) {
            QueryStrategy::Auto if query.filter.name.is_some() => {
                QueryStrategy::PostFilter
            }
            QueryStrategy::Auto => QueryStrategy::PreFilter,
            strategy => strategy,
        }
    }

    /// Packages matching `query` that `principal` can view, ordered by id
    pub async fn list_packages(
        &self,
        principal: &Principal,
        query: &PackageQuery,
    ) -> Result<Vec<Package>, Error> {
        let deadline = Deadline::after(self.config.request_timeout);
        let authz = self.authz.with_deadline(deadline);
        let strategy = self.strategy_for(query);
        let log = self.log.new(o!(
            "principal" => principal.user_id().to_string(),
            "strategy" => format!("{strategy:?}"),
        ));

        let work = async {
            match strategy {
                QueryStrategy::PreFilter => {
                    self.pre_filter(&log, &authz, principal, &query.filter).await
                }
                QueryStrategy::PostFilter => {
                    self.post_filter(&log, &authz, principal, &query.filter)
                        .await
                }
                QueryStrategy::Auto => unreachable!("strategy_for resolves Auto"),
            }
        };
        // Dropping `work` on expiry also drops any store calls in flight.
        tokio::time::timeout_at(deadline.at(), work).await.map_err(|_| {
            warn!(log, "content query timed out");
            Error::RequestTimedOut { timeout: deadline.budget() }
        })?
    }

    async fn pre_filter(
        &self,
        log: &Logger,
        authz: &AuthorizationClient,
        principal: &Principal,
        filter: &PackageFilter,
    ) -> Result<Vec<Package>, Error> {
        let system_ids = match authz
            .lookup_resources(
                &principal.subject(),
                Permission::View,
                ResourceType::System,
            )
            .await
        {
            Ok(ids) => ids,
            Err(error) => {
                warn!(log, "cannot resolve admissible systems, \
                    returning nothing"; &error);
                return Ok(Vec::new());
            }
        };

        let mut admissible: Vec<i64> = Vec::with_capacity(system_ids.len());
        for id in &system_ids {
            match id.parse() {
                Ok(id) => admissible.push(id),
                Err(_) => {
                    warn!(log, "ignoring unexpected system id"; "id" => id);
                }
            }
        }
        admissible.sort_unstable();

        let subject = principal.subject();
        let mut stats = FilterStats::default();
        let mut visible = Vec::new();
        for scope in admissible.chunks(self.config.max_scope_size.get()) {
            let query = ContentQuery {
                filter: filter.clone(),
                admissible_systems: Some(scope.to_vec()),
            };
            let candidates = self.fetch_all(&query).await?;
            let resources: Vec<ObjectRef> =
                candidates.iter().map(|p| ObjectRef::package(p.id)).collect();
            let checked =
                authz.batch_check(&subject, Permission::View, &resources).await;
            stats.keep_allowed(&checked, candidates, &mut visible);
        }
        visible.sort_by_key(|p| p.id);
        stats.log(log, "pre-filter query", visible.len());
        debug!(log, "pre-filter scope"; "admissible_systems" => admissible.len());
        Ok(visible)
    }

    async fn fetch_all(
        &self,
        query: &ContentQuery,
    ) -> Result<Vec<Package>, Error> {
        let mut pagparams = DataPageParams::first_page(self.config.page_size);
        let mut packages = Vec::new();
        loop {
            let page =
                self.content.content_packages_list(query, &pagparams).await?;
            let full = page.len() == self.page_len();
            let Some(last_id) = page.last().map(|p| p.package.id) else {
                break;
            };
            packages.extend(page.into_iter().map(|p| p.package));
            if !full {
                break;
            }
            pagparams = pagparams.next_page(last_id);
        }
        Ok(packages)
    }

    async fn post_filter(
        &self,
        log: &Logger,
        authz: &AuthorizationClient,
        principal: &Principal,
        filter: &PackageFilter,
    ) -> Result<Vec<Package>, Error> {
        let subject = principal.subject();
        let query = ContentQuery { filter: filter.clone(), admissible_systems: None };
        let mut pagparams = DataPageParams::first_page(self.config.page_size);
        let mut page = self.content.content_packages_list(&query, &pagparams).await?;

        let mut visible = Vec::new();
        let mut stats = FilterStats::default();
        while let Some(last_id) = page.last().map(|p| p.package.id) {
            let resources: Vec<ObjectRef> =
                page.iter().map(|p| ObjectRef::package(p.package.id)).collect();
            let full = page.len() == self.page_len();
            let next_pagparams = pagparams.next_page(last_id);

            let check = authz.batch_check(&subject, Permission::View, &resources);
            let fetch = async {
                if full {
                    self.content
                        .content_packages_list(&query, &next_pagparams)
                        .await
                } else {
                    Ok(Vec::new())
                }
            };
            let (checked, next_page) = futures::join!(check, fetch);
            stats.keep_allowed(
                &checked,
                page.into_iter().map(|row| row.package).collect(),
                &mut visible,
            );

            page = next_page?;
            pagparams = next_pagparams;
        }

        stats.log(log, "post-filter query", visible.len());
        Ok(visible)
    }

    fn page_len(&self) -> usize {
        self.config.page_size.get() as usize
    }
}

/// What happened to the candidate rows of one request
#[derive(Default)]
struct FilterStats {
    candidates: usize,
    denied: usize,
    indeterminate: usize,
}

impl FilterStats {
    /// Move the rows of `candidates` that `checked` allows into `visible`.
    fn keep_allowed(
        &mut self,
        checked: &BatchCheckResult,
        candidates: Vec<Package>,
        visible: &mut Vec<Package>,
    ) {
        self.candidates += candidates.len();
        for package in candidates {
            match checked.outcome(&ObjectRef::package(package.id)) {
                CheckOutcome::Allowed => visible.push(package),
                CheckOutcome::Denied => self.denied += 1,
                CheckOutcome::Indeterminate => self.indeterminate += 1,
            }
        }
    }

    fn log(&self, log: &Logger, message: &'static str, visible: usize) {
        debug!(log, "{}", message;
            "candidates" => self.candidates,
            "visible" => visible,
            "denied" => self.denied,
            "indeterminate" => self.indeterminate,
        );
        if self.indeterminate > 0 {
            warn!(log, "some rows left out with indeterminate permission";
                "indeterminate" => self.indeterminate);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::authz::Relation;
    use crate::authz::RelationTuple;
    use crate::backoff::RetryPolicy;
    use crate::migration::MigrationConfig;
    use crate::migration::MigrationEngine;
    use crate::migration::MigrationOptions;
    use crate::sim::SimContentStore;
    use crate::sim::SimRelationStore;
    use crate::test_util::fast_retry_policy;
    use crate::test_util::test_setup_log;
    use assert_matches::assert_matches;

    struct Harness {
        content: Arc<SimContentStore>,
        relations: Arc<SimRelationStore>,
        authz: AuthorizationClient,
        log: Logger,
    }

    fn package(id: i64, name_id: i64, system_id: i64) -> Package {
        Package {
            id,
            name_id,
            evra: format!("1-{id}"),
            description_hash: "Testing".to_string(),
            summary_hash: "FooBar".to_string(),
            advisory_id: 321,
            synced: false,
            system_id: Some(system_id),
        }
    }

    impl Harness {
        /// Organization 1 owns systems 1 and 2, organization 2 owns system 3.
        /// Alice views organization 1.  Everything is migrated.
        async fn new(log: &Logger, policy: RetryPolicy) -> Harness {
            let content = Arc::new(SimContentStore::new());
            let relations = Arc::new(SimRelationStore::new());
            content.insert_system(1, Some(1));
            content.insert_system(2, Some(1));
            content.insert_system(3, Some(2));
            content.insert_package_name(100, "kernel");
            content.insert_package_name(101, "bash");
            content.insert_package(package(1, 100, 1));
            content.insert_package(package(2, 101, 1));
            content.insert_package(package(3, 100, 2));
            content.insert_package(package(4, 100, 3));
            content.insert_package(package(5, 101, 2));
            content.insert_package(package(6, 101, 3));
            relations.insert_tuples([RelationTuple::new(
                ObjectRef::organization(1),
                Relation::Viewer,
                ObjectRef::user("alice"),
            )]);

            let authz =
                AuthorizationClient::new(log, relations.clone(), policy, 2);
            MigrationEngine::new(
                log,
                content.clone(),
                authz.clone(),
                MigrationConfig::default(),
            )
            .migrate_all(MigrationOptions::default())
            .await
            .unwrap();
            Harness { content, relations, authz, log: log.clone() }
        }

        fn coordinator(&self, config: QueryConfig) -> QueryFilterCoordinator {
            QueryFilterCoordinator::new(
                &self.log,
                self.authz.clone(),
                self.content.clone(),
                config,
            )
        }
    }

    fn small_pages() -> QueryConfig {
        QueryConfig {
            page_size: NonZeroU32::new(2).unwrap(),
            max_scope_size: NonZeroUsize::new(1).unwrap(),
            ..QueryConfig::default()
        }
    }

    async fn ids(
        coordinator: &QueryFilterCoordinator,
        user: &str,
        filter: PackageFilter,
        strategy: QueryStrategy,
    ) -> Result<Vec<i64>, Error> {
        let principal = Principal::parse(user).unwrap();
        let query = PackageQuery { filter, strategy: Some(strategy) };
        let packages = coordinator.list_packages(&principal, &query).await?;
        Ok(packages.into_iter().map(|p| p.id).collect())
    }

    #[tokio::test]
    async fn test_strategies_agree() {
        let logctx = test_setup_log("test_strategies_agree");
        let harness = Harness::new(&logctx.log, fast_retry_policy()).await;
        let coordinator = harness.coordinator(small_pages());

        let filters = [
            (PackageFilter::default(), vec![1, 2, 3, 5]),
            (
                PackageFilter { organization_id: Some(1), name: None },
                vec![1, 2, 3, 5],
            ),
            (PackageFilter { organization_id: Some(2), name: None }, vec![]),
            (
                PackageFilter {
                    organization_id: None,
                    name: Some("kernel".to_string()),
                },
                vec![1, 3],
            ),
            (
                PackageFilter {
                    organization_id: Some(1),
                    name: Some("bash".to_string()),
                },
                vec![2, 5],
            ),
        ];
        for (filter, expected) in filters {
            let pre = ids(&coordinator, "alice", filter.clone(), QueryStrategy::PreFilter)
                .await
                .unwrap();
            let post = ids(&coordinator, "alice", filter.clone(), QueryStrategy::PostFilter)
                .await
                .unwrap();
            assert_eq!(pre, expected, "pre-filter {filter:?}");
            assert_eq!(post, expected, "post-filter {filter:?}");
        }

        // Nobody granted bob anything.
        for strategy in [QueryStrategy::PreFilter, QueryStrategy::PostFilter] {
            let visible =
                ids(&coordinator, "user:bob", PackageFilter::default(), strategy)
                    .await
                    .unwrap();
            assert!(visible.is_empty());
        }
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_unmigrated_package_is_not_returned() {
        let logctx = test_setup_log("test_unmigrated_package_is_not_returned");
        let harness = Harness::new(&logctx.log, fast_retry_policy()).await;
        harness.content.insert_package(package(7, 100, 1));
        let coordinator = harness.coordinator(small_pages());

        for strategy in [QueryStrategy::PreFilter, QueryStrategy::PostFilter] {
            let visible =
                ids(&coordinator, "alice", PackageFilter::default(), strategy)
                    .await
                    .unwrap();
            assert_eq!(visible, vec![1, 2, 3, 5], "{strategy:?}");
        }
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_strategies_agree_when_flag_update_failed() {
        let logctx =
            test_setup_log("test_strategies_agree_when_flag_update_failed");
        let harness = Harness::new(&logctx.log, fast_retry_policy()).await;
        harness.content.insert_package(package(7, 100, 1));
        harness.content.fail_mark_synced(1);
        let error = MigrationEngine::new(
            &logctx.log,
            harness.content.clone(),
            harness.authz.clone(),
            MigrationConfig::default(),
        )
        .migrate_packages()
        .await
        .unwrap_err();
        assert_matches!(error, Error::PartialMigrationFailure(_));

        // The tuples for package 7 exist even though its flag is still unset.
        assert!(!harness.content.package(7).unwrap().synced);
        let coordinator = harness.coordinator(small_pages());
        for strategy in [QueryStrategy::PreFilter, QueryStrategy::PostFilter] {
            let visible =
                ids(&coordinator, "alice", PackageFilter::default(), strategy)
                    .await
                    .unwrap();
            assert_eq!(visible, vec![1, 2, 3, 5, 7], "{strategy:?}");
        }
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_unavailable_authz_fails_closed() {
        let logctx = test_setup_log("test_unavailable_authz_fails_closed");
        let harness = Harness::new(&logctx.log, fast_retry_policy()).await;
        harness.relations.set_unavailable(true);
        let coordinator = harness.coordinator(small_pages());

        for strategy in [QueryStrategy::PreFilter, QueryStrategy::PostFilter] {
            let visible =
                ids(&coordinator, "alice", PackageFilter::default(), strategy)
                    .await
                    .unwrap();
            assert!(visible.is_empty(), "{strategy:?}");
        }
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_indeterminate_rows_are_left_out() {
        let logctx = test_setup_log("test_indeterminate_rows_are_left_out");
        let harness = Harness::new(&logctx.log, fast_retry_policy()).await;
        harness.relations.withhold_answers_for(ObjectRef::package(3));
        let coordinator = harness.coordinator(small_pages());

        for strategy in [QueryStrategy::PreFilter, QueryStrategy::PostFilter] {
            let visible =
                ids(&coordinator, "alice", PackageFilter::default(), strategy)
                    .await
                    .unwrap();
            assert_eq!(visible, vec![1, 2, 5], "{strategy:?}");
        }
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_slow_authz_degrades_to_empty() {
        let logctx = test_setup_log("test_slow_authz_degrades_to_empty");
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(20),
            max_elapsed: Duration::from_millis(60),
            ..fast_retry_policy()
        };
        let harness = Harness::new(&logctx.log, policy).await;
        harness.relations.set_latency(Duration::from_secs(10));
        let coordinator = harness.coordinator(QueryConfig {
            request_timeout: Duration::from_secs(5),
            ..small_pages()
        });

        let started = std::time::Instant::now();
        for strategy in [QueryStrategy::PreFilter, QueryStrategy::PostFilter] {
            let visible =
                ids(&coordinator, "alice", PackageFilter::default(), strategy)
                    .await
                    .unwrap();
            assert!(visible.is_empty(), "{strategy:?}");
        }
        assert!(started.elapsed() < Duration::from_secs(5));
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_relational_failure_is_an_error() {
        let logctx = test_setup_log("test_relational_failure_is_an_error");
        let harness = Harness::new(&logctx.log, fast_retry_policy()).await;
        harness.content.set_unavailable(true);
        let coordinator = harness.coordinator(small_pages());

        for strategy in [QueryStrategy::PreFilter, QueryStrategy::PostFilter] {
            let error =
                ids(&coordinator, "alice", PackageFilter::default(), strategy)
                    .await
                    .unwrap_err();
            assert_matches!(error, Error::RelationalUnavailable { .. });
        }
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_request_deadline() {
        let logctx = test_setup_log("test_request_deadline");
        let harness = Harness::new(&logctx.log, fast_retry_policy()).await;
        harness.content.set_latency(Duration::from_secs(10));
        let coordinator = harness.coordinator(QueryConfig {
            request_timeout: Duration::from_millis(50),
            ..small_pages()
        });

        let error = ids(
            &coordinator,
            "alice",
            PackageFilter::default(),
            QueryStrategy::PostFilter,
        )
        .await
        .unwrap_err();
        assert_matches!(
            error,
            Error::RequestTimedOut { timeout }
                if timeout == Duration::from_millis(50)
        );
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn test_strategy_selection() {
        let logctx = test_setup_log("test_strategy_selection");
        let harness = Harness::new(&logctx.log, fast_retry_policy()).await;
        let coordinator = harness.coordinator(QueryConfig::default());

        let by_name = PackageQuery {
            filter: PackageFilter {
                organization_id: None,
                name: Some("kernel".to_string()),
            },
            strategy: None,
        };
        assert_eq!(coordinator.strategy_for(&by_name), QueryStrategy::PostFilter);
        let by_org = PackageQuery {
            filter: PackageFilter { organization_id: Some(1), name: None },
            strategy: None,
        };
        assert_eq!(coordinator.strategy_for(&by_org), QueryStrategy::PreFilter);
        let forced = PackageQuery {
            strategy: Some(QueryStrategy::PostFilter),
            ..by_org
        };
        assert_eq!(coordinator.strategy_for(&forced), QueryStrategy::PostFilter);
        logctx.cleanup_successful();
    }

    #[test]
    fn test_principal_parsing() {
        assert_eq!(Principal::parse("alice").unwrap().user_id(), "alice");
        assert_eq!(
            Principal::parse("user:alice").unwrap().subject(),
            ObjectRef::user("alice")
        );
        assert_matches!(
            Principal::parse(""),
            Err(Error::Unauthenticated { .. })
        );
        assert_matches!(
            Principal::parse("alice#admin"),
            Err(Error::Unauthenticated { .. })
        );
    }
}
