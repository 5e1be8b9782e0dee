// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared integration testing facilities

use dropshot::test_util::LogContext;
use dropshot::ConfigDropshot;
use dropshot::HttpServer;
use inventory_access::authz::AuthorizationClient;
use inventory_access::authz::ObjectRef;
use inventory_access::authz::Relation;
use inventory_access::authz::RelationTuple;
use inventory_access::db::model::Package;
use inventory_access::migration::MigrationConfig;
use inventory_access::migration::MigrationEngine;
use inventory_access::query::QueryConfig;
use inventory_access::query::QueryFilterCoordinator;
use inventory_access::sim::SimContentStore;
use inventory_access::sim::SimRelationStore;
use inventory_access::test_util::fast_retry_policy;
use inventory_access::test_util::test_setup_log;
use inventory_access::views::PackageView;
use inventory_access::ServerContext;
use reqwest::StatusCode;
use std::sync::Arc;

/// A running content API backed by simulated stores
pub struct TestContext {
    pub content: Arc<SimContentStore>,
    pub relations: Arc<SimRelationStore>,
    pub authz: AuthorizationClient,
    pub server: HttpServer<Arc<ServerContext>>,
    pub client: reqwest::Client,
    pub logctx: LogContext,
}

impl TestContext {
    pub async fn new(test_name: &str) -> TestContext {
        let logctx = test_setup_log(test_name);
        let log = &logctx.log;
        let content = Arc::new(SimContentStore::new());
        let relations = Arc::new(SimRelationStore::new());
        let authz = AuthorizationClient::new(
            log,
            relations.clone(),
            fast_retry_policy(),
            50,
        );
        let coordinator = QueryFilterCoordinator::new(
            log,
            authz.clone(),
            content.clone(),
            QueryConfig::default(),
        );
        let dropshot_config = ConfigDropshot {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            ..Default::default()
        };
        let server =
            inventory_access::start_server(log, &dropshot_config, coordinator)
                .unwrap();
        TestContext {
            content,
            relations,
            authz,
            server,
            client: reqwest::Client::new(),
            logctx,
        }
    }

    pub fn migration_engine(&self) -> MigrationEngine {
        MigrationEngine::new(
            &self.logctx.log,
            self.content.clone(),
            self.authz.clone(),
            MigrationConfig::default(),
        )
    }

    /// Let `user` view everything organization `organization_id` owns.
    pub fn grant_viewer(&self, organization_id: i64, user: &str) {
        self.relations.insert_tuples([RelationTuple::new(
            ObjectRef::organization(organization_id),
            Relation::Viewer,
            ObjectRef::user(user),
        )]);
    }

    /// GET `/content/packages` with `query` as `principal`.
    pub async fn list_packages(
        &self,
        principal: Option<&str>,
        query: &[(&str, &str)],
    ) -> reqwest::Response {
        let url =
            format!("http://{}/content/packages", self.server.local_addr());
        let mut request = self.client.get(url).query(query);
        if let Some(principal) = principal {
            request = request.header("x-principal", principal);
        }
        request.send().await.unwrap()
    }

    pub async fn list_packages_ok(
        &self,
        principal: &str,
        query: &[(&str, &str)],
    ) -> Vec<PackageView> {
        let response = self.list_packages(Some(principal), query).await;
        assert_eq!(response.status(), StatusCode::OK);
        response.json().await.unwrap()
    }

    pub async fn teardown(self) {
        self.server.close().await.unwrap();
        self.logctx.cleanup_successful();
    }
}

pub fn package(id: i64, name_id: i64, evra: &str, system_id: i64) -> Package {
    Package {
        id,
        name_id,
        evra: evra.to_string(),
        description_hash: "Testing".to_string(),
        summary_hash: "FooBar".to_string(),
        advisory_id: 321,
        synced: false,
        system_id: Some(system_id),
    }
}
