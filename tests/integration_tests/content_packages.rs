// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tests for the content package listing

use crate::common::package;
use crate::common::TestContext;
use inventory_access::migration::MigrationOptions;
use inventory_access::views::PackageView;
use reqwest::StatusCode;
use std::time::Duration;

const STRATEGIES: [&str; 3] = ["auto", "pre_filter", "post_filter"];

#[tokio::test]
async fn test_package_visible_after_migration() {
    let testctx = TestContext::new("test_package_visible_after_migration").await;
    testctx.content.insert_system(1, Some(1));
    testctx.content.insert_package_name(123, "kernel");
    testctx.content.insert_package(package(1, 123, "1-2", 1));
    testctx.grant_viewer(1, "alice");

    for strategy in STRATEGIES {
        let packages = testctx
            .list_packages_ok(
                "alice",
                &[("organization_id", "1"), ("strategy", strategy)],
            )
            .await;
        assert!(packages.is_empty(), "{strategy}: {packages:?}");
    }

    testctx.migration_engine().migrate_packages().await.unwrap();

    let expected = vec![PackageView {
        name_id: 123,
        evra: "1-2".to_string(),
        description_hash: "Testing".to_string(),
        summary_hash: "FooBar".to_string(),
        advisory_id: 321,
        synced: true,
    }];
    for strategy in STRATEGIES {
        let packages = testctx
            .list_packages_ok(
                "user:alice",
                &[("organization_id", "1"), ("strategy", strategy)],
            )
            .await;
        assert_eq!(packages, expected, "{strategy}");
    }

    // Someone outside the organization sees nothing.
    assert!(testctx.list_packages_ok("bob", &[]).await.is_empty());
    testctx.teardown().await;
}

#[tokio::test]
async fn test_filters_and_ordering() {
    let testctx = TestContext::new("test_filters_and_ordering").await;
    testctx.content.insert_system(1, Some(1));
    testctx.content.insert_system(2, Some(2));
    testctx.content.insert_package_name(100, "kernel");
    testctx.content.insert_package_name(101, "bash");
    testctx.content.insert_package(package(3, 100, "5.14-1", 1));
    testctx.content.insert_package(package(1, 101, "5.1-2", 1));
    testctx.content.insert_package(package(2, 100, "5.14-2", 2));
    testctx.content.insert_package(package(4, 100, "5.14-3", 1));
    testctx.grant_viewer(1, "alice");
    testctx.grant_viewer(2, "carol");
    testctx
        .migration_engine()
        .migrate_all(MigrationOptions::default())
        .await
        .unwrap();

    for strategy in STRATEGIES {
        let evras: Vec<String> = testctx
            .list_packages_ok("alice", &[("strategy", strategy)])
            .await
            .into_iter()
            .map(|p| p.evra)
            .collect();
        assert_eq!(evras, vec!["5.1-2", "5.14-1", "5.14-3"], "{strategy}");

        let kernels: Vec<String> = testctx
            .list_packages_ok("alice", &[("name", "kernel"), ("strategy", strategy)])
            .await
            .into_iter()
            .map(|p| p.evra)
            .collect();
        assert_eq!(kernels, vec!["5.14-1", "5.14-3"], "{strategy}");

        // alice can't see organization 2 even when asking for it
        let other = testctx
            .list_packages_ok(
                "alice",
                &[("organization_id", "2"), ("strategy", strategy)],
            )
            .await;
        assert!(other.is_empty(), "{strategy}");

        let carol = testctx
            .list_packages_ok("carol", &[("strategy", strategy)])
            .await;
        assert_eq!(carol.len(), 1, "{strategy}");
        assert_eq!(carol[0].evra, "5.14-2");
    }
    testctx.teardown().await;
}

#[tokio::test]
async fn test_bad_requests() {
    let testctx = TestContext::new("test_bad_requests").await;

    let response = testctx.list_packages(None, &[]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = testctx.list_packages(Some("alice#admin"), &[]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = testctx
        .list_packages(Some("alice"), &[("strategy", "sideways")])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response =
        testctx.list_packages(Some("alice"), &[("name", "  ")]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = testctx
        .list_packages(Some("alice"), &[("organization_id", "one")])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    testctx.teardown().await;
}

#[tokio::test]
async fn test_store_outages() {
    let testctx = TestContext::new("test_store_outages").await;
    testctx.content.insert_system(1, Some(1));
    testctx.content.insert_package_name(100, "kernel");
    testctx.content.insert_package(package(1, 100, "1-2", 1));
    testctx.grant_viewer(1, "alice");
    testctx.migration_engine().migrate_packages().await.unwrap();
    assert_eq!(testctx.list_packages_ok("alice", &[]).await.len(), 1);

    // Without the authorization store nothing can be confirmed, so nothing
    // is returned, but the request itself succeeds.
    testctx.relations.set_unavailable(true);
    for strategy in STRATEGIES {
        let packages = testctx
            .list_packages_ok("alice", &[("strategy", strategy)])
            .await;
        assert!(packages.is_empty(), "{strategy}");
    }
    testctx.relations.set_unavailable(false);

    testctx.content.set_unavailable(true);
    for strategy in STRATEGIES {
        let response = testctx
            .list_packages(Some("alice"), &[("strategy", strategy)])
            .await;
        assert_eq!(
            response.status(),
            StatusCode::SERVICE_UNAVAILABLE,
            "{strategy}"
        );
    }
    testctx.teardown().await;
}

#[tokio::test]
async fn test_disconnect_cancels_store_calls() {
    let testctx = TestContext::new("test_disconnect_cancels_store_calls").await;
    testctx.content.insert_system(1, Some(1));
    testctx.content.insert_package_name(100, "kernel");
    testctx.content.insert_package(package(1, 100, "1-2", 1));
    testctx.grant_viewer(1, "alice");
    testctx.migration_engine().migrate_packages().await.unwrap();

    testctx.content.set_latency(Duration::from_secs(1));
    for strategy in STRATEGIES {
        let served = testctx.content.page_fetches();
        let url = format!(
            "http://{}/content/packages",
            testctx.server.local_addr()
        );
        let error = testctx
            .client
            .get(url)
            .query(&[("strategy", strategy)])
            .header("x-principal", "alice")
            .timeout(Duration::from_millis(100))
            .send()
            .await
            .unwrap_err();
        assert!(error.is_timeout(), "{strategy}: {error}");

        // Had the handler kept running, its page fetch would have finished
        // by now.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(testctx.content.page_fetches(), served, "{strategy}");
    }

    testctx.content.set_latency(Duration::ZERO);
    assert_eq!(testctx.list_packages_ok("alice", &[]).await.len(), 1);
    testctx.teardown().await;
}
