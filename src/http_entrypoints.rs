// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP entrypoint functions for the content API

use crate::content::PackageFilter;
use crate::context::ServerContext;
use crate::query::PackageQuery;
use crate::query::Principal;
use crate::query::QueryStrategy;
use crate::views::PackageView;
use crate::Error;
use dropshot::HttpError;
use dropshot::HttpResponseOk;
use dropshot::Query;
use dropshot::RequestContext;
use schemars::JsonSchema;
use serde::Deserialize;
use slog::debug;
use std::sync::Arc;

/// Header carrying the caller, as resolved by the upstream identity layer
pub const PRINCIPAL_HEADER: &str = "x-principal";

type ContentApiDescription = dropshot::ApiDescription<Arc<ServerContext>>;

/// Returns a description of the content API
pub fn api() -> ContentApiDescription {
    content_api_mod::api_description::<ContentApiImpl>()
        .expect("registered entrypoints")
}

#[dropshot::api_description]
pub trait ContentApi {
    type Context;

    /// List packages the caller can view
    ///
    /// Rows whose permission cannot be confirmed are left out.
    #[endpoint {
        method = GET,
        path = "/content/packages",
    }]
    async fn content_packages_list(
        rqctx: RequestContext<Self::Context>,
        query_params: Query<PackageListParams>,
    ) -> Result<HttpResponseOk<Vec<PackageView>>, HttpError>;
}

#[derive(Clone, Debug, Deserialize, JsonSchema)]
pub struct PackageListParams {
    /// Only packages reported by systems of this organization
    pub organization_id: Option<i64>,
    /// Only packages with this name
    pub name: Option<String>,
    /// How to evaluate the query; the server default if absent
    pub strategy: Option<QueryStrategy>,
}

impl PackageListParams {
    fn into_query(self) -> Result<PackageQuery, Error> {
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(Error::InvalidRequest {
                message: "package name must not be empty".to_string(),
            });
        }
        Ok(PackageQuery {
            filter: PackageFilter {
                organization_id: self.organization_id,
                name: self.name,
            },
            strategy: self.strategy,
        })
    }
}

fn principal_from_request(
    rqctx: &RequestContext<Arc<ServerContext>>,
) -> Result<Principal, Error> {
    let value = rqctx
        .request
        .headers()
        .get(PRINCIPAL_HEADER)
        .ok_or_else(|| Error::Unauthenticated {
            message: format!("missing {PRINCIPAL_HEADER} header"),
        })?;
    let value = value.to_str().map_err(|_| Error::Unauthenticated {
        message: format!("{PRINCIPAL_HEADER} header is not valid text"),
    })?;
    Principal::parse(value)
}

enum ContentApiImpl {}

impl ContentApi for ContentApiImpl {
    type Context = Arc<ServerContext>;

    async fn content_packages_list(
        rqctx: RequestContext<Self::Context>,
        query_params: Query<PackageListParams>,
    ) -> Result<HttpResponseOk<Vec<PackageView>>, HttpError> {
        let ctx = rqctx.context();
        let principal = principal_from_request(&rqctx)?;
        let query = query_params.into_inner().into_query()?;
        debug!(ctx.log(), "listing packages";
            "principal" => principal.user_id(),
            "filter" => ?query.filter,
        );
        let packages =
            ctx.coordinator().list_packages(&principal, &query).await?;
        Ok(HttpResponseOk(packages.into_iter().map(PackageView::from).collect()))
    }
}
