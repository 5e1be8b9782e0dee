// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`RelationStore`] backed by the SpiceDB HTTP gateway

use super::ObjectRef;
use super::Permission;
use super::RelationStore;
use super::RelationStoreError;
use super::RelationTuple;
use super::ResourceType;
use super::WriteConfirmation;
use async_trait::async_trait;
use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use slog::o;
use slog::trace;
use slog::Logger;
use std::time::Duration;

const PERMISSIONSHIP_HAS_PERMISSION: &str = "PERMISSIONSHIP_HAS_PERMISSION";
const LOOKUP_PERMISSIONSHIP_HAS_PERMISSION: &str =
    "LOOKUP_PERMISSIONSHIP_HAS_PERMISSION";

/// Read consistency requested from the store
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    /// Answer from whatever snapshot is cheapest for the store
    #[default]
    MinimizeLatency,
    /// Answer from the latest snapshot
    FullyConsistent,
}

pub struct SpiceDbClient {
    log: Logger,
    base_url: String,
    token: String,
    consistency: Consistency,
    client: reqwest::Client,
}

impl SpiceDbClient {
    pub fn new(
        log: &Logger,
        base_url: &str,
        token: &str,
        consistency: Consistency,
        connect_timeout: Duration,
    ) -> Result<SpiceDbClient, reqwest::Error> {
        let client =
            reqwest::Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(SpiceDbClient {
            log: log.new(o!("component" => "SpiceDbClient")),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            consistency,
            client,
        })
    }

    async fn post<B>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, RelationStoreError>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        trace!(self.log, "request"; "url" => &url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| RelationStoreError::unavailable(format!("{url}: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        Err(classify_status(status, &format!("{url}: {status}: {detail}")))
    }

    async fn post_json<B, R>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, RelationStoreError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.post(path, body).await?.json::<R>().await.map_err(|e| {
            RelationStoreError::unavailable(format!(
                "{path}: decoding response: {e}"
            ))
        })
    }

    fn consistency(&self) -> WireConsistency {
        match self.consistency {
            Consistency::MinimizeLatency => {
                WireConsistency { minimize_latency: Some(true), fully_consistent: None }
            }
            Consistency::FullyConsistent => {
                WireConsistency { minimize_latency: None, fully_consistent: Some(true) }
            }
        }
    }
}

fn classify_status(status: StatusCode, message: &str) -> RelationStoreError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RelationStoreError::unavailable(message)
    } else {
        RelationStoreError::rejected(message)
    }
}

#[async_trait]
impl RelationStore for SpiceDbClient {
    async fn check_permission(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resource: &ObjectRef,
    ) -> Result<bool, RelationStoreError> {
        let request = CheckRequest {
            consistency: self.consistency(),
            item: CheckItem::new(subject, permission, resource),
        };
        let response: CheckResponse =
            self.post_json("/v1/permissions/check", &request).await?;
        Ok(response.permissionship == PERMISSIONSHIP_HAS_PERMISSION)
    }

    async fn check_bulk_permissions(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resources: &[ObjectRef],
    ) -> Result<Vec<(ObjectRef, bool)>, RelationStoreError> {
        let request = CheckBulkRequest {
            consistency: self.consistency(),
            items: resources
                .iter()
                .map(|resource| CheckItem::new(subject, permission, resource))
                .collect(),
        };
        let response: CheckBulkResponse =
            self.post_json("/v1/permissions/checkbulk", &request).await?;
        Ok(bulk_answers(resources, response))
    }

    async fn write_relationships(
        &self,
        tuples: &[RelationTuple],
    ) -> Result<WriteConfirmation, RelationStoreError> {
        let request = WriteRequest {
            updates: tuples
                .iter()
                .map(|tuple| RelationshipUpdate {
                    operation: "OPERATION_TOUCH",
                    relationship: Relationship::from(tuple),
                })
                .collect(),
        };
        let response: WriteResponse =
            self.post_json("/v1/relationships/write", &request).await?;
        Ok(WriteConfirmation {
            tuples: tuples.len(),
            written_at: response.written_at.map(|t| t.token),
        })
    }

    async fn lookup_resources(
        &self,
        subject: &ObjectRef,
        permission: Permission,
        resource_type: ResourceType,
    ) -> Result<Vec<String>, RelationStoreError> {
        let request = LookupResourcesRequest {
            consistency: self.consistency(),
            resource_object_type: resource_type,
            permission: permission.as_str(),
            subject: SubjectReference::from(subject),
        };
        let body = self
            .post("/v1/permissions/resources", &request)
            .await?
            .text()
            .await
            .map_err(|e| {
                RelationStoreError::unavailable(format!(
                    "reading lookup stream: {e}"
                ))
            })?;
        parse_lookup_stream(&body)
    }
}

/// Match bulk answers back to the requested resources.
///
/// Answers are correlated by the resource they echo back rather than by
/// position alone; an item the store failed to evaluate is left out.
fn bulk_answers(
    resources: &[ObjectRef],
    response: CheckBulkResponse,
) -> Vec<(ObjectRef, bool)> {
    response
        .pairs
        .into_iter()
        .zip(resources)
        .filter_map(|(pair, requested)| {
            let resource = pair
                .request
                .map(|r| ObjectRef::from(r.resource))
                .unwrap_or_else(|| requested.clone());
            let item = pair.item?;
            Some((resource, item.permissionship == PERMISSIONSHIP_HAS_PERMISSION))
        })
        .collect()
}

/// Parse the newline-delimited stream returned by LookupResources.
fn parse_lookup_stream(body: &str) -> Result<Vec<String>, RelationStoreError> {
    let mut ids = Vec::new();
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let message: LookupStreamMessage =
            serde_json::from_str(line).map_err(|e| {
                RelationStoreError::unavailable(format!(
                    "parsing lookup stream: {e}"
                ))
            })?;
        if let Some(error) = message.error {
            return Err(RelationStoreError::unavailable(format!(
                "lookup stream error: {}",
                error.message
            )));
        }
        if let Some(result) = message.result {
            if result.permissionship.as_deref().map_or(true, |p| {
                p == LOOKUP_PERMISSIONSHIP_HAS_PERMISSION
            }) {
                ids.push(result.resource_object_id);
            }
        }
    }
    Ok(ids)
}

// Wire types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireConsistency {
    #[serde(skip_serializing_if = "Option::is_none")]
    minimize_latency: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fully_consistent: Option<bool>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectReference {
    object_type: ResourceType,
    object_id: String,
}

impl From<&ObjectRef> for ObjectReference {
    fn from(object: &ObjectRef) -> Self {
        ObjectReference {
            object_type: object.resource_type,
            object_id: object.id.clone(),
        }
    }
}

impl From<ObjectReference> for ObjectRef {
    fn from(object: ObjectReference) -> Self {
        ObjectRef::new(object.object_type, object.object_id)
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct SubjectReference {
    object: ObjectReference,
}

impl From<&ObjectRef> for SubjectReference {
    fn from(object: &ObjectRef) -> Self {
        SubjectReference { object: ObjectReference::from(object) }
    }
}

#[derive(Debug, Serialize)]
struct CheckItem {
    resource: ObjectReference,
    permission: &'static str,
    subject: SubjectReference,
}

impl CheckItem {
    fn new(
        subject: &ObjectRef,
        permission: Permission,
        resource: &ObjectRef,
    ) -> CheckItem {
        CheckItem {
            resource: ObjectReference::from(resource),
            permission: permission.as_str(),
            subject: SubjectReference::from(subject),
        }
    }
}

#[derive(Debug, Serialize)]
struct CheckRequest {
    consistency: WireConsistency,
    #[serde(flatten)]
    item: CheckItem,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    permissionship: String,
}

#[derive(Debug, Serialize)]
struct CheckBulkRequest {
    consistency: WireConsistency,
    items: Vec<CheckItem>,
}

#[derive(Debug, Deserialize)]
struct CheckBulkResponse {
    #[serde(default)]
    pairs: Vec<CheckBulkPair>,
}

#[derive(Debug, Deserialize)]
struct CheckBulkPair {
    request: Option<CheckBulkPairRequest>,
    item: Option<CheckBulkPairItem>,
}

#[derive(Debug, Deserialize)]
struct CheckBulkPairRequest {
    resource: ObjectReference,
}

#[derive(Debug, Deserialize)]
struct CheckBulkPairItem {
    permissionship: String,
}

#[derive(Debug, Serialize)]
struct Relationship {
    resource: ObjectReference,
    relation: &'static str,
    subject: SubjectReference,
}

impl From<&RelationTuple> for Relationship {
    fn from(tuple: &RelationTuple) -> Self {
        Relationship {
            resource: ObjectReference::from(&tuple.resource),
            relation: tuple.relation.as_str(),
            subject: SubjectReference::from(&tuple.subject),
        }
    }
}

#[derive(Debug, Serialize)]
struct RelationshipUpdate {
    operation: &'static str,
    relationship: Relationship,
}

#[derive(Debug, Serialize)]
struct WriteRequest {
    updates: Vec<RelationshipUpdate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WriteResponse {
    written_at: Option<ZedToken>,
}

#[derive(Debug, Deserialize)]
struct ZedToken {
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupResourcesRequest {
    consistency: WireConsistency,
    resource_object_type: ResourceType,
    permission: &'static str,
    subject: SubjectReference,
}

#[derive(Debug, Deserialize)]
struct LookupStreamMessage {
    result: Option<LookupResult>,
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LookupResult {
    resource_object_id: String,
    permissionship: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}
