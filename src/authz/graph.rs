// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Types describing objects and relation tuples in the authorization graph

use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Object types known to the content schema
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    User,
    Organization,
    System,
    Package,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::User => "user",
            ResourceType::Organization => "organization",
            ResourceType::System => "system",
            ResourceType::Package => "package",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed reference to one object in the graph, like `system:7`
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct ObjectRef {
    pub resource_type: ResourceType,
    pub id: String,
}

impl ObjectRef {
    pub fn new(resource_type: ResourceType, id: impl ToString) -> ObjectRef {
        ObjectRef { resource_type, id: id.to_string() }
    }

    pub fn user(user_id: &str) -> ObjectRef {
        ObjectRef::new(ResourceType::User, user_id)
    }

    pub fn organization(organization_id: i64) -> ObjectRef {
        ObjectRef::new(ResourceType::Organization, organization_id)
    }

    pub fn system(system_id: i64) -> ObjectRef {
        ObjectRef::new(ResourceType::System, system_id)
    }

    pub fn package(package_id: i64) -> ObjectRef {
        ObjectRef::new(ResourceType::Package, package_id)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id)
    }
}

/// Relations stored in the graph
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    /// organization -> user
    Viewer,
    /// organization -> user
    Admin,
    /// system -> organization
    Organization,
    /// package -> system
    System,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Viewer => "viewer",
            Relation::Admin => "admin",
            Relation::Organization => "organization",
            Relation::System => "system",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permissions computed by the store
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    View,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::View => "view",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fact in the authorization graph: `resource#relation@subject`
#[derive(
    Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct RelationTuple {
    pub resource: ObjectRef,
    pub relation: Relation,
    pub subject: ObjectRef,
}

impl RelationTuple {
    pub fn new(
        resource: ObjectRef,
        relation: Relation,
        subject: ObjectRef,
    ) -> RelationTuple {
        RelationTuple { resource, relation, subject }
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.relation, self.subject)
    }
}
