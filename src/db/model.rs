// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structures stored to the database.

use super::schema::{package, package_name, system};
use crate::authz::OwnershipRecord;
use diesel::prelude::*;
use serde::Deserialize;
use serde::Serialize;

/// A host in the inventory
#[derive(
    Queryable, Insertable, Selectable, Clone, Debug, PartialEq, Eq, Serialize,
    Deserialize,
)]
#[diesel(table_name = system)]
pub struct System {
    pub id: i64,
    /// Null only for rows that upstream ingestion left incomplete
    pub organization_id: Option<i64>,
    pub display_name: String,
}

impl System {
    pub fn ownership_record(&self) -> OwnershipRecord {
        OwnershipRecord::System {
            system_id: self.id,
            organization_id: self.organization_id,
        }
    }
}

#[derive(
    Queryable, Insertable, Selectable, Clone, Debug, PartialEq, Eq, Serialize,
    Deserialize,
)]
#[diesel(table_name = package_name)]
pub struct PackageName {
    pub id: i64,
    pub name: String,
    pub summary: String,
}

/// A specific package build reported by a system
#[derive(
    Queryable, Insertable, Selectable, Clone, Debug, PartialEq, Eq, Serialize,
    Deserialize,
)]
#[diesel(table_name = package)]
pub struct Package {
    pub id: i64,
    pub name_id: i64,
    /// epoch:version-release.arch
    pub evra: String,
    pub description_hash: String,
    pub summary_hash: String,
    pub advisory_id: i64,
    /// Whether this row's tuples are known to be in the authorization store.
    /// Only the migration sets this.
    pub synced: bool,
    pub system_id: Option<i64>,
}

/// A package row plus the organization of the system reporting it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackageWithOwner {
    pub package: Package,
    pub organization_id: Option<i64>,
}

impl PackageWithOwner {
    pub fn ownership_record(&self) -> OwnershipRecord {
        OwnershipRecord::Package {
            package_id: self.package.id,
            system_id: self.package.system_id,
            organization_id: self.organization_id,
        }
    }
}
