// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Conversion of relational ownership records into relation tuples

use super::ObjectRef;
use super::Relation;
use super::RelationTuple;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// One ownership fact read from the relational store
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OwnershipRecord {
    /// A system (inventory host) and the organization that owns it
    System { system_id: i64, organization_id: Option<i64> },
    /// A package, the system reporting it, and that system's organization
    Package {
        package_id: i64,
        system_id: Option<i64>,
        organization_id: Option<i64>,
    },
}

impl OwnershipRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            OwnershipRecord::System { .. } => RecordKind::System,
            OwnershipRecord::Package { .. } => RecordKind::Package,
        }
    }

    /// Primary key of the row this record came from
    pub fn id(&self) -> i64 {
        match self {
            OwnershipRecord::System { system_id, .. } => *system_id,
            OwnershipRecord::Package { package_id, .. } => *package_id,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordKind {
    System,
    Package,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecordKind::System => "system",
            RecordKind::Package => "package",
        })
    }
}

/// A record is missing a foreign key needed to place it in the graph.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("malformed {kind} record {id}: missing {missing}")]
pub struct MalformedRecord {
    pub kind: RecordKind,
    pub id: i64,
    pub missing: &'static str,
}

/// Returns the tuples expressing `record`'s ownership chain.
///
/// The output is sorted and free of duplicates, and depends only on
/// `record`.  A record with a missing foreign key produces no tuples at all.
pub fn tuples_for_record(
    record: &OwnershipRecord,
) -> Result<Vec<RelationTuple>, MalformedRecord> {
    let missing = |missing| MalformedRecord {
        kind: record.kind(),
        id: record.id(),
        missing,
    };

    let mut tuples = BTreeSet::new();
    match *record {
        OwnershipRecord::System { system_id, organization_id } => {
            let organization_id =
                organization_id.ok_or_else(|| missing("organization_id"))?;
            tuples.insert(system_in_organization(system_id, organization_id));
        }
        OwnershipRecord::Package { package_id, system_id, organization_id } => {
            let system_id = system_id.ok_or_else(|| missing("system_id"))?;
            let organization_id =
                organization_id.ok_or_else(|| missing("organization_id"))?;
            tuples.insert(RelationTuple::new(
                ObjectRef::package(package_id),
                Relation::System,
                ObjectRef::system(system_id),
            ));
            tuples.insert(system_in_organization(system_id, organization_id));
        }
    }

    Ok(tuples.into_iter().collect())
}

fn system_in_organization(
    system_id: i64,
    organization_id: i64,
) -> RelationTuple {
    RelationTuple::new(
        ObjectRef::system(system_id),
        Relation::Organization,
        ObjectRef::organization(organization_id),
    )
}
