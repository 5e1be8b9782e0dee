// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Views are response bodies, most of which are public lenses onto DB models.

use crate::db::model::Package;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// A package visible to the caller
#[derive(Clone, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
pub struct PackageView {
    pub name_id: i64,
    pub evra: String,
    pub description_hash: String,
    pub summary_hash: String,
    pub advisory_id: i64,
    pub synced: bool,
}

impl From<Package> for PackageView {
    fn from(package: Package) -> Self {
        PackageView {
            name_id: package.name_id,
            evra: package.evra,
            description_hash: package.description_hash,
            summary_hash: package.summary_hash,
            advisory_id: package.advisory_id,
            synced: package.synced,
        }
    }
}
