// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Describes the content schema for use by Diesel.
//!
//! The SQL that creates these tables is in `schema/dbinit.sql`.

use diesel::allow_tables_to_appear_in_same_query;
use diesel::table;

table! {
    organization (id) {
        id -> Int8,
        name -> Text,
    }
}

table! {
    system (id) {
        id -> Int8,
        organization_id -> Nullable<Int8>,
        display_name -> Text,
    }
}

table! {
    package_name (id) {
        id -> Int8,
        name -> Text,
        summary -> Text,
    }
}

table! {
    package (id) {
        id -> Int8,
        name_id -> Int8,
        evra -> Text,
        description_hash -> Text,
        summary_hash -> Text,
        advisory_id -> Int8,
        synced -> Bool,
        system_id -> Nullable<Int8>,
    }
}

table! {
    package_cache (organization_id, name_id) {
        organization_id -> Int8,
        name_id -> Int8,
        systems_count -> Int8,
        time_modified -> Timestamptz,
    }
}

table! {
    migration_checkpoint (name) {
        name -> Text,
        last_id -> Int8,
        time_modified -> Timestamptz,
    }
}

allow_tables_to_appear_in_same_query!(
    organization,
    system,
    package_name,
    package,
    package_cache,
);
