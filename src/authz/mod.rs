// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Authorization subsystem
//!
//! ## Authorization basics
//!
//! Access to content is expressed as relationship-based access control
//! (ReBAC): a *subject* can perform an action on a *resource* if the
//! authorization store can find a path of *relation tuples* from the subject
//! to the resource that the store's schema says grants the *permission*.
//!
//! - **subject** is a principal (`user:alice`), resolved upstream of us.
//! - **resource** is an organization, a system (a host in the inventory), or
//!   a package reported by a system.
//! - **relation tuple** is a single stored fact, written
//!   `resource#relation@subject`, like `system:7#organization@organization:1`
//!   ("system 7 belongs to organization 1").
//! - **permission** is never stored.  It is computed by the store from the
//!   tuples and the schema (`schema/content.zed`).
//!
//! The schema defines:
//!
//! - an organization's "view" permission is granted to its "viewer" and
//!   "admin" users
//! - a system's "view" permission is granted to anyone who can view the
//!   system's "organization"
//! - a package's "view" permission is granted to anyone who can view the
//!   package's "system"
//!
//! Suppose we have:
//!
//! - an Organization 1, where "alice" has been granted "viewer"
//! - a System 7 belonging to Organization 1
//! - a Package 42 reported by System 7
//!
//! The tuples look like this:
//!
//! ```text
//! organization:1#viewer@user:alice
//! system:7#organization@organization:1
//! package:42#system@system:7
//! ```
//!
//! and "alice" can view package 42 because the store can walk
//! `package:42 -> system:7 -> organization:1 -> user:alice`.  If any of those
//! tuples is missing, she can't, regardless of what the relational database
//! says.
//!
//! ## Where tuples come from
//!
//! The relational store remains the source of truth for ownership.  The
//! [`tuples_for_record()`] function converts one ownership record into the
//! tuples that express it, and the migration engine ([`crate::migration`])
//! writes them to the store in bulk.  Role grants (`viewer`, `admin`) are
//! managed upstream.
//!
//! ## Talking to the store
//!
//! The store is a remote service.  [`RelationStore`] is the capability we
//! need from it (check, bulk check, write, lookup).  [`SpiceDbClient`]
//! implements it over HTTP and [`crate::sim::SimRelationStore`] implements it
//! in memory.  Callers don't use a [`RelationStore`] directly: they go through
//! [`AuthorizationClient`], which applies timeouts and retries and turns an
//! unreachable store into [`crate::Error::AuthorizationUnavailable`].  On the
//! read path that error is always treated as "deny".

mod client;
mod graph;
mod spicedb;
mod store;
mod tuples;

pub use client::AuthorizationClient;
pub use client::BatchCheckResult;
pub use client::CheckOutcome;
pub use graph::ObjectRef;
pub use graph::Permission;
pub use graph::Relation;
pub use graph::RelationTuple;
pub use graph::ResourceType;
pub use spicedb::Consistency;
pub use spicedb::SpiceDbClient;
pub use store::RelationStore;
pub use store::RelationStoreError;
pub use store::WriteConfirmation;
pub use tuples::tuples_for_record;
pub use tuples::MalformedRecord;
pub use tuples::OwnershipRecord;
pub use tuples::RecordKind;
