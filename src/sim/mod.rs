// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simulated stores, for tests and for running the server without its
//! dependencies

mod content_store;
mod relation_store;

pub use content_store::SimContentStore;
pub use relation_store::SimRelationStore;
