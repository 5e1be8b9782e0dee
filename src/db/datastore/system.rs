// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! [`DataStore`] methods on [`System`]s.

use super::DataStore;
use crate::db::error::public_error_from_diesel;
use crate::db::model::System;
use crate::db::pagination::paginated;
use crate::db::pagination::DataPageParams;
use crate::db::schema::system::dsl;
use crate::Error;
use async_bb8_diesel::AsyncRunQueryDsl;
use diesel::prelude::*;

impl DataStore {
    /// List a page of systems, including ones with no organization.
    pub async fn system_list(
        &self,
        pagparams: &DataPageParams,
    ) -> Result<Vec<System>, Error> {
        paginated(dsl::system, dsl::id, pagparams)
            .select(System::as_select())
            .load_async(&*self.pool_connection().await?)
            .await
            .map_err(public_error_from_diesel)
    }
}
