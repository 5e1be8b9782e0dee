// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface for paginating database queries.
//!
//! Every scan in this crate walks a table in ascending primary-key order, so
//! that a run can be resumed from the last key it saw.

use diesel::dsl::{Asc, Gt};
use diesel::expression::AsExpression;
use diesel::pg::Pg;
use diesel::query_builder::AsQuery;
use diesel::query_dsl::methods as query_methods;
use diesel::sql_types::SqlType;
use diesel::AppearsOnTable;
use diesel::Column;
use diesel::{ExpressionMethods, QueryDsl};
use std::num::NonZeroU32;

// Shorthand alias for "the SQL type of the whole table".
type TableSqlType<T> = <T as AsQuery>::SqlType;

// Shorthand alias for the type made from "table.into_boxed()".
type BoxedQuery<T> = diesel::internal::table_macro::BoxedSelectStatement<
    'static,
    TableSqlType<T>,
    diesel::internal::table_macro::FromClause<T>,
    Pg,
>;

/// Cursor for one page of an ascending primary-key scan
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DataPageParams {
    /// Last key of the previous page, if any
    pub marker: Option<i64>,
    pub limit: NonZeroU32,
}

impl DataPageParams {
    pub fn first_page(limit: NonZeroU32) -> DataPageParams {
        DataPageParams { marker: None, limit }
    }

    /// Parameters for the page that follows a page ending at `last_id`
    pub fn next_page(&self, last_id: i64) -> DataPageParams {
        DataPageParams { marker: Some(last_id), limit: self.limit }
    }

    pub fn limit_i64(&self) -> i64 {
        i64::from(self.limit.get())
    }
}

/// Uses `pagparams` to list a subset of rows in `table`, ordered by `column`.
pub fn paginated<T, C>(
    table: T,
    column: C,
    pagparams: &DataPageParams,
) -> BoxedQuery<T>
where
    // T is a table which can create a BoxedQuery.
    T: diesel::Table,
    T: query_methods::BoxedDsl<'static, Pg, Output = BoxedQuery<T>>,
    // C is a column which appears in T.
    C: 'static + Column + Copy + ExpressionMethods + AppearsOnTable<T>,
    // Required to compare the column with the marker.
    C::SqlType: SqlType,
    i64: AsExpression<C::SqlType>,
    BoxedQuery<T>: query_methods::OrderDsl<Asc<C>, Output = BoxedQuery<T>>,
    BoxedQuery<T>: query_methods::FilterDsl<Gt<C, i64>, Output = BoxedQuery<T>>,
{
    let mut query = table.into_boxed().limit(pagparams.limit_i64());
    if let Some(marker) = pagparams.marker {
        query = query.filter(column.gt(marker));
    }
    query.order(column.asc())
}
