//! Queries: the backend-neutral model, the fluent builder and fan-out
//! queries over several repositories.
//!
//! Builders record steps without validating them; a malformed sequence
//! (a condition with no field, a dangling `or()`, a negative skip) fails at
//! the terminal call as [`StorageError::Query`](crate::error::StorageError::Query).

/// Fluent filter/sort/paging steps shared by both builders.
///
/// The implementing type provides `fn push(self, op: QueryOp) -> Self`.
macro_rules! query_steps {
    () => {
        /// Select the field the following conditions apply to.
        ///
        /// `id` addresses the identifier; dotted paths address nested fields.
        pub fn field(self, name: impl Into<String>) -> Self {
            self.push($crate::query::QueryOp::Field(name.into()))
        }

        pub fn eq(self, value: impl Into<serde_json::Value>) -> Self {
            self.push($crate::query::QueryOp::Compare($crate::query::Operator::Eq, value.into()))
        }

        pub fn ne(self, value: impl Into<serde_json::Value>) -> Self {
            self.push($crate::query::QueryOp::Compare($crate::query::Operator::Ne, value.into()))
        }

        pub fn gt(self, value: impl Into<serde_json::Value>) -> Self {
            self.push($crate::query::QueryOp::Compare($crate::query::Operator::Gt, value.into()))
        }

        pub fn gte(self, value: impl Into<serde_json::Value>) -> Self {
            self.push($crate::query::QueryOp::Compare($crate::query::Operator::Gte, value.into()))
        }

        pub fn lt(self, value: impl Into<serde_json::Value>) -> Self {
            self.push($crate::query::QueryOp::Compare($crate::query::Operator::Lt, value.into()))
        }

        pub fn lte(self, value: impl Into<serde_json::Value>) -> Self {
            self.push($crate::query::QueryOp::Compare($crate::query::Operator::Lte, value.into()))
        }

        /// match any of `values`
        pub fn is_in<V: Into<serde_json::Value>>(self, values: impl IntoIterator<Item = V>) -> Self {
            let values = values.into_iter().map(Into::into).collect();
            self.push($crate::query::QueryOp::Compare(
                $crate::query::Operator::In,
                serde_json::Value::Array(values),
            ))
        }

        /// SQL wildcard match (`%`, `_`), case-insensitive
        pub fn like(self, pattern: impl Into<String>) -> Self {
            self.push($crate::query::QueryOp::Compare(
                $crate::query::Operator::Like,
                serde_json::Value::String(pattern.into()),
            ))
        }

        pub fn and(self) -> Self {
            self.push($crate::query::QueryOp::Logic($crate::query::Logic::And))
        }

        /// the next condition becomes an alternative
        pub fn or(self) -> Self {
            self.push($crate::query::QueryOp::Logic($crate::query::Logic::Or))
        }

        /// the next condition is negated
        #[allow(clippy::should_implement_trait)]
        pub fn not(self) -> Self {
            self.push($crate::query::QueryOp::Logic($crate::query::Logic::Not))
        }

        /// Sort by one field. Calling it again replaces the previous sort.
        pub fn sort_by(self, field: impl Into<String>, order: $crate::query::SortOrder) -> Self {
            self.push($crate::query::QueryOp::Sort(field.into(), order))
        }

        /// `-1` leaves the limit unchanged, `0` removes it.
        pub fn limit(self, limit: i64) -> Self {
            self.push($crate::query::QueryOp::Limit(limit))
        }

        pub fn skip(self, skip: i64) -> Self {
            self.push($crate::query::QueryOp::Skip(skip))
        }
    };
}

mod builder;
mod filter;
mod multi;

pub use builder::QueryBuilder;
pub use filter::{
    compare_for_sort, compare_values, like_match, lookup, values_equal, Clause, Condition, Filter, Logic, Operator,
    Query, Sort, SortOrder,
};
pub use multi::MultiRepositoryQueryBuilder;

pub(crate) use builder::{QueryOp, QueryState};
