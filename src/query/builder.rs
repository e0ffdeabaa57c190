//! Fluent queries over one repository.

use serde_json::Value;

use crate::entity::Entity;
use crate::error::{StorageError, StorageResult};
use crate::mapping::DocumentMapper;
use crate::query::filter::{Condition, Filter, Logic, Operator, Query, Sort, SortOrder};
use crate::repository::{run_blocking, Repository};

/// one recorded builder step
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum QueryOp {
    Field(String),
    Compare(Operator, Value),
    Logic(Logic),
    Sort(String, SortOrder),
    Limit(i64),
    Skip(i64),
}

impl QueryOp {
    pub(crate) fn is_paging(&self) -> bool {
        matches!(self, QueryOp::Limit(_) | QueryOp::Skip(_))
    }
}

/// Accumulated builder state.
///
/// The first malformed step is remembered and reported by [`compile`](Self::compile).
#[derive(Debug, Clone, Default)]
pub(crate) struct QueryState {
    filter: Filter,
    field: Option<String>,
    pending: Option<Logic>,
    sort: Option<Sort>,
    skip: u64,
    limit: Option<u64>,
    error: Option<String>,
}

impl QueryState {
    pub(crate) fn apply(&mut self, op: QueryOp) {
        match op {
            QueryOp::Field(name) => {
                self.field = Some(DocumentMapper::wire_name(&name).to_string());
            }
            QueryOp::Compare(op, operand) => {
                let Some(field) = self.field.clone() else {
                    self.fail(format!("'{op}' has no field; call field() first"));
                    return;
                };
                let logic = self.pending.take().unwrap_or_default();
                self.filter.push(logic, Condition { field, op, operand });
            }
            QueryOp::Logic(logic) => match self.pending {
                Some(previous @ (Logic::Or | Logic::Not)) => {
                    self.fail(format!("{previous:?} followed by {logic:?} without a condition"));
                }
                _ => self.pending = Some(logic),
            },
            QueryOp::Sort(field, order) => {
                self.sort = Some(Sort {
                    field: DocumentMapper::wire_name(&field).to_string(),
                    order,
                });
            }
            QueryOp::Limit(-1) => {}
            QueryOp::Limit(0) => self.limit = None,
            QueryOp::Limit(n) if n > 0 => self.limit = Some(n as u64),
            QueryOp::Limit(n) => self.fail(format!("limit must be positive, 0 or -1, got {n}")),
            QueryOp::Skip(n) if n >= 0 => self.skip = n as u64,
            QueryOp::Skip(n) => self.fail(format!("skip must not be negative, got {n}")),
        }
    }

    fn fail(&mut self, message: String) {
        self.error.get_or_insert(message);
    }

    pub(crate) fn has_filters(&self) -> bool {
        !self.filter.is_empty()
    }

    pub(crate) fn compile(&self) -> StorageResult<Query> {
        if let Some(message) = &self.error {
            return Err(StorageError::Query(message.clone()));
        }
        if let Some(logic @ (Logic::Or | Logic::Not)) = self.pending {
            return Err(StorageError::Query(format!("{logic:?} is not followed by a condition")));
        }
        Ok(Query {
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            skip: self.skip,
            limit: self.limit,
        })
    }
}

/// A query bound to one repository.
///
/// ```no_run
/// # use cardinal_storage::query::SortOrder;
/// # fn demo(players: cardinal_storage::repository::Repository<impl cardinal_storage::entity::Entity>) {
/// let top = players
///     .query()
///     .field("level").gte(10)
///     .or().field("name").like("adm%")
///     .sort_by("score", SortOrder::Desc)
///     .limit(5)
///     .execute();
/// # }
/// ```
pub struct QueryBuilder<T: Entity> {
    repository: Repository<T>,
    state: QueryState,
}

impl<T: Entity> Clone for QueryBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            repository: self.repository.clone(),
            state: self.state.clone(),
        }
    }
}

impl<T: Entity> QueryBuilder<T> {
    pub(crate) fn new(repository: Repository<T>) -> Self {
        Self {
            repository,
            state: QueryState::default(),
        }
    }

    pub(crate) fn push(mut self, op: QueryOp) -> Self {
        self.state.apply(op);
        self
    }

    query_steps!();

    pub fn has_filters(&self) -> bool {
        self.state.has_filters()
    }

    /// drop every recorded step
    pub fn reset(mut self) -> Self {
        self.state = QueryState::default();
        self
    }

    /// the query as the backend will receive it
    pub fn build(&self) -> StorageResult<Query> {
        self.state.compile()
    }

    // ==================== Terminals ====================

    pub fn execute(&self) -> StorageResult<Vec<T>> {
        self.repository.timed("query", || {
            let query = self.state.compile()?;
            let documents = self.repository.store().find(&query)?;
            self.repository.from_documents(documents)
        })
    }

    /// the first result of this query limited to one entity
    pub fn find_first(&self) -> StorageResult<Option<T>> {
        let first = self.clone().limit(1).execute()?;
        Ok(first.into_iter().next())
    }

    /// number of matching entities; sort and paging are ignored
    pub fn count(&self) -> StorageResult<u64> {
        self.repository.timed("count", || {
            let query = self.state.compile()?;
            self.repository.store().count(&query.filter)
        })
    }

    pub async fn execute_async(&self) -> StorageResult<Vec<T>> {
        let builder = self.clone();
        run_blocking(move || builder.execute()).await
    }

    pub async fn find_first_async(&self) -> StorageResult<Option<T>> {
        let builder = self.clone();
        run_blocking(move || builder.find_first()).await
    }

    pub async fn count_async(&self) -> StorageResult<u64> {
        let builder = self.clone();
        run_blocking(move || builder.count()).await
    }
}
