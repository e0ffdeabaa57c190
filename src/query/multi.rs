//! Fan-out queries over several repositories of one entity type.
//!
//! Steps are recorded as a [`QueryOp`] log. Each terminal call rebuilds a
//! fresh builder per repository from the log, without the paging steps,
//! concatenates the results in repository order, sorts them globally and
//! only then applies skip and limit.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::entity::Entity;
use crate::error::{StorageError, StorageResult};
use crate::mapping::{Datum, ID_FIELD, WIRE_ID_FIELD};
use crate::metrics::{OpTimer, StorageMetrics};
use crate::query::builder::{QueryBuilder, QueryOp, QueryState};
use crate::query::filter::{Query, Sort, SortOrder};
use crate::repository::{run_blocking, Repository};

pub struct MultiRepositoryQueryBuilder<T: Entity> {
    repositories: Vec<Repository<T>>,
    ops: Vec<QueryOp>,
}

impl<T: Entity> Clone for MultiRepositoryQueryBuilder<T> {
    fn clone(&self) -> Self {
        Self {
            repositories: self.repositories.clone(),
            ops: self.ops.clone(),
        }
    }
}

impl<T: Entity> MultiRepositoryQueryBuilder<T> {
    pub fn new(repositories: Vec<Repository<T>>) -> Self {
        Self {
            repositories,
            ops: Vec::new(),
        }
    }

    pub fn repositories(&self) -> &[Repository<T>] {
        &self.repositories
    }

    pub(crate) fn push(mut self, op: QueryOp) -> Self {
        self.ops.push(op);
        self
    }

    query_steps!();

    pub fn has_filters(&self) -> bool {
        self.global().has_filters()
    }

    pub fn reset(mut self) -> Self {
        self.ops.clear();
        self
    }

    fn global(&self) -> QueryState {
        let mut state = QueryState::default();
        for op in &self.ops {
            state.apply(op.clone());
        }
        state
    }

    /// a fresh builder for one repository, paging left out
    fn replay(&self, repository: &Repository<T>) -> QueryBuilder<T> {
        self.ops
            .iter()
            .filter(|op| !op.is_paging())
            .cloned()
            .fold(repository.query(), QueryBuilder::push)
    }

    fn timed<R>(&self, operation: &'static str, work: impl FnOnce() -> StorageResult<R>) -> StorageResult<R> {
        let metrics: Option<&Arc<dyn StorageMetrics>> = self.repositories.first().map(|r| r.metrics());
        let timer = OpTimer::start();
        match work() {
            Ok(value) => {
                if let Some(metrics) = metrics {
                    metrics.record_operation(operation, timer.elapsed());
                }
                Ok(value)
            }
            Err(e) => {
                if let Some(metrics) = metrics {
                    metrics.record_error(operation);
                }
                Err(StorageError::operation(operation, e))
            }
        }
    }

    // ==================== Terminals ====================

    pub fn execute(&self) -> StorageResult<Vec<T>> {
        self.timed("multi-query", || {
            let query = self.global().compile()?;
            let mut results = Vec::new();
            for repository in &self.repositories {
                results.extend(self.replay(repository).execute()?);
            }
            Ok(page(sort_entities(results, query.sort.as_ref())?, &query))
        })
    }

    pub fn find_first(&self) -> StorageResult<Option<T>> {
        let first = self.clone().limit(1).execute()?;
        Ok(first.into_iter().next())
    }

    /// sum of the per-repository counts
    pub fn count(&self) -> StorageResult<u64> {
        self.timed("multi-count", || {
            self.global().compile()?;
            let mut total = 0;
            for repository in &self.repositories {
                total += self.replay(repository).count()?;
            }
            Ok(total)
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

fn page<T>(results: Vec<T>, query: &Query) -> Vec<T> {
    let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
    let limit = query
        .limit
        .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));
    results.into_iter().skip(skip).take(limit).collect()
}

// ==================== Global sort ====================

/// a comparable field value
#[derive(Debug, Clone, PartialEq)]
enum SortKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl SortKey {
    fn class(&self) -> Option<&'static str> {
        match self {
            SortKey::Null => None,
            SortKey::Bool(_) => Some("boolean"),
            SortKey::Int(_) | SortKey::Float(_) => Some("number"),
            SortKey::Str(_) => Some("string"),
        }
    }

    /// total order within one class; nulls first
    fn compare(&self, other: &SortKey) -> Ordering {
        match (self, other) {
            (SortKey::Null, SortKey::Null) => Ordering::Equal,
            (SortKey::Null, _) => Ordering::Less,
            (_, SortKey::Null) => Ordering::Greater,
            (SortKey::Bool(a), SortKey::Bool(b)) => a.cmp(b),
            (SortKey::Int(a), SortKey::Int(b)) => a.cmp(b),
            (SortKey::Int(a), SortKey::Float(b)) => (*a as f64).total_cmp(b),
            (SortKey::Float(a), SortKey::Int(b)) => a.total_cmp(&(*b as f64)),
            (SortKey::Float(a), SortKey::Float(b)) => a.total_cmp(b),
            (SortKey::Str(a), SortKey::Str(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

fn not_sortable(field: &str, reason: impl Into<String>) -> StorageError {
    StorageError::FieldNotSortable {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Resolve a dotted in-memory path on an entity.
fn sort_key<T: Entity>(entity: &T, path: &str) -> StorageResult<SortKey> {
    let mut datum = entity.to_datum();
    for segment in path.split('.') {
        datum = match datum {
            Datum::Object(object) => {
                if object.schema().field(segment).is_none() {
                    let type_name = object.schema().name;
                    return Err(not_sortable(path, format!("{type_name} has no field '{segment}'")));
                }
                object.record().get(segment).cloned().unwrap_or(Datum::Null)
            }
            Datum::Map(mut entries) => entries.remove(segment).unwrap_or(Datum::Null),
            Datum::Null => return Ok(SortKey::Null),
            other => {
                return Err(not_sortable(path, format!("cannot look inside a {} value", other.kind())));
            }
        };
    }

    match datum {
        Datum::Null => Ok(SortKey::Null),
        Datum::Bool(b) => Ok(SortKey::Bool(b)),
        Datum::Int(i) => Ok(SortKey::Int(i)),
        Datum::Float(f) => Ok(SortKey::Float(f)),
        Datum::Str(s) => Ok(SortKey::Str(s)),
        Datum::ObjectId(id) => Ok(SortKey::Str(id.to_string())),
        other => Err(not_sortable(path, format!("{} values have no order", other.kind()))),
    }
}

/// Stable sort by one field; nulls first ascending, last descending.
fn sort_entities<T: Entity>(entities: Vec<T>, sort: Option<&Sort>) -> StorageResult<Vec<T>> {
    let Some(sort) = sort else {
        return Ok(entities);
    };
    let path = if sort.field == WIRE_ID_FIELD {
        ID_FIELD.to_string()
    } else {
        sort.field.clone()
    };

    let mut keyed = Vec::with_capacity(entities.len());
    let mut class: Option<&'static str> = None;
    for entity in entities {
        let key = sort_key(&entity, &path)?;
        match (class, key.class()) {
            (Some(seen), Some(found)) if seen != found => {
                return Err(not_sortable(&path, format!("mixes {seen} and {found} values")));
            }
            (None, found) => class = found,
            _ => {}
        }
        keyed.push((key, entity));
    }

    keyed.sort_by(|(a, _), (b, _)| match sort.order {
        SortOrder::Asc => a.compare(b),
        SortOrder::Desc => b.compare(a),
    });
    Ok(keyed.into_iter().map(|(_, entity)| entity).collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::backend::document::DocumentBackend;
    use crate::backend::StorageBackend;
    use crate::config::MongoConfig;
    use crate::mapping::{DocumentMapper, TypeAdapterRegistry};
    use crate::metrics::InMemoryStorageMetrics;
    use crate::observer::ObserverRegistry;
    use crate::repository::StorageContext;
    use crate::testing::{Address, Player};

    fn setup() -> (TempDir, Repository<Player>, Repository<Player>) {
        let dir = TempDir::new().unwrap();
        let config = MongoConfig::new(dir.path().to_string_lossy(), "multi")
            .unwrap()
            .min_pool_size(1);
        let backend = DocumentBackend::open(&config).unwrap();
        let context = StorageContext {
            mapper: Arc::new(DocumentMapper::new(Arc::new(TypeAdapterRegistry::new()))),
            observers: ObserverRegistry::new(),
            metrics: Arc::new(InMemoryStorageMetrics::new()),
        };
        let first = Repository::new("first", backend.open_collection("first").unwrap(), context.clone());
        let second = Repository::new("second", backend.open_collection("second").unwrap(), context);

        first
            .save_all(vec![
                Player::scored("a", 40, 1.0),
                Player::scored("b", 7, 2.0),
                Player::scored("c", 25, 3.0),
            ])
            .unwrap();
        second
            .save_all(vec![Player::scored("d", 3, 4.0), Player::scored("e", 60, 5.0)])
            .unwrap();
        (dir, first, second)
    }

    fn names(players: Vec<Player>) -> Vec<String> {
        players.into_iter().map(|p| p.name).collect()
    }

    #[test]
    fn test_global_sort_before_limit() {
        let (_dir, first, second) = setup();
        let multi = MultiRepositoryQueryBuilder::new(vec![first, second]);

        let smallest = multi
            .clone()
            .field("level")
            .gt(0)
            .sort_by("level", SortOrder::Asc)
            .limit(2)
            .execute()
            .unwrap();
        assert_eq!(names(smallest), vec!["d", "b"]);

        let largest = multi
            .clone()
            .sort_by("level", SortOrder::Desc)
            .skip(1)
            .limit(2)
            .execute()
            .unwrap();
        assert_eq!(names(largest), vec!["a", "c"]);
    }

    #[test]
    fn test_unsorted_results_keep_repository_order() {
        let (_dir, first, second) = setup();
        let multi = MultiRepositoryQueryBuilder::new(vec![second, first]);

        let all = multi.execute().unwrap();
        assert_eq!(all.len(), 5);
        let mut head = names(all[..2].to_vec());
        head.sort();
        assert_eq!(head, vec!["d", "e"]);
    }

    #[test]
    fn test_count_sums_repositories() {
        let (_dir, first, second) = setup();
        let multi = MultiRepositoryQueryBuilder::new(vec![first.clone(), second]);

        assert_eq!(multi.clone().count().unwrap(), 5);
        assert_eq!(multi.clone().field("level").gte(25).limit(1).count().unwrap(), 3);
        assert_eq!(first.metrics().operation_count("multi-count"), 2);
    }

    #[test]
    fn test_nulls_sort_first_ascending() {
        let (_dir, first, second) = setup();
        let mut housed = Player::scored("f", 9, 6.0);
        housed.address = Some(Address {
            street: "3 Low Rd".into(),
            city: "Ogdenville".into(),
        });
        second.save(housed).unwrap();
        let multi = MultiRepositoryQueryBuilder::new(vec![first, second]);

        let asc = multi.clone().sort_by("address.city", SortOrder::Asc).execute().unwrap();
        assert_eq!(asc.last().unwrap().name, "f");

        let desc = multi.sort_by("address.city", SortOrder::Desc).execute().unwrap();
        assert_eq!(desc.first().unwrap().name, "f");
    }

    #[test]
    fn test_field_not_sortable() {
        let (_dir, first, second) = setup();
        let multi = MultiRepositoryQueryBuilder::new(vec![first, second]);

        let err = multi.clone().sort_by("tags", SortOrder::Asc).execute().unwrap_err();
        assert!(matches!(err.root(), StorageError::FieldNotSortable { field, .. } if field == "tags"));

        let err = multi.clone().sort_by("nickname", SortOrder::Asc).execute().unwrap_err();
        assert!(matches!(err.root(), StorageError::FieldNotSortable { .. }));

        let err = multi.sort_by("address", SortOrder::Asc).execute();
        assert!(err.is_ok(), "all addresses are null, so the sort is trivially defined");
    }

    #[test]
    fn test_sort_by_id_and_find_first() {
        let (_dir, first, second) = setup();
        let multi = MultiRepositoryQueryBuilder::new(vec![first, second]);

        let by_id = multi.clone().sort_by("id", SortOrder::Asc).execute().unwrap();
        let ids: Vec<_> = by_id.iter().map(|p| p.id.unwrap()).collect();
        let mut sorted = ids.clone();
        sorted.sort_by_key(|id| id.to_string());
        assert_eq!(ids, sorted);

        let first_high = multi.field("level").gt(30).sort_by("score", SortOrder::Desc).find_first();
        assert_eq!(first_high.unwrap().unwrap().name, "e");
    }

    #[test]
    fn test_mixed_kinds_are_not_sortable() {
        let keys = [SortKey::Int(1), SortKey::Str("x".into())];
        assert_ne!(keys[0].class(), keys[1].class());
        assert_eq!(SortKey::Null.compare(&SortKey::Int(-5)), Ordering::Less);
        assert_eq!(SortKey::Int(2).compare(&SortKey::Float(1.5)), Ordering::Greater);
    }

    #[tokio::test]
    async fn test_async_terminals() {
        let (_dir, first, second) = setup();
        let multi = MultiRepositoryQueryBuilder::new(vec![first, second])
            .field("level")
            .lt(10)
            .sort_by("level", SortOrder::Asc);

        assert_eq!(names(multi.execute_async().await.unwrap()), vec!["d", "b"]);
        assert_eq!(multi.count_async().await.unwrap(), 2);
        assert_eq!(multi.find_first_async().await.unwrap().unwrap().name, "d");
    }
}
