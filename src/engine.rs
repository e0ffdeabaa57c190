//! The storage engine façade.
//!
//! A [`StorageEngine`] owns one open backend plus everything its
//! repositories share: the adapter registry, the observer list and the
//! metrics sink. Handles are cheap to clone and safe to share across threads.
//!
//! ```text
//!   StorageEngine ──repository::<T>("players")──▶ Repository<T> ──▶ CollectionStore
//!        │                                              │
//!        ├── ObserverRegistry ◀──── events ─────────────┤
//!        ├── StorageMetrics   ◀──── timings ────────────┘
//!        └── StorageBackend (git document store | sqlite)
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::StorageBackend;
use crate::config::StorageType;
use crate::entity::Entity;
use crate::error::{StorageError, StorageResult};
use crate::mapping::{DocumentMapper, TypeAdapter, TypeAdapterRegistry};
use crate::metrics::{InMemoryStorageMetrics, OpTimer, StorageMetrics};
use crate::observer::{ObserverRegistry, StorageObserver};
use crate::query::MultiRepositoryQueryBuilder;
use crate::repository::{run_blocking, Repository, StorageContext};

/// Result of a liveness check. Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// what a registered repository looks like from the outside
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryInfo {
    pub name: String,
    pub collection: String,
    pub entity_type: String,
}

struct RegisteredRepository {
    entity: TypeId,
    entity_name: &'static str,
    info: RepositoryInfo,
    /// a `Repository<T>` for the `T` behind `entity`
    handle: Box<dyn Any + Send + Sync>,
}

struct EngineInner {
    backend: Box<dyn StorageBackend>,
    adapters: Arc<TypeAdapterRegistry>,
    context: StorageContext,
    repositories: RwLock<HashMap<String, RegisteredRepository>>,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct StorageEngine {
    inner: Arc<EngineInner>,
}

impl fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageEngine")
            .field("backend", &self.inner.backend.describe())
            .field("repositories", &self.inner.repositories.read().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StorageEngine {
    /// Wrap an open backend with the built-in adapters and in-memory metrics.
    pub fn new(backend: Box<dyn StorageBackend>) -> Self {
        Self::with_metrics(backend, Arc::new(InMemoryStorageMetrics::new()))
    }

    pub fn with_metrics(backend: Box<dyn StorageBackend>, metrics: Arc<dyn StorageMetrics>) -> Self {
        let adapters = Arc::new(TypeAdapterRegistry::new());
        let context = StorageContext {
            mapper: Arc::new(DocumentMapper::new(Arc::clone(&adapters))),
            observers: ObserverRegistry::new(),
            metrics,
        };
        info!(storage = %backend.storage_type(), backend = %backend.describe(), "storage engine ready");
        Self {
            inner: Arc::new(EngineInner {
                backend,
                adapters,
                context,
                repositories: RwLock::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    pub fn storage_type(&self) -> StorageType {
        self.inner.backend.storage_type()
    }

    pub fn metrics(&self) -> &Arc<dyn StorageMetrics> {
        &self.inner.context.metrics
    }

    // ==================== Repositories ====================

    /// Get the repository registered under `name`, creating it on first use.
    ///
    /// Concurrent first calls create one repository; the others get it.
    /// A name is bound to one entity type for the life of the engine.
    pub fn repository<T: Entity>(&self, name: &str) -> StorageResult<Repository<T>> {
        self.ensure_open()?;
        if let Some(registered) = self.inner.repositories.read().get(name) {
            return downcast(name, registered);
        }

        let mut repositories = self.inner.repositories.write();
        if let Some(registered) = repositories.get(name) {
            return downcast(name, registered);
        }

        let store = self.inner.backend.open_collection(name)?;
        let repository = Repository::<T>::new(name, store, self.inner.context.clone());
        let info = RepositoryInfo {
            name: name.to_string(),
            collection: repository.collection_name().to_string(),
            entity_type: repository.entity_type().to_string(),
        };
        repositories.insert(
            name.to_string(),
            RegisteredRepository {
                entity: TypeId::of::<T>(),
                entity_name: std::any::type_name::<T>(),
                info,
                handle: Box::new(repository.clone()),
            },
        );
        Ok(repository)
    }

    /// every registered repository, by name
    pub fn repositories(&self) -> Vec<RepositoryInfo> {
        let mut infos: Vec<_> = self
            .inner
            .repositories
            .read()
            .values()
            .map(|r| r.info.clone())
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// A query over every registered repository holding `T`.
    ///
    /// Fails when the backend cannot serve fan-out queries.
    pub fn query_across_repositories<T: Entity>(&self) -> StorageResult<MultiRepositoryQueryBuilder<T>> {
        self.ensure_open()?;
        if !self.inner.backend.supports_fan_out() {
            return Err(StorageError::Unsupported(format!(
                "{} backend cannot query across repositories",
                self.storage_type()
            )));
        }

        let repositories = self.inner.repositories.read();
        let mut matching: Vec<(&String, Repository<T>)> = repositories
            .iter()
            .filter(|(_, r)| r.entity == TypeId::of::<T>())
            .filter_map(|(name, r)| r.handle.downcast_ref::<Repository<T>>().map(|repo| (name, repo.clone())))
            .collect();
        matching.sort_by(|a, b| a.0.cmp(b.0));
        debug!(repositories = matching.len(), entity = std::any::type_name::<T>(), "fan-out query");

        Ok(MultiRepositoryQueryBuilder::new(
            matching.into_iter().map(|(_, repo)| repo).collect(),
        ))
    }

    // ==================== Observers & adapters ====================

    pub fn register_observer(&self, observer: Arc<dyn StorageObserver>) {
        self.inner.context.observers.register(observer);
    }

    /// Remove the first registration of `observer`. Returns whether one was found.
    pub fn remove_observer(&self, observer: &Arc<dyn StorageObserver>) -> bool {
        self.inner.context.observers.remove(observer)
    }

    /// Add a type adapter. It takes part in every later mapping call.
    pub fn register_adapter<A: TypeAdapter + 'static>(&self, adapter: A) {
        self.inner.adapters.register(adapter);
    }

    // ==================== Transactions ====================

    /// Run `work` as one unit.
    ///
    /// On the relational store repository calls made by `work` on this thread
    /// share one SQL transaction. The document store has no multi-document
    /// transactions and runs `work` directly, without isolation.
    pub fn execute_transaction<R>(&self, work: impl FnOnce() -> StorageResult<R>) -> StorageResult<R> {
        self.ensure_open()?;
        let timer = OpTimer::start();
        let metrics = self.metrics();

        let mut output = None;
        let result = self.inner.backend.transaction(Box::new(|| {
            output = Some(work()?);
            Ok(())
        }));

        match result.and_then(|()| {
            output.ok_or_else(|| StorageError::Unsupported("transaction finished without running".to_string()))
        }) {
            Ok(value) => {
                metrics.record_operation("transaction", timer.elapsed());
                Ok(value)
            }
            Err(e) => {
                metrics.record_error("transaction");
                warn!(error = %e, "transaction failed");
                Err(StorageError::Transaction(Box::new(e)))
            }
        }
    }

    pub async fn execute_transaction_async<R, F>(&self, work: F) -> StorageResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> StorageResult<R> + Send + 'static,
    {
        let engine = self.clone();
        run_blocking(move || engine.execute_transaction(work)).await
    }

    // ==================== Lifecycle ====================

    /// Probe the backend.
    pub fn health_status(&self) -> HealthStatus {
        let storage = self.storage_type();
        if self.is_closed() {
            return HealthStatus {
                healthy: false,
                message: format!("{storage} storage engine is closed"),
                error: Some(StorageError::Closed.to_string()),
            };
        }
        match self.inner.backend.ping() {
            Ok(()) => HealthStatus {
                healthy: true,
                message: format!("{} connection healthy", self.inner.backend.describe()),
                error: None,
            },
            Err(e) => {
                warn!(storage = %storage, error = %e, "health check failed");
                HealthStatus {
                    healthy: false,
                    message: format!("{storage} connection failed"),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Release the backend. Later calls are no-ops.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.backend.close();
        info!(storage = %self.storage_type(), "storage engine closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

fn downcast<T: Entity>(name: &str, registered: &RegisteredRepository) -> StorageResult<Repository<T>> {
    registered
        .handle
        .downcast_ref::<Repository<T>>()
        .cloned()
        .ok_or_else(|| StorageError::RepositoryTypeMismatch {
            name: name.to_string(),
            existing: registered.entity_name,
            requested: std::any::type_name::<T>(),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use parking_lot::Mutex;
    use serde_json::Value;
    use tempfile::TempDir;

    use super::*;
    use crate::backend::document::DocumentBackend;
    use crate::backend::relational::SqlBackend;
    use crate::config::{MongoConfig, MySqlConfig};
    use crate::mapping::{
        Datum, DeserializationContext, DomainValue, FieldDescriptor, Mappable, MappingResult, Record, SerializationContext,
        TypeDescriptor,
    };
    use crate::observer::{ObserverResult, StorageEvent, StorageEventType};
    use crate::query::SortOrder;
    use crate::testing::{Clan, Player};

    fn setup() -> (TempDir, StorageEngine) {
        let dir = TempDir::new().unwrap();
        let config = MongoConfig::new(dir.path().to_string_lossy(), "engine")
            .unwrap()
            .min_pool_size(1);
        let engine = StorageEngine::new(Box::new(DocumentBackend::open(&config).unwrap()));
        (dir, engine)
    }

    fn setup_sql() -> (TempDir, StorageEngine) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}", dir.path().join("engine.db").display());
        let backend = SqlBackend::open(&MySqlConfig::new(url, "cardinal", "").unwrap()).unwrap();
        (dir, StorageEngine::new(Box::new(backend)))
    }

    #[test]
    fn test_repository_is_memoized_by_name() {
        let (_dir, engine) = setup();
        let a: Repository<Player> = engine.repository("players").unwrap();
        let b: Repository<Player> = engine.repository("players").unwrap();

        a.save(Player::new("x", 1)).unwrap();
        assert_eq!(b.count().unwrap(), 1);
        assert_eq!(engine.repositories().len(), 1);
        assert_eq!(engine.repositories()[0].entity_type, "Player");

        let err = engine.repository::<Clan>("players").unwrap_err();
        assert!(matches!(err, StorageError::RepositoryTypeMismatch { .. }));
    }

    #[test]
    fn test_concurrent_first_use_creates_one_repository() {
        let (_dir, engine) = setup_sql();
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let players: Repository<Player> = engine.repository("players").unwrap();
                    players.save(Player::new(&format!("p{i}"), i)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.repositories().len(), 1);
        let players: Repository<Player> = engine.repository("players").unwrap();
        assert_eq!(players.count().unwrap(), 8);
    }

    #[test]
    fn test_observers_receive_events_until_removed() {
        let (_dir, engine) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let observer: Arc<dyn StorageObserver> = Arc::new(move |event: &StorageEvent| -> ObserverResult {
            sink.lock().push(event.event_type);
            Ok(())
        });
        engine.register_observer(observer.clone());
        engine.register_observer(observer.clone());

        let players: Repository<Player> = engine.repository("players").unwrap();
        players.save(Player::new("a", 1)).unwrap();
        assert_eq!(seen.lock().len(), 2);

        assert!(engine.remove_observer(&observer));
        assert!(engine.remove_observer(&observer));
        assert!(!engine.remove_observer(&observer));
        players.save(Player::new("b", 1)).unwrap();
        assert_eq!(*seen.lock(), vec![StorageEventType::EntitySaved; 2]);
    }

    #[test]
    fn test_transaction_commits_and_rolls_back() {
        let (_dir, engine) = setup_sql();
        let players: Repository<Player> = engine.repository("players").unwrap();

        let saved = engine
            .execute_transaction(|| {
                let a = players.save(Player::new("a", 1))?;
                players.save(Player::new("b", 2))?;
                Ok(a)
            })
            .unwrap();
        assert_eq!(players.count().unwrap(), 2);
        assert!(saved.id.is_some());

        let err = engine
            .execute_transaction(|| -> StorageResult<()> {
                players.save(Player::new("c", 3))?;
                Err(StorageError::other("boom"))
            })
            .unwrap_err();
        assert!(matches!(err, StorageError::Transaction(_)));
        assert_eq!(players.count().unwrap(), 2);
        assert_eq!(engine.metrics().operation_count("transaction"), 1);
        assert_eq!(engine.metrics().error_count("transaction"), 1);
    }

    #[test]
    fn test_repository_first_used_in_failed_transaction() {
        let (_dir, engine) = setup_sql();

        let result = engine.execute_transaction(|| -> StorageResult<()> {
            let late: Repository<Player> = engine.repository("late")?;
            late.save(Player::new("a", 1))?;
            Err(StorageError::other("boom"))
        });
        assert!(result.is_err());

        let late: Repository<Player> = engine.repository("late").unwrap();
        assert_eq!(late.count().unwrap(), 0);
        let saved = late.save(Player::new("b", 2)).unwrap();
        assert!(late.exists_by_id(&saved.id.unwrap()).unwrap());
    }

    #[test]
    fn test_document_store_transaction_runs_directly() {
        let (_dir, engine) = setup();
        let players: Repository<Player> = engine.repository("players").unwrap();

        let result = engine.execute_transaction(|| -> StorageResult<()> {
            players.save(Player::new("kept", 1))?;
            Err(StorageError::other("late failure"))
        });
        assert!(result.is_err());
        assert_eq!(players.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_transaction_async() {
        let (_dir, engine) = setup_sql();
        let players: Repository<Player> = engine.repository("players").unwrap();

        let repo = players.clone();
        let name = engine
            .execute_transaction_async(move || Ok(repo.save(Player::new("async", 4))?.name))
            .await
            .unwrap();
        assert_eq!(name, "async");
        assert_eq!(players.count().unwrap(), 1);

        let err = engine
            .execute_transaction_async(|| -> StorageResult<()> { Err(StorageError::other("nope")) })
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Transaction(_)));
    }

    #[test]
    fn test_health_and_close() {
        let (_dir, engine) = setup();
        let players: Repository<Player> = engine.repository("players").unwrap();

        let status = engine.health_status();
        assert!(status.healthy, "{status:?}");
        assert!(status.error.is_none());

        engine.close();
        engine.close();
        assert!(engine.is_closed());

        let status = engine.health_status();
        assert!(!status.healthy);
        assert!(status.error.is_some());

        assert!(matches!(engine.repository::<Player>("other"), Err(StorageError::Closed)));
        assert!(players.save(Player::new("late", 1)).unwrap_err().is_connection());
        assert!(engine.execute_transaction(|| Ok(())).is_err());
    }

    #[test]
    fn test_query_across_repositories() {
        let (_dir, engine) = setup();
        let east: Repository<Player> = engine.repository("east").unwrap();
        let west: Repository<Player> = engine.repository("west").unwrap();
        let clans: Repository<Clan> = engine.repository("clans").unwrap();
        east.save_all(vec![Player::new("e1", 8), Player::new("e2", 2), Player::new("e3", 6)])
            .unwrap();
        west.save_all(vec![Player::new("w1", 1), Player::new("w2", 9)]).unwrap();
        clans.save(Clan::new("red", "RED")).unwrap();

        let multi = engine.query_across_repositories::<Player>().unwrap();
        assert_eq!(multi.repositories().len(), 2);

        let lowest = multi.sort_by("level", SortOrder::Asc).limit(2).execute().unwrap();
        let names: Vec<_> = lowest.into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["w1", "e2"]);
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Money(u64);

    impl crate::mapping::Field for Money {
        fn descriptor() -> TypeDescriptor {
            TypeDescriptor::Domain("Money")
        }

        fn to_datum(&self) -> Datum {
            Datum::Domain(DomainValue::new("Money", self.0))
        }

        fn from_datum(datum: Datum) -> MappingResult<Self> {
            match &datum {
                Datum::Domain(value) => value.downcast_ref::<u64>().copied().map(Money).ok_or_else(|| datum.mismatch("Money")),
                _ => Err(datum.mismatch("Money")),
            }
        }
    }

    /// stores cents as `"12.34"`
    struct MoneyAdapter;

    impl TypeAdapter for MoneyAdapter {
        fn name(&self) -> &'static str {
            "money"
        }

        fn can_handle(&self, ty: &TypeDescriptor) -> bool {
            *ty == TypeDescriptor::Domain("Money")
        }

        fn serialize(&self, value: &Datum, _ty: &TypeDescriptor, _ctx: &mut SerializationContext<'_>) -> MappingResult<Value> {
            match value {
                Datum::Domain(v) => {
                    let cents = v.downcast_ref::<u64>().copied().unwrap_or_default();
                    Ok(Value::String(format!("{}.{:02}", cents / 100, cents % 100)))
                }
                other => Err(other.mismatch("Money")),
            }
        }

        fn deserialize(&self, value: &Value, _ty: &TypeDescriptor, _ctx: &mut DeserializationContext<'_>) -> MappingResult<Datum> {
            let text = value.as_str().unwrap_or_default();
            let (units, cents) = text.split_once('.').unwrap_or((text, "0"));
            let cents = units.parse::<u64>().unwrap_or(0) * 100 + cents.parse::<u64>().unwrap_or(0);
            Ok(Datum::Domain(DomainValue::new("Money", cents)))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Wallet {
        id: Option<String>,
        balance: Money,
    }

    impl Mappable for Wallet {
        const TYPE_NAME: &'static str = "Wallet";

        fn fields() -> Vec<FieldDescriptor> {
            vec![
                FieldDescriptor::of::<Option<String>>("id"),
                FieldDescriptor::of::<Money>("balance"),
            ]
        }

        fn to_record(&self) -> Record {
            Record::new().with("id", &self.id).with("balance", &self.balance)
        }

        fn from_record(mut record: Record) -> MappingResult<Self> {
            Ok(Self {
                id: record.take("id")?,
                balance: record.take("balance")?,
            })
        }
    }

    crate::object_field!(Wallet);

    impl Entity for Wallet {
        type Id = String;

        fn id(&self) -> Option<String> {
            self.id.clone()
        }

        fn set_id(&mut self, id: String) {
            self.id = Some(id);
        }
    }

    #[test]
    fn test_registered_adapter_applies() {
        let (_dir, engine) = setup_sql();
        let wallets: Repository<Wallet> = engine.repository("wallets").unwrap();
        let wallet = Wallet {
            id: Some("w1".into()),
            balance: Money(1234),
        };

        let err = wallets.save(wallet.clone()).unwrap_err();
        assert!(err.is_mapping());

        engine.register_adapter(MoneyAdapter);
        wallets.save(wallet.clone()).unwrap();
        assert_eq!(wallets.find_by_id(&"w1".to_string()).unwrap(), Some(wallet));

        let found = wallets.query().field("balance").eq("12.34").count().unwrap();
        assert_eq!(found, 1);
    }
}
