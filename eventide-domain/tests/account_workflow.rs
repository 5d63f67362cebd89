//! 账户示例：命令 → 事件 → 持久化 → 快照 + 增量重放 的完整流程。
use anyhow::Result as AnyResult;
use async_trait::async_trait;
use eventide_domain::aggregate::{Aggregate, AggregateBase, SnapshotAggregate};
use eventide_domain::aggregate_root::AggregateRoot;
use eventide_domain::context::CallContext;
use eventide_domain::domain_event::Metadata;
use eventide_domain::error::{DomainError, DomainResult};
use eventide_domain::persist::{
    AggregateRepository, EventStore, EventStoreAggregateRepository, InMemoryEventStore,
    LoadedEvents, Snapshot, SnapshotPolicy, SnapshottingAggregateRepository,
};
use eventide_domain::value_object::Version;
use eventide_macros::event;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// ---------------------------------------------------------------------------
// 账户聚合
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
enum AccountError {
    #[error("account already opened")]
    AlreadyOpened,
    #[error("account not opened")]
    NotOpened,
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Debug)]
enum AccountCommand {
    Open { owner: String, initial: i64 },
    Deposit { amount: i64 },
}

#[event]
enum AccountEvent {
    #[event(event_type = "AccountOpened")]
    Opened {
        account_id: String,
        owner: String,
        initial: i64,
    },
    #[event(event_type = "MoneyDeposited")]
    Deposited { amount: i64 },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct AccountSnapshot {
    id: String,
    owner: String,
    balance: i64,
}

#[derive(Debug)]
struct Account {
    base: AggregateBase<AccountEvent>,
    id: String,
    owner: String,
    balance: i64,
    opened: bool,
}

impl Aggregate for Account {
    const TYPE: &'static str = "Account";
    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = AccountError;

    fn new(stream_id: String) -> Self {
        Self {
            base: AggregateBase::new(stream_id),
            id: String::new(),
            owner: String::new(),
            balance: 0,
            opened: false,
        }
    }

    fn base(&self) -> &AggregateBase<AccountEvent> {
        &self.base
    }

    fn base_mut(&mut self) -> &mut AggregateBase<AccountEvent> {
        &mut self.base
    }

    fn when(&mut self, event: &AccountEvent) {
        match event {
            AccountEvent::Opened {
                account_id,
                owner,
                initial,
            } => {
                self.id = account_id.clone();
                self.owner = owner.clone();
                self.balance = *initial;
                self.opened = true;
            }
            AccountEvent::Deposited { amount } => self.balance += amount,
        }
    }

    fn handle(&mut self, command: AccountCommand) -> Result<(), AccountError> {
        match command {
            AccountCommand::Open { owner, initial } => {
                if self.opened {
                    return Err(AccountError::AlreadyOpened);
                }
                if initial < 0 {
                    return Err(AccountError::InvalidAmount(initial));
                }
                let account_id = self
                    .stream_id()
                    .trim_start_matches("Account:")
                    .to_string();
                self.raise(AccountEvent::Opened {
                    account_id,
                    owner,
                    initial,
                });
            }
            AccountCommand::Deposit { amount } => {
                if !self.opened {
                    return Err(AccountError::NotOpened);
                }
                if amount <= 0 {
                    return Err(AccountError::InvalidAmount(amount));
                }
                self.raise(AccountEvent::Deposited { amount });
            }
        }
        Ok(())
    }
}

impl SnapshotAggregate for Account {
    type Snapshot = AccountSnapshot;

    fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            id: self.id.clone(),
            owner: self.owner.clone(),
            balance: self.balance,
        }
    }

    fn apply_snapshot(&mut self, snapshot: AccountSnapshot) {
        self.opened = !snapshot.id.is_empty();
        self.id = snapshot.id;
        self.owner = snapshot.owner;
        self.balance = snapshot.balance;
    }
}

fn open(owner: &str, initial: i64) -> AccountCommand {
    AccountCommand::Open {
        owner: owner.to_string(),
        initial,
    }
}

fn deposit(amount: i64) -> AccountCommand {
    AccountCommand::Deposit { amount }
}

// ---------------------------------------------------------------------------
// 测试用存储装饰器
// ---------------------------------------------------------------------------

/// 快照读写总是失败，事件操作透传
struct BrokenSnapshots<S> {
    inner: S,
    snapshot_saves: AtomicUsize,
}

impl<S> BrokenSnapshots<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            snapshot_saves: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<S> EventStore for BrokenSnapshots<S>
where
    S: EventStore,
{
    type Event = S::Event;

    async fn load(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        from_version: Version,
    ) -> DomainResult<LoadedEvents<S::Event>> {
        self.inner.load(ctx, stream_id, from_version).await
    }

    async fn append(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        expected_version: Version,
        events: Vec<S::Event>,
        metadata: Metadata,
    ) -> DomainResult<Version> {
        self.inner
            .append(ctx, stream_id, expected_version, events, metadata)
            .await
    }

    async fn save_snapshot<T>(
        &self,
        _ctx: &CallContext,
        _stream_id: &str,
        _version: Version,
        _state: &T,
    ) -> DomainResult<()>
    where
        T: Serialize + Sync,
    {
        self.snapshot_saves.fetch_add(1, Ordering::SeqCst);
        Err(DomainError::Database {
            reason: "snapshot table unavailable".into(),
        })
    }

    async fn load_snapshot<T>(
        &self,
        _ctx: &CallContext,
        _stream_id: &str,
    ) -> DomainResult<Option<Snapshot<T>>>
    where
        T: DeserializeOwned + Send,
    {
        Err(DomainError::Database {
            reason: "snapshot table unavailable".into(),
        })
    }
}

/// 报告一个比真实事件多一的最后版本，模拟被跳过的重放
struct SkewedLastVersion<S> {
    inner: S,
}

#[async_trait]
impl<S> EventStore for SkewedLastVersion<S>
where
    S: EventStore,
{
    type Event = S::Event;

    async fn load(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        from_version: Version,
    ) -> DomainResult<LoadedEvents<S::Event>> {
        let loaded = self.inner.load(ctx, stream_id, from_version).await?;
        Ok(LoadedEvents {
            last_version: loaded.last_version.next(),
            events: loaded.events,
        })
    }

    async fn append(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        expected_version: Version,
        events: Vec<S::Event>,
        metadata: Metadata,
    ) -> DomainResult<Version> {
        self.inner
            .append(ctx, stream_id, expected_version, events, metadata)
            .await
    }

    async fn save_snapshot<T>(
        &self,
        ctx: &CallContext,
        stream_id: &str,
        version: Version,
        state: &T,
    ) -> DomainResult<()>
    where
        T: Serialize + Sync,
    {
        self.inner.save_snapshot(ctx, stream_id, version, state).await
    }

    async fn load_snapshot<T>(
        &self,
        ctx: &CallContext,
        stream_id: &str,
    ) -> DomainResult<Option<Snapshot<T>>>
    where
        T: DeserializeOwned + Send,
    {
        self.inner.load_snapshot(ctx, stream_id).await
    }
}

// ---------------------------------------------------------------------------
// 纯事件仓储
// ---------------------------------------------------------------------------

#[tokio::test]
async fn open_and_deposit_then_rehydrate() -> AnyResult<()> {
    let store = Arc::new(InMemoryEventStore::<AccountEvent>::new());
    let root = AggregateRoot::<Account, _>::new(EventStoreAggregateRepository::new(store.clone()));
    let ctx = CallContext::default();
    let md = Metadata::new().with("tenant_id", "t1").with("user_id", "u1");

    let v = root.execute(&ctx, "42", open("Taro", 1000), md.clone()).await?;
    assert_eq!(v, Version::from_value(1));
    let v = root.execute(&ctx, "42", deposit(500), md.clone()).await?;
    assert_eq!(v, Version::from_value(2));

    let account = root.load(&ctx, "42").await?.expect("account exists");
    assert_eq!(account.balance, 1500);
    assert_eq!(account.owner, "Taro");
    assert_eq!(account.id, "42");
    assert_eq!(account.version(), Version::from_value(2));
    assert_eq!(account.stream_id(), "Account:42");

    let loaded = store.load(&ctx, "Account:42", Version::new()).await?;
    assert!(loaded.events.iter().all(|e| e.metadata == md));
    let types: Vec<&str> = loaded.events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, ["AccountOpened", "MoneyDeposited"]);
    Ok(())
}

#[tokio::test]
async fn unknown_aggregate_loads_as_none() -> AnyResult<()> {
    let repo = EventStoreAggregateRepository::new(InMemoryEventStore::<AccountEvent>::new());
    let loaded: Option<Account> = repo.load(&CallContext::default(), "nobody").await?;
    assert!(loaded.is_none());
    Ok(())
}

#[tokio::test]
async fn rejected_command_writes_nothing() -> AnyResult<()> {
    let store = Arc::new(InMemoryEventStore::<AccountEvent>::new());
    let root = AggregateRoot::<Account, _>::new(EventStoreAggregateRepository::new(store.clone()));
    let ctx = CallContext::default();

    let err = root
        .execute(&ctx, "1", deposit(10), Metadata::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::NotOpened));

    root.execute(&ctx, "1", open("A", 0), Metadata::new()).await?;
    let err = root
        .execute(&ctx, "1", deposit(-5), Metadata::new())
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::InvalidAmount(-5)));

    assert_eq!(store.current_version("Account:1"), Version::from_value(1));
    Ok(())
}

#[tokio::test]
async fn saving_without_pending_events_is_a_no_op() -> AnyResult<()> {
    let repo = EventStoreAggregateRepository::new(InMemoryEventStore::<AccountEvent>::new());
    let ctx = CallContext::default();

    let mut account = Account::new(Account::stream_id_for("7"));
    let v = repo.save(&ctx, &mut account, Metadata::new()).await?;
    assert_eq!(v, Version::new());
    assert_eq!(repo.store().current_version("Account:7"), Version::new());
    Ok(())
}

#[tokio::test]
async fn stale_instance_gets_version_conflict() -> AnyResult<()> {
    let repo = EventStoreAggregateRepository::new(InMemoryEventStore::<AccountEvent>::new());
    let ctx = CallContext::default();

    let mut account = Account::new(Account::stream_id_for("9"));
    account.handle(open("B", 10))?;
    repo.save(&ctx, &mut account, Metadata::new()).await?;

    // 两个实例基于同一版本各自执行命令
    let mut first: Account = repo.load(&ctx, "9").await?.expect("exists");
    let mut second: Account = repo.load(&ctx, "9").await?.expect("exists");
    first.handle(deposit(1))?;
    second.handle(deposit(2))?;

    assert_eq!(
        repo.save(&ctx, &mut first, Metadata::new()).await?,
        Version::from_value(2)
    );
    let err = repo
        .save(&ctx, &mut second, Metadata::new())
        .await
        .unwrap_err();
    match err {
        AccountError::Domain(DomainError::VersionConflict {
            expected, actual, ..
        }) => {
            assert_eq!(expected, Version::from_value(1));
            assert_eq!(actual, Version::from_value(2));
        }
        other => panic!("unexpected {other:?}"),
    }

    // 重新加载后重试成功
    let mut retry: Account = repo.load(&ctx, "9").await?.expect("exists");
    retry.handle(deposit(2))?;
    repo.save(&ctx, &mut retry, Metadata::new()).await?;
    let account: Account = repo.load(&ctx, "9").await?.expect("exists");
    assert_eq!(account.balance, 13);
    Ok(())
}

#[tokio::test]
async fn replay_mismatch_is_reported() -> AnyResult<()> {
    let store = SkewedLastVersion {
        inner: InMemoryEventStore::<AccountEvent>::new(),
    };
    let repo = EventStoreAggregateRepository::new(store);
    let ctx = CallContext::default();

    let mut account = Account::new(Account::stream_id_for("m"));
    account.handle(open("M", 1))?;
    repo.save(&ctx, &mut account, Metadata::new()).await?;

    let err = AggregateRepository::<Account>::load(&repo, &ctx, "m")
        .await
        .unwrap_err();
    match err {
        AccountError::Domain(DomainError::ReplayMismatch {
            aggregate, store, ..
        }) => {
            assert_eq!(aggregate, Version::from_value(1));
            assert_eq!(store, Version::from_value(2));
        }
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 快照仓储
// ---------------------------------------------------------------------------

#[tokio::test]
async fn snapshot_written_when_policy_interval_is_crossed() -> AnyResult<()> {
    let store = Arc::new(InMemoryEventStore::<AccountEvent>::new());
    let repo = SnapshottingAggregateRepository::new(store.clone(), SnapshotPolicy::Every(2));
    let root = AggregateRoot::<Account, _>::new(repo);
    let ctx = CallContext::default();

    root.execute(&ctx, "s", open("S", 100), Metadata::new()).await?;
    let none: Option<Snapshot<AccountSnapshot>> = store.load_snapshot(&ctx, "Account:s").await?;
    assert!(none.is_none());

    root.execute(&ctx, "s", deposit(10), Metadata::new()).await?;
    root.execute(&ctx, "s", deposit(20), Metadata::new()).await?;

    let snap: Option<Snapshot<AccountSnapshot>> = store.load_snapshot(&ctx, "Account:s").await?;
    let snap = snap.expect("snapshot at version 2");
    assert_eq!(snap.version, Version::from_value(2));
    assert_eq!(snap.state.balance, 110);

    let account = root.load(&ctx, "s").await?.expect("exists");
    assert_eq!(account.balance, 130);
    assert_eq!(account.version(), Version::from_value(3));
    Ok(())
}

#[tokio::test]
async fn load_starts_from_snapshot_and_replays_delta() -> AnyResult<()> {
    let store = Arc::new(InMemoryEventStore::<AccountEvent>::new());
    let repo = SnapshottingAggregateRepository::new(store.clone(), SnapshotPolicy::Never);
    let ctx = CallContext::default();

    let mut account = Account::new(Account::stream_id_for("d"));
    account.handle(open("D", 1))?;
    account.handle(deposit(1))?;
    account.handle(deposit(1))?;
    repo.save(&ctx, &mut account, Metadata::new()).await?;

    // 快照状态与事件不同，可以据此确认加载以快照为基础
    let cached = AccountSnapshot {
        id: "d".into(),
        owner: "D".into(),
        balance: 500,
    };
    store
        .save_snapshot(&ctx, "Account:d", Version::from_value(2), &cached)
        .await?;

    let loaded: Account = repo.load(&ctx, "d").await?.expect("exists");
    assert_eq!(loaded.balance, 501);
    assert_eq!(loaded.version(), Version::from_value(3));
    Ok(())
}

#[tokio::test]
async fn snapshot_at_head_needs_no_delta() -> AnyResult<()> {
    let store = Arc::new(InMemoryEventStore::<AccountEvent>::new());
    let repo = SnapshottingAggregateRepository::new(store.clone(), SnapshotPolicy::Every(1));
    let ctx = CallContext::default();

    let mut account = Account::new(Account::stream_id_for("h"));
    account.handle(open("H", 7))?;
    repo.save(&ctx, &mut account, Metadata::new()).await?;

    let loaded: Account = repo.load(&ctx, "h").await?.expect("exists");
    assert_eq!(loaded.balance, 7);
    assert_eq!(loaded.version(), Version::from_value(1));
    assert!(loaded.opened);
    Ok(())
}

#[tokio::test]
async fn snapshot_failures_do_not_fail_saves_or_loads() -> AnyResult<()> {
    let store = Arc::new(BrokenSnapshots::new(InMemoryEventStore::<AccountEvent>::new()));
    let repo = SnapshottingAggregateRepository::new(store.clone(), SnapshotPolicy::Every(1));
    let root = AggregateRoot::<Account, _>::new(repo);
    let ctx = CallContext::default();

    root.execute(&ctx, "f", open("F", 5), Metadata::new()).await?;
    let v = root.execute(&ctx, "f", deposit(5), Metadata::new()).await?;
    assert_eq!(v, Version::from_value(2));
    assert_eq!(store.snapshot_saves.load(Ordering::SeqCst), 2);

    let account = root.load(&ctx, "f").await?.expect("exists");
    assert_eq!(account.balance, 10);
    Ok(())
}

#[tokio::test]
async fn undecodable_snapshot_is_treated_as_miss() -> AnyResult<()> {
    let store = Arc::new(InMemoryEventStore::<AccountEvent>::new());
    let repo = SnapshottingAggregateRepository::new(store.clone(), SnapshotPolicy::Never);
    let ctx = CallContext::default();

    let mut account = Account::new(Account::stream_id_for("x"));
    account.handle(open("X", 3))?;
    repo.save(&ctx, &mut account, Metadata::new()).await?;
    store
        .save_snapshot(&ctx, "Account:x", Version::from_value(1), &"garbage")
        .await?;

    let loaded: Account = repo.load(&ctx, "x").await?.expect("exists");
    assert_eq!(loaded.balance, 3);
    Ok(())
}

#[tokio::test]
async fn cancelled_context_is_not_swallowed_as_snapshot_miss() -> AnyResult<()> {
    let repo = SnapshottingAggregateRepository::new(
        InMemoryEventStore::<AccountEvent>::new(),
        SnapshotPolicy::Every(1),
    );
    let ctx = CallContext::default();
    ctx.cancellation().cancel();

    let err = AggregateRepository::<Account>::load(&repo, &ctx, "c")
        .await
        .unwrap_err();
    assert!(matches!(err, AccountError::Domain(DomainError::Cancelled)));
    Ok(())
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn sqlite_backed_workflow_with_snapshots() -> AnyResult<()> {
    use eventide_domain::codec::CodecRegistry;
    use eventide_domain::persist::{SqliteEventStore, sqlite};

    let pool = sqlite::connect("sqlite::memory:").await?;
    let store = Arc::new(SqliteEventStore::new(pool, CodecRegistry::<AccountEvent>::json()));
    store.migrate().await?;

    let root = AggregateRoot::<Account, _>::new(SnapshottingAggregateRepository::new(
        store.clone(),
        SnapshotPolicy::Every(2),
    ));
    let ctx = CallContext::default();

    root.execute(&ctx, "q", open("Q", 1000), Metadata::new()).await?;
    for _ in 0..4 {
        root.execute(&ctx, "q", deposit(250), Metadata::new()).await?;
    }

    let snap: Option<Snapshot<AccountSnapshot>> = store.load_snapshot(&ctx, "Account:q").await?;
    assert_eq!(snap.expect("snapshot").version, Version::from_value(4));

    let account = root.load(&ctx, "q").await?.expect("exists");
    assert_eq!(account.balance, 2000);
    assert_eq!(account.version(), Version::from_value(5));
    Ok(())
}
