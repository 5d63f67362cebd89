use anyhow::Context;
use eventide_domain::aggregate::{Aggregate, AggregateBase, SnapshotAggregate};
use eventide_domain::aggregate_root::AggregateRoot;
use eventide_domain::codec::CodecRegistry;
use eventide_domain::context::CallContext;
use eventide_domain::domain_event::{Metadata, context_metadata};
use eventide_domain::error::DomainError;
use eventide_domain::persist::{
    AggregateRepository, SnapshotPolicy, SnapshottingAggregateRepository, SqliteEventStore,
    StoreConfig, sqlite,
};
use eventide_macros::event;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum AccountError {
    #[error("account already opened")]
    AlreadyOpened,
    #[error("account not opened")]
    NotOpened,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("invalid amount: {0}")]
    InvalidAmount(i64),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Debug)]
enum AccountCommand {
    Open { owner: String, initial: i64 },
    Deposit { amount: i64 },
    Withdraw { amount: i64 },
}

#[event]
enum AccountEvent {
    #[event(event_type = "AccountOpened")]
    Opened { owner: String, initial: i64 },
    #[event(event_type = "MoneyDeposited")]
    Deposited { amount: i64 },
    #[event(event_type = "MoneyWithdrawn")]
    Withdrawn { amount: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AccountSnapshot {
    owner: String,
    balance: i64,
    opened: bool,
}

#[derive(Debug)]
struct Account {
    base: AggregateBase<AccountEvent>,
    owner: String,
    balance: i64,
    opened: bool,
}

impl Aggregate for Account {
    const TYPE: &'static str = "account";

    type Command = AccountCommand;
    type Event = AccountEvent;
    type Error = AccountError;

    fn new(stream_id: String) -> Self {
        Self {
            base: AggregateBase::new(stream_id),
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
            AccountEvent::Opened { owner, initial } => {
                self.owner = owner.clone();
                self.balance = *initial;
                self.opened = true;
            }
            AccountEvent::Deposited { amount } => self.balance += amount,
            AccountEvent::Withdrawn { amount } => self.balance -= amount,
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
                self.raise(AccountEvent::Opened { owner, initial });
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
            AccountCommand::Withdraw { amount } => {
                if !self.opened {
                    return Err(AccountError::NotOpened);
                }
                if amount <= 0 {
                    return Err(AccountError::InvalidAmount(amount));
                }
                if self.balance < amount {
                    return Err(AccountError::InsufficientFunds);
                }
                self.raise(AccountEvent::Withdrawn { amount });
            }
        }
        Ok(())
    }
}

impl SnapshotAggregate for Account {
    type Snapshot = AccountSnapshot;

    fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            owner: self.owner.clone(),
            balance: self.balance,
            opened: self.opened,
        }
    }

    fn apply_snapshot(&mut self, snapshot: AccountSnapshot) {
        self.owner = snapshot.owner;
        self.balance = snapshot.balance;
        self.opened = snapshot.opened;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite::memory:".to_string());
    let pool = sqlite::connect(&url)
        .await
        .with_context(|| format!("connect {url}"))?;

    // 追加时把调用上下文中的关联 ID、执行者等写入元数据
    let config = StoreConfig::builder()
        .metadata_extractor(Arc::new(context_metadata))
        .build();
    let store = Arc::new(SqliteEventStore::with_config(
        pool,
        CodecRegistry::<AccountEvent>::json(),
        config,
    ));
    store.migrate().await?;

    let repo = Arc::new(SnapshottingAggregateRepository::new(
        store.clone(),
        SnapshotPolicy::Every(2),
    ));
    let root = AggregateRoot::<Account, _>::new(repo.clone());

    let id = uuid::Uuid::now_v7().to_string();
    let ctx = CallContext::builder()
        .correlation_id(uuid::Uuid::now_v7().to_string())
        .actor_type("user".to_string())
        .actor_id("u1".to_string())
        .tenant_id("t1".to_string())
        .build()
        .with_timeout(Duration::from_secs(5));
    let md = Metadata::new().with("source", "demo");

    // 开户
    let version = root
        .execute(
            &ctx,
            &id,
            AccountCommand::Open {
                owner: "Taro".to_string(),
                initial: 1000,
            },
            md.clone(),
        )
        .await?;
    info!(%id, %version, "account opened");

    // 存款
    let version = root
        .execute(&ctx, &id, AccountCommand::Deposit { amount: 500 }, md.clone())
        .await?;
    info!(%id, %version, "money deposited");

    // 余额不足：领域规则拒绝，不写入任何事件
    match root
        .execute(&ctx, &id, AccountCommand::Withdraw { amount: 10_000 }, md.clone())
        .await
    {
        Err(AccountError::InsufficientFunds) => warn!(%id, "withdrawal rejected"),
        other => anyhow::bail!("unexpected result: {other:?}"),
    }

    // 两个实例基于同一版本并发修改：后保存者得到版本冲突，重新加载后重试
    let mut first: Account = repo.load(&ctx, &id).await?.context("account missing")?;
    let mut second: Account = repo.load(&ctx, &id).await?.context("account missing")?;
    first.handle(AccountCommand::Withdraw { amount: 200 })?;
    second.handle(AccountCommand::Deposit { amount: 50 })?;
    repo.save(&ctx, &mut first, md.clone()).await?;
    match repo.save(&ctx, &mut second, md.clone()).await {
        Err(AccountError::Domain(err)) if err.is_version_conflict() => {
            warn!(%err, "stale instance, retrying");
            root.execute(&ctx, &id, AccountCommand::Deposit { amount: 50 }, md.clone())
                .await?;
        }
        other => anyhow::bail!("expected a version conflict, got {other:?}"),
    }

    // 重新加载（快照 + 增量事件）
    let account = root.load(&ctx, &id).await?.context("account missing")?;
    info!(
        %id,
        owner = %account.owner,
        balance = account.balance,
        version = %account.version(),
        "account restored"
    );
    println!(
        "account {id}: owner={}, balance={}, version={}",
        account.owner,
        account.balance,
        account.version()
    );

    Ok(())
}
