pub mod bank_registry;
pub mod events;
pub mod idempotency;
pub mod lifecycle;
pub mod lock_manager;
pub mod scheduler;
pub mod settlement;
pub mod timeout_sweeper;
pub mod transaction_engine;
pub mod vpa_cache;
pub mod vpa_directory;

pub use bank_registry::BankRegistry;
pub use events::{EventBus, TransactionEvent};
pub use idempotency::{IdempotencyService, IdempotencyStatus};
pub use lifecycle::{Lifecycle, Outcome};
pub use lock_manager::{LockGuard, LockManager};
pub use scheduler::SettlementScheduler;
pub use settlement::SettlementService;
pub use timeout_sweeper::{SweepReport, TimeoutSweeper};
pub use transaction_engine::{EngineSettings, TransactionEngine};
pub use vpa_cache::{InMemoryVpaCache, RedisVpaCache, VpaCache};
pub use vpa_directory::VpaDirectory;
