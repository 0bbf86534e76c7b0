//! Switch domain entities, free of storage and transport concerns.

pub mod audit;
pub mod bank;
pub mod coordination;
pub mod settlement;
pub mod transaction;
pub mod vpa;

pub use audit::{AuditLogEntry, StateChange};
pub use bank::{Bank, BankStatus, HealthSample, Routing, RoutingPolicy};
pub use coordination::{DistributedLock, IdempotencyKey};
pub use settlement::{BankSettlement, BatchStatus, NetPositions, SettlementBatch};
pub use transaction::{Fees, NewTransaction, Transaction, TransactionStatus, TransactionType};
pub use vpa::{ResolvedVpa, VpaMapping};
