//! Intake, routing and the two-phase debit/credit handshake.
//!
//! Every status change goes through [`Lifecycle`]. A partially applied transfer is
//! always compensated before the result is returned, so callers only ever see terminal
//! outcomes or errors raised before anything was persisted.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use super::bank_registry::BankRegistry;
use super::idempotency::{IdempotencyService, IdempotencyStatus};
use super::lifecycle::{Lifecycle, Outcome};
use super::vpa_directory::VpaDirectory;
use crate::bank::{BankError, BankGateway, BankOperation, BankRequest};
use crate::domain::audit::ENTITY_TRANSACTION;
use crate::domain::coordination::ENTITY_KIND_TRANSACTION;
use crate::domain::transaction::{compensation_id, generate_rrn};
use crate::domain::{
    AuditLogEntry, Fees, NewTransaction, ResolvedVpa, Transaction, TransactionStatus,
    TransactionType,
};
use crate::error::AppError;
use crate::ports::{
    AuditRepository, IdempotencyRepository, InsertOutcome, SwitchStore, TransactionRepository,
};
use crate::schemas::{
    ProcessTransactionRequest, ReverseTransactionRequest, TransactionHistory, TransactionResult,
};
use crate::validation::signature::{canonical_payload, verify_signature};
use crate::validation::{
    normalize_vpa, sanitize_string, validate_amount, validate_currency, validate_max_len,
    validate_transaction_id, validate_vpa, ValidationError, DESCRIPTION_MAX_LEN,
};

pub const DEBIT_DECLINED: &str = "DEBIT_DECLINED";
pub const BANK_UNAVAILABLE: &str = "BANK_UNAVAILABLE";
pub const TIMEOUT: &str = "TIMEOUT";
pub const DEBIT_TIMEOUT_REVERSED: &str = "DEBIT_TIMEOUT_REVERSED";
pub const DEBIT_FAILED_REVERSED: &str = "DEBIT_FAILED_REVERSED";
pub const CREDIT_DECLINED_REVERSED: &str = "CREDIT_DECLINED_REVERSED";
pub const CREDIT_TIMEOUT_REVERSED: &str = "CREDIT_TIMEOUT_REVERSED";
pub const CREDIT_FAILED_REVERSED: &str = "CREDIT_FAILED_REVERSED";
pub const RECONCILIATION_REQUIRED: &str = "RECONCILIATION_REQUIRED";
pub const REVERSAL_FAILED: &str = "REVERSAL_FAILED";

const RRN_ATTEMPTS: usize = 3;
const REPLAY_POLL: std::time::Duration = std::time::Duration::from_millis(25);
const DEFAULT_LIST_LIMIT: i64 = 20;
const MAX_LIST_LIMIT: i64 = 100;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub transaction_ttl: Duration,
    pub signing_secret: Option<String>,
    /// How long past `expires_at` a duplicate submission waits for the owner to finish.
    pub replay_slack: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            transaction_ttl: Duration::minutes(5),
            signing_secret: None,
            replay_slack: Duration::seconds(15),
        }
    }
}

/// What an idempotency key is bound to. Recomputable from the stored row.
#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Fingerprint<'a> {
    Payment {
        transaction_id: &'a str,
        payer_vpa: &'a str,
        payee_vpa: &'a str,
        amount: i64,
        currency: &'a str,
        transaction_type: TransactionType,
        description: Option<&'a str>,
    },
    Reversal {
        transaction_id: &'a str,
        original_transaction_id: &'a str,
    },
}

impl<'a> Fingerprint<'a> {
    fn of_row(tx: &'a Transaction) -> Self {
        match (&tx.transaction_type, &tx.original_transaction_id) {
            (TransactionType::Refund, Some(original)) => Fingerprint::Reversal {
                transaction_id: &tx.transaction_id,
                original_transaction_id: original,
            },
            _ => Fingerprint::Payment {
                transaction_id: &tx.transaction_id,
                payer_vpa: &tx.payer_vpa,
                payee_vpa: &tx.payee_vpa,
                amount: tx.amount,
                currency: &tx.currency,
                transaction_type: tx.transaction_type,
                description: tx.description.as_deref(),
            },
        }
    }

    fn digest(&self) -> Result<String, AppError> {
        IdempotencyService::fingerprint(self)
    }
}

/// A payment request after normalization.
struct Intake {
    transaction_id: String,
    payer_vpa: String,
    payee_vpa: String,
    amount: i64,
    currency: String,
    transaction_type: TransactionType,
    description: Option<String>,
    signature: Option<String>,
}

impl Intake {
    fn normalize(req: ProcessTransactionRequest) -> Self {
        Self {
            transaction_id: req.transaction_id.trim().to_string(),
            payer_vpa: normalize_vpa(&req.payer_vpa),
            payee_vpa: normalize_vpa(&req.payee_vpa),
            amount: req.amount,
            currency: req.currency.trim().to_uppercase(),
            transaction_type: req.transaction_type,
            description: req
                .description
                .map(|d| sanitize_string(&d))
                .filter(|d| !d.is_empty()),
            signature: req.signature,
        }
    }

    fn fingerprint(&self) -> Fingerprint<'_> {
        Fingerprint::Payment {
            transaction_id: &self.transaction_id,
            payer_vpa: &self.payer_vpa,
            payee_vpa: &self.payee_vpa,
            amount: self.amount,
            currency: &self.currency,
            transaction_type: self.transaction_type,
            description: self.description.as_deref(),
        }
    }
}

/// What became of a compensating reversal.
#[derive(Debug, Default, Clone, Copy)]
struct Compensation {
    /// The payer bank confirmed the reversal.
    confirmed: bool,
    /// The refund row reached a terminal state.
    recorded: bool,
}

/// Answer from one leg of the handshake.
enum Leg {
    Approved,
    Declined(String),
    Failed(BankError),
}

pub struct TransactionEngine {
    store: Arc<dyn SwitchStore>,
    directory: VpaDirectory,
    registry: BankRegistry,
    gateway: Arc<BankGateway>,
    idempotency: IdempotencyService,
    lifecycle: Lifecycle,
    settings: EngineSettings,
}

impl TransactionEngine {
    pub fn new(
        store: Arc<dyn SwitchStore>,
        directory: VpaDirectory,
        registry: BankRegistry,
        gateway: Arc<BankGateway>,
        idempotency: IdempotencyService,
        lifecycle: Lifecycle,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            directory,
            registry,
            gateway,
            idempotency,
            lifecycle,
            settings,
        }
    }

    pub async fn process(&self, req: ProcessTransactionRequest) -> Result<TransactionResult, AppError> {
        let intake = Intake::normalize(req);
        let fingerprint = intake.fingerprint().digest()?;

        match self
            .idempotency
            .check(ENTITY_KIND_TRANSACTION, &intake.transaction_id, &fingerprint, Utc::now())
            .await?
        {
            IdempotencyStatus::Completed(cached) => {
                tracing::debug!(transaction_id = %intake.transaction_id, "replaying cached result");
                return decode(cached);
            }
            IdempotencyStatus::Processing => return self.await_outcome(&intake.transaction_id).await,
            IdempotencyStatus::New => {}
        }

        self.validate(&intake)?;

        let payer = self.resolve(&intake.payer_vpa).await?;
        let payee = self.resolve(&intake.payee_vpa).await?;

        let now = Utc::now();
        let tx = Transaction::new_pending(
            NewTransaction {
                transaction_id: intake.transaction_id.clone(),
                payer_vpa: intake.payer_vpa,
                payee_vpa: intake.payee_vpa,
                amount: intake.amount,
                currency: intake.currency,
                transaction_type: intake.transaction_type,
                description: intake.description,
                payer_bank_code: payer.bank_code.clone(),
                payee_bank_code: payee.bank_code.clone(),
                signature: intake.signature,
                original_transaction_id: None,
            },
            now,
            self.settings.transaction_ttl,
        );

        let tx = match self.admit(tx, fingerprint, now).await? {
            InsertOutcome::Inserted(tx) => tx,
            InsertOutcome::Duplicate(_) => return self.await_outcome(&intake.transaction_id).await,
        };

        let outcome = self.execute(tx, &payer, &payee).await?;
        self.respond(&outcome).await
    }

    /// Cancels a transaction no bank call has been dispatched for.
    pub async fn cancel(&self, transaction_id: &str) -> Result<TransactionResult, AppError> {
        let tx = self.load(transaction_id).await?;
        match tx.status {
            TransactionStatus::Cancelled => return Ok(TransactionResult::from(&tx)),
            TransactionStatus::Pending if tx.dispatched_at.is_none() => {}
            TransactionStatus::Pending => {
                return Err(AppError::InvalidState(format!(
                    "transaction {} already dispatched to the bank; await its outcome",
                    transaction_id
                )))
            }
            status => {
                return Err(AppError::InvalidState(format!(
                    "transaction {} is {}",
                    transaction_id, status
                )))
            }
        }

        let outcome = Outcome {
            error_code: Some("CANCELLED".to_string()),
            error_message: Some("cancelled by caller before dispatch".to_string()),
            require_undispatched: true,
            ..Outcome::default()
        };
        match self
            .lifecycle
            .transition(&tx, TransactionStatus::Cancelled, "cancelled by caller", outcome, Utc::now())
            .await?
        {
            Some(cancelled) => self.respond(&cancelled).await,
            None => {
                let current = self.load(transaction_id).await?;
                if current.status == TransactionStatus::Cancelled {
                    return Ok(TransactionResult::from(&current));
                }
                Err(AppError::InvalidState(format!(
                    "transaction {} was dispatched before it could be cancelled",
                    transaction_id
                )))
            }
        }
    }

    /// Refunds a SUCCESS transaction. The original becomes REVERSED only once the
    /// refund itself succeeds.
    pub async fn reverse(
        &self,
        original_id: &str,
        req: ReverseTransactionRequest,
    ) -> Result<TransactionResult, AppError> {
        let reversal_id = req.reversal_id.trim().to_string();
        validate_transaction_id("reversal_id", &reversal_id)?;
        let fingerprint = Fingerprint::Reversal {
            transaction_id: &reversal_id,
            original_transaction_id: original_id,
        }
        .digest()?;

        match self
            .idempotency
            .check(ENTITY_KIND_TRANSACTION, &reversal_id, &fingerprint, Utc::now())
            .await?
        {
            IdempotencyStatus::Completed(cached) => return decode(cached),
            IdempotencyStatus::Processing => return self.await_outcome(&reversal_id).await,
            IdempotencyStatus::New => {}
        }

        let original = self.load(original_id).await?;
        if original.status != TransactionStatus::Success {
            return Err(AppError::InvalidState(format!(
                "only SUCCESS transactions can be reversed; {} is {}",
                original_id, original.status
            )));
        }

        // Money flows back through the banks the original used: the original payee is
        // debited and the payer credited, whatever the VPAs point at today.
        let payer = self.account_at(&original.payee_vpa, &original.payee_bank_code).await?;
        let payee = self.account_at(&original.payer_vpa, &original.payer_bank_code).await?;

        let now = Utc::now();
        let refund = Transaction::new_pending(
            NewTransaction {
                transaction_id: reversal_id.clone(),
                payer_vpa: original.payee_vpa.clone(),
                payee_vpa: original.payer_vpa.clone(),
                amount: original.amount,
                currency: original.currency.clone(),
                transaction_type: TransactionType::Refund,
                description: req
                    .reason
                    .map(|r| sanitize_string(&r))
                    .filter(|r| !r.is_empty()),
                payer_bank_code: original.payee_bank_code.clone(),
                payee_bank_code: original.payer_bank_code.clone(),
                signature: None,
                original_transaction_id: Some(original.transaction_id.clone()),
            },
            now,
            self.settings.transaction_ttl,
        );

        let refund = match self.admit(refund, fingerprint, now).await? {
            InsertOutcome::Inserted(refund) => refund,
            InsertOutcome::Duplicate(_) => return self.await_outcome(&reversal_id).await,
        };

        let refund = self.execute(refund, &payer, &payee).await?;
        if refund.status == TransactionStatus::Success {
            let outcome = Outcome {
                keep_processed_at: true,
                correlation_id: Some(refund.transaction_id.clone()),
                ..Outcome::default()
            };
            self.lifecycle
                .finalize(&original, TransactionStatus::Reversed, "reversal succeeded", outcome)
                .await?;
        } else {
            tracing::warn!(
                transaction_id = %original.transaction_id,
                reversal_id = %refund.transaction_id,
                status = %refund.status,
                "reversal did not succeed; original left unchanged"
            );
        }
        self.respond(&refund).await
    }

    pub async fn get_status(&self, transaction_id: &str) -> Result<TransactionResult, AppError> {
        Ok(TransactionResult::from(&self.load(transaction_id).await?))
    }

    pub async fn get_by_rrn(&self, rrn: &str) -> Result<TransactionResult, AppError> {
        self.store
            .get_transaction_by_rrn(rrn)
            .await?
            .map(|tx| TransactionResult::from(&tx))
            .ok_or_else(|| AppError::NotFound(format!("transaction with rrn {}", rrn)))
    }

    pub async fn list_by_vpa(&self, vpa: &str, limit: Option<i64>) -> Result<Vec<TransactionResult>, AppError> {
        let vpa = normalize_vpa(vpa);
        validate_vpa("vpa", &vpa)?;
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let rows = self.store.list_transactions_by_vpa(&vpa, limit).await?;
        Ok(rows.iter().map(TransactionResult::from).collect())
    }

    pub async fn history(&self, transaction_id: &str) -> Result<TransactionHistory, AppError> {
        let transaction = self.load(transaction_id).await?;
        let state_changes = self.store.state_changes(transaction_id).await?;
        let audit = self.store.audit_trail(ENTITY_TRANSACTION, transaction_id).await?;
        Ok(TransactionHistory {
            transaction,
            state_changes,
            audit,
        })
    }

    fn validate(&self, intake: &Intake) -> Result<(), AppError> {
        validate_transaction_id("transaction_id", &intake.transaction_id)?;
        validate_vpa("payer_vpa", &intake.payer_vpa)?;
        validate_vpa("payee_vpa", &intake.payee_vpa)?;
        if intake.payer_vpa == intake.payee_vpa {
            return Err(ValidationError::new("payee_vpa", "must differ from payer_vpa").into());
        }
        validate_amount(intake.amount)?;
        validate_currency(&intake.currency)?;
        if intake.transaction_type == TransactionType::Refund {
            return Err(ValidationError::new(
                "transaction_type",
                "refunds are created through the reversal operation",
            )
            .into());
        }
        if let Some(description) = &intake.description {
            validate_max_len("description", description, DESCRIPTION_MAX_LEN)?;
        }

        if let Some(secret) = &self.settings.signing_secret {
            let signature = intake
                .signature
                .as_deref()
                .ok_or_else(|| ValidationError::new("signature", "is required"))?;
            let payload = canonical_payload(
                &intake.transaction_id,
                &intake.payer_vpa,
                &intake.payee_vpa,
                intake.amount,
                &intake.currency,
            );
            verify_signature(secret, &payload, signature)?;
        }
        Ok(())
    }

    async fn resolve(&self, vpa: &str) -> Result<ResolvedVpa, AppError> {
        self.directory
            .resolve(vpa)
            .await?
            .ok_or_else(|| AppError::VpaNotFound(vpa.to_string()))
    }

    async fn account_at(&self, vpa: &str, bank_code: &str) -> Result<ResolvedVpa, AppError> {
        self.directory
            .account_at(vpa, bank_code)
            .await?
            .ok_or_else(|| AppError::VpaNotFound(format!("{} at {}", vpa, bank_code)))
    }

    async fn load(&self, transaction_id: &str) -> Result<Transaction, AppError> {
        self.store
            .get_transaction(transaction_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {}", transaction_id)))
    }

    /// Persists the PENDING row and its idempotency key together. A duplicate whose
    /// payload differs is a conflict.
    async fn admit(
        &self,
        tx: Transaction,
        fingerprint: String,
        now: DateTime<Utc>,
    ) -> Result<InsertOutcome, AppError> {
        let key = self
            .idempotency
            .new_key(ENTITY_KIND_TRANSACTION, &tx.transaction_id, fingerprint.clone(), now);
        let audit = AuditLogEntry::new(ENTITY_TRANSACTION, tx.transaction_id.clone(), "CREATE")
            .with_values(
                None,
                Some(json!({
                    "status": tx.status,
                    "transaction_type": tx.transaction_type,
                    "amount": tx.amount,
                    "payer_bank_code": tx.payer_bank_code,
                    "payee_bank_code": tx.payee_bank_code,
                    "original_transaction_id": tx.original_transaction_id,
                })),
            )
            .with_correlation(
                tx.original_transaction_id
                    .clone()
                    .unwrap_or_else(|| tx.transaction_id.clone()),
            );

        let outcome = self.store.insert_pending(&tx, &key, &audit).await?;
        if let InsertOutcome::Duplicate(existing) = &outcome {
            if Fingerprint::of_row(existing).digest()? != fingerprint {
                return Err(AppError::Conflict(format!(
                    "transaction {} was already submitted with a different payload",
                    existing.transaction_id
                )));
            }
            tracing::info!(transaction_id = %existing.transaction_id, "concurrent duplicate submission");
        } else {
            tracing::info!(
                transaction_id = %tx.transaction_id,
                amount = tx.amount,
                payer_bank_code = %tx.payer_bank_code,
                payee_bank_code = %tx.payee_bank_code,
                "transaction admitted"
            );
        }
        Ok(outcome)
    }

    /// Waits for the submission that owns `transaction_id` to reach a terminal state.
    async fn await_outcome(&self, transaction_id: &str) -> Result<TransactionResult, AppError> {
        loop {
            let tx = self.load(transaction_id).await?;
            if tx.status.is_terminal() {
                let key_hash = IdempotencyService::key_hash(ENTITY_KIND_TRANSACTION, transaction_id);
                if let Some(cached) = self
                    .store
                    .get_key(&key_hash)
                    .await?
                    .and_then(|key| key.response)
                {
                    return decode(cached);
                }
                return Ok(TransactionResult::from(&tx));
            }
            if Utc::now() > tx.expires_at + self.settings.replay_slack {
                return Err(AppError::Timeout(format!(
                    "transaction {} is still being finalized; retry with the same id",
                    transaction_id
                )));
            }
            tokio::time::sleep(REPLAY_POLL).await;
        }
    }

    /// Drives an admitted PENDING transaction to a terminal state.
    async fn execute(
        &self,
        tx: Transaction,
        payer: &ResolvedVpa,
        payee: &ResolvedVpa,
    ) -> Result<Transaction, AppError> {
        let now = Utc::now();
        if tx.is_expired(now) {
            return self
                .lifecycle
                .finalize(
                    &tx,
                    TransactionStatus::Timeout,
                    "expired before dispatch",
                    Outcome::failure(TIMEOUT, "transaction expired before any bank call"),
                )
                .await;
        }

        for bank_code in [&tx.payer_bank_code, &tx.payee_bank_code] {
            match self.registry.route(bank_code, now).await {
                Ok(_) => {}
                Err(AppError::Unavailable(reason)) => {
                    tracing::warn!(transaction_id = %tx.transaction_id, bank_code = %bank_code, %reason, "routing refused");
                    return self
                        .lifecycle
                        .finalize(
                            &tx,
                            TransactionStatus::Failed,
                            "bank unavailable",
                            Outcome::failure(BANK_UNAVAILABLE, reason),
                        )
                        .await;
                }
                Err(e) => return Err(e),
            }
        }

        if !self.store.mark_dispatched(&tx.transaction_id, now).await? {
            // Cancelled, swept or owned by another worker in the meantime.
            return self.load(&tx.transaction_id).await;
        }

        let debit = self
            .leg(BankOperation::Debit, &tx, payer, &tx.payee_vpa, Some(tx.expires_at))
            .await;
        match debit {
            Leg::Approved => {}
            Leg::Declined(reason) => {
                return self
                    .lifecycle
                    .finalize(
                        &tx,
                        TransactionStatus::Failed,
                        "debit declined",
                        Outcome::failure(DEBIT_DECLINED, reason),
                    )
                    .await;
            }
            Leg::Failed(e @ (BankError::CircuitOpen(_) | BankError::UnknownBank(_))) => {
                return self
                    .lifecycle
                    .finalize(
                        &tx,
                        TransactionStatus::Failed,
                        "payer bank unreachable",
                        Outcome::failure(BANK_UNAVAILABLE, e.to_string()),
                    )
                    .await;
            }
            Leg::Failed(e) => {
                // The debit may or may not have been applied.
                let code = match e {
                    BankError::Timeout(_) => DEBIT_TIMEOUT_REVERSED,
                    _ => DEBIT_FAILED_REVERSED,
                };
                return self.compensate(&tx, payer, code, e.to_string()).await;
            }
        }

        let credit = self
            .leg(BankOperation::Credit, &tx, payee, &tx.payer_vpa, Some(tx.expires_at))
            .await;
        match credit {
            Leg::Approved => self.complete(&tx).await,
            Leg::Declined(reason) => self.compensate(&tx, payer, CREDIT_DECLINED_REVERSED, reason).await,
            Leg::Failed(e @ BankError::Timeout(_)) => {
                self.compensate(&tx, payer, CREDIT_TIMEOUT_REVERSED, e.to_string()).await
            }
            Leg::Failed(e) => self.compensate(&tx, payer, CREDIT_FAILED_REVERSED, e.to_string()).await,
        }
    }

    async fn leg(
        &self,
        operation: BankOperation,
        tx: &Transaction,
        account: &ResolvedVpa,
        counterparty_vpa: &str,
        not_after: Option<DateTime<Utc>>,
    ) -> Leg {
        let request = BankRequest {
            transaction_id: tx.transaction_id.clone(),
            original_transaction_id: tx.original_transaction_id.clone(),
            bank_code: account.bank_code.clone(),
            account_number: account.account_number.clone(),
            counterparty_vpa: counterparty_vpa.to_string(),
            amount: tx.amount,
            currency: tx.currency.clone(),
            deadline: not_after,
        };
        match self.gateway.call(operation, &request, not_after).await {
            Ok(response) if response.approved => Leg::Approved,
            Ok(response) => Leg::Declined(
                response
                    .error_message
                    .or(response.error_code)
                    .unwrap_or_else(|| format!("{} declined", operation)),
            ),
            Err(e) => Leg::Failed(e),
        }
    }

    async fn complete(&self, tx: &Transaction) -> Result<Transaction, AppError> {
        let fees = match tx.transaction_type {
            TransactionType::Refund => Fees::default(),
            _ => Fees::for_amount(tx.amount),
        };
        for attempt in 1..=RRN_ATTEMPTS {
            let outcome = Outcome {
                rrn: Some(generate_rrn(Utc::now())),
                fees: Some(fees),
                ..Outcome::default()
            };
            match self
                .lifecycle
                .finalize(tx, TransactionStatus::Success, "debit and credit confirmed", outcome)
                .await
            {
                Err(AppError::Conflict(msg)) if attempt < RRN_ATTEMPTS => {
                    tracing::warn!(transaction_id = %tx.transaction_id, %msg, "rrn collision, regenerating");
                }
                result => return result,
            }
        }
        Err(AppError::Internal(format!(
            "could not assign a unique rrn to {}",
            tx.transaction_id
        )))
    }

    /// Undoes a debit whose transfer could not be completed, then fails the transaction.
    async fn compensate(
        &self,
        tx: &Transaction,
        payer: &ResolvedVpa,
        code: &str,
        cause: String,
    ) -> Result<Transaction, AppError> {
        tracing::warn!(
            transaction_id = %tx.transaction_id,
            error_code = code,
            %cause,
            "partial transfer, issuing compensating reversal"
        );

        let compensation = match self.issue_reversal(tx, payer).await {
            Ok(compensation) => compensation,
            Err(e) => {
                tracing::error!(transaction_id = %tx.transaction_id, error = %e, "compensation could not be completed");
                Compensation::default()
            }
        };

        let refund_id = compensation_id(&tx.transaction_id);
        let outcome = if !compensation.confirmed {
            tracing::error!(
                transaction_id = %tx.transaction_id,
                error_code = RECONCILIATION_REQUIRED,
                "compensating reversal failed; manual reconciliation required"
            );
            Outcome {
                needs_reconciliation: true,
                correlation_id: Some(refund_id),
                ..Outcome::failure(
                    RECONCILIATION_REQUIRED,
                    format!("{} ({}); compensating reversal failed", code, cause),
                )
            }
        } else if !compensation.recorded {
            tracing::error!(
                transaction_id = %tx.transaction_id,
                refund_id = %refund_id,
                "debit reversed but the compensating refund is not on record"
            );
            Outcome {
                needs_reconciliation: true,
                correlation_id: Some(refund_id),
                ..Outcome::failure(code, cause)
            }
        } else {
            Outcome {
                correlation_id: Some(refund_id),
                ..Outcome::failure(code, cause)
            }
        };
        self.lifecycle
            .finalize(tx, TransactionStatus::Failed, "compensated", outcome)
            .await
    }

    /// Reverses the payer's debit and records it as a REFUND booked against the payer
    /// bank. The reversal is sent even when the refund row cannot be written.
    async fn issue_reversal(&self, tx: &Transaction, payer: &ResolvedVpa) -> Result<Compensation, AppError> {
        let now = Utc::now();
        let refund_id = compensation_id(&tx.transaction_id);
        let refund = Transaction::new_pending(
            NewTransaction {
                transaction_id: refund_id.clone(),
                payer_vpa: tx.payer_vpa.clone(),
                payee_vpa: tx.payer_vpa.clone(),
                amount: tx.amount,
                currency: tx.currency.clone(),
                transaction_type: TransactionType::Refund,
                description: Some("compensating reversal".to_string()),
                payer_bank_code: tx.payer_bank_code.clone(),
                payee_bank_code: tx.payer_bank_code.clone(),
                signature: None,
                original_transaction_id: Some(tx.transaction_id.clone()),
            },
            now,
            self.settings.transaction_ttl,
        );
        let fingerprint = Fingerprint::of_row(&refund).digest()?;

        let recorded = match self.admit(refund, fingerprint, now).await {
            Ok(InsertOutcome::Inserted(refund)) => match self.store.mark_dispatched(&refund_id, now).await {
                Ok(true) => Some(refund),
                Ok(false) => {
                    tracing::warn!(refund_id = %refund_id, "compensating refund left PENDING before dispatch");
                    None
                }
                Err(e) => {
                    tracing::error!(refund_id = %refund_id, error = %e, "could not mark compensating refund dispatched");
                    None
                }
            },
            Ok(InsertOutcome::Duplicate(existing)) if existing.status.is_terminal() => {
                return Ok(Compensation {
                    confirmed: existing.status == TransactionStatus::Success,
                    recorded: true,
                });
            }
            Ok(InsertOutcome::Duplicate(_)) => None,
            Err(e) => {
                tracing::error!(refund_id = %refund_id, error = %e, "compensating refund could not be recorded");
                None
            }
        };

        // No expiry cap: the debit must be undone however late it is.
        let request = BankRequest {
            transaction_id: refund_id.clone(),
            original_transaction_id: Some(tx.transaction_id.clone()),
            bank_code: payer.bank_code.clone(),
            account_number: payer.account_number.clone(),
            counterparty_vpa: tx.payee_vpa.clone(),
            amount: tx.amount,
            currency: tx.currency.clone(),
            deadline: None,
        };
        let confirmed = match self.gateway.call(BankOperation::Reversal, &request, None).await {
            Ok(response) if response.approved => Ok(()),
            Ok(response) => Err(response
                .error_message
                .or(response.error_code)
                .unwrap_or_else(|| "reversal declined".to_string())),
            Err(e) => Err(e.to_string()),
        };

        let Some(refund) = recorded else {
            return Ok(Compensation {
                confirmed: confirmed.is_ok(),
                recorded: false,
            });
        };
        let refund = match confirmed {
            Ok(()) => {
                let outcome = Outcome {
                    rrn: Some(generate_rrn(Utc::now())),
                    correlation_id: Some(tx.transaction_id.clone()),
                    ..Outcome::default()
                };
                self.lifecycle
                    .finalize(&refund, TransactionStatus::Success, "reversal confirmed", outcome)
                    .await?
            }
            Err(reason) => {
                let outcome = Outcome {
                    needs_reconciliation: true,
                    correlation_id: Some(tx.transaction_id.clone()),
                    ..Outcome::failure(REVERSAL_FAILED, reason)
                };
                self.lifecycle
                    .finalize(&refund, TransactionStatus::Failed, "reversal failed", outcome)
                    .await?
            }
        };
        self.cache_result(&refund).await;
        Ok(Compensation {
            confirmed: refund.status == TransactionStatus::Success,
            recorded: true,
        })
    }

    /// Caches the terminal result under its key and returns it.
    async fn respond(&self, tx: &Transaction) -> Result<TransactionResult, AppError> {
        if !tx.status.is_terminal() {
            return Err(AppError::Internal(format!(
                "transaction {} left {}",
                tx.transaction_id, tx.status
            )));
        }
        let result = TransactionResult::from(tx);
        let value = serde_json::to_value(&result)
            .map_err(|e| AppError::Internal(format!("Failed to encode result: {}", e)))?;
        self.idempotency
            .complete(ENTITY_KIND_TRANSACTION, &tx.transaction_id, &value)
            .await?;
        Ok(result)
    }

    async fn cache_result(&self, tx: &Transaction) {
        if let Err(e) = self.respond(tx).await {
            tracing::warn!(transaction_id = %tx.transaction_id, error = %e, "failed to cache result");
        }
    }
}

fn decode(cached: serde_json::Value) -> Result<TransactionResult, AppError> {
    serde_json::from_value(cached)
        .map_err(|e| AppError::Internal(format!("Corrupt cached result: {}", e)))
}
