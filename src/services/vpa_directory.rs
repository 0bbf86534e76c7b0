use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use super::vpa_cache::VpaCache;
use crate::domain::audit::ENTITY_VPA;
use crate::domain::{AuditLogEntry, ResolvedVpa, VpaMapping};
use crate::error::AppError;
use crate::ports::{BankRepository, SwitchStore, VpaRepository};
use crate::schemas::RegisterVpaRequest;
use crate::validation::{
    normalize_vpa, sanitize_string, validate_account_number, validate_bank_code, validate_max_len,
    validate_required, validate_vpa, HOLDER_NAME_MAX_LEN,
};

/// VPA resolution, cache-first over the durable mapping.
///
/// Writes go to the store first and only then touch the cache, so a failed write can
/// never leave a cached mapping the store does not have.
#[derive(Clone)]
pub struct VpaDirectory {
    store: Arc<dyn SwitchStore>,
    cache: Arc<dyn VpaCache>,
    ttl: Duration,
}

impl VpaDirectory {
    pub fn new(store: Arc<dyn SwitchStore>, cache: Arc<dyn VpaCache>, ttl: Duration) -> Self {
        Self { store, cache, ttl }
    }

    /// Unknown and deactivated VPAs both resolve to `None`; misses are not cached.
    pub async fn resolve(&self, vpa: &str) -> Result<Option<ResolvedVpa>, AppError> {
        let vpa = normalize_vpa(vpa);

        match self.cache.get(&vpa).await {
            Ok(Some(hit)) if hit.is_active => return Ok(Some(hit)),
            Ok(_) => {}
            Err(e) => tracing::warn!(vpa = %vpa, error = %e, "VPA cache read failed, using store"),
        }

        let mapping = match self.store.get_active_vpa(&vpa).await? {
            Some(mapping) => mapping,
            None => return Ok(None),
        };
        let resolved = ResolvedVpa::from(&mapping);

        if let Err(e) = self.cache.set(&vpa, &resolved, self.ttl).await {
            tracing::warn!(vpa = %vpa, error = %e, "VPA cache write failed");
        }
        Ok(Some(resolved))
    }

    /// The account `vpa` is held under at `bank_code`: the live mapping when it still
    /// points there, otherwise the newest mapping the VPA ever had at that bank.
    pub async fn account_at(&self, vpa: &str, bank_code: &str) -> Result<Option<ResolvedVpa>, AppError> {
        let vpa = normalize_vpa(vpa);
        if let Some(active) = self.resolve(&vpa).await? {
            if active.bank_code == bank_code {
                return Ok(Some(active));
            }
        }
        Ok(self
            .store
            .vpa_mapping_at_bank(&vpa, bank_code)
            .await?
            .map(|mapping| ResolvedVpa::from(&mapping)))
    }

    /// Registers or re-points a VPA. Any previous active mapping is deactivated in the
    /// same unit of work.
    pub async fn register(&self, req: RegisterVpaRequest) -> Result<ResolvedVpa, AppError> {
        let vpa = normalize_vpa(&req.vpa);
        validate_vpa("vpa", &vpa)?;
        validate_bank_code(&req.bank_code)?;
        validate_account_number(&req.account_number)?;
        let holder_name = sanitize_string(&req.holder_name);
        validate_required("holder_name", &holder_name)?;
        validate_max_len("holder_name", &holder_name, HOLDER_NAME_MAX_LEN)?;

        if self.store.get_bank(&req.bank_code).await?.is_none() {
            return Err(AppError::NotFound(format!("bank {}", req.bank_code)));
        }

        let mapping = VpaMapping::new(
            vpa.clone(),
            req.bank_code,
            req.account_number,
            holder_name,
            req.mobile.map(|m| sanitize_string(&m)),
        );
        let audit = AuditLogEntry::new(ENTITY_VPA, vpa.clone(), "REGISTER").with_values(
            None,
            Some(json!({
                "bank_code": mapping.bank_code,
                "account_number": mapping.account_number,
            })),
        );

        let replaced = self.store.register_vpa(&mapping, &audit).await?;
        self.invalidate(&vpa).await;

        match replaced {
            Some(old) => tracing::info!(
                vpa = %vpa,
                old_bank_code = %old.bank_code,
                bank_code = %mapping.bank_code,
                "VPA mapping replaced"
            ),
            None => tracing::info!(vpa = %vpa, bank_code = %mapping.bank_code, "VPA registered"),
        }
        Ok(ResolvedVpa::from(&mapping))
    }

    pub async fn deactivate(&self, vpa: &str) -> Result<(), AppError> {
        let vpa = normalize_vpa(vpa);
        let audit = AuditLogEntry::new(ENTITY_VPA, vpa.clone(), "DEACTIVATE");
        if !self.store.deactivate_vpa(&vpa, &audit).await? {
            return Err(AppError::NotFound(format!("active VPA {}", vpa)));
        }
        self.invalidate(&vpa).await;
        tracing::info!(vpa = %vpa, "VPA deactivated");
        Ok(())
    }

    async fn invalidate(&self, vpa: &str) {
        if let Err(e) = self.cache.invalidate(vpa).await {
            tracing::warn!(vpa, error = %e, "VPA cache invalidation failed");
        }
    }
}
