use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A VPA bound to one bank account. At most one active mapping exists per VPA;
/// old mappings are deactivated, never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpaMapping {
    pub id: Uuid,
    pub vpa: String,
    pub bank_code: String,
    pub account_number: String,
    pub holder_name: String,
    pub mobile: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VpaMapping {
    pub fn new(
        vpa: String,
        bank_code: String,
        account_number: String,
        holder_name: String,
        mobile: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            vpa,
            bank_code,
            account_number,
            holder_name,
            mobile,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What callers learn from a resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVpa {
    pub vpa: String,
    pub bank_code: String,
    pub account_number: String,
    pub holder_name: String,
    pub is_active: bool,
}

impl From<&VpaMapping> for ResolvedVpa {
    fn from(mapping: &VpaMapping) -> Self {
        Self {
            vpa: mapping.vpa.clone(),
            bank_code: mapping.bank_code.clone(),
            account_number: mapping.account_number.clone(),
            holder_name: mapping.holder_name.clone(),
            is_active: mapping.is_active,
        }
    }
}
