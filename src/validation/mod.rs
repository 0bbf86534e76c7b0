use std::fmt;

use crate::domain::transaction::{COMPENSATION_SUFFIX, CURRENCY_INR};
use crate::error::AppError;

pub mod signature;

pub const VPA_MIN_LEN: usize = 3;
pub const VPA_MAX_LEN: usize = 255;
pub const TRANSACTION_ID_MAX_LEN: usize = 64;
/// Largest single transfer in minor units (1 crore rupees).
pub const MAX_AMOUNT: i64 = 1_000_000_000;
pub const DESCRIPTION_MAX_LEN: usize = 255;
pub const BANK_CODE_MAX_LEN: usize = 11;
pub const ACCOUNT_NUMBER_MAX_LEN: usize = 34;
pub const HOLDER_NAME_MAX_LEN: usize = 140;
pub const ALLOWED_CURRENCIES: &[&str] = &[CURRENCY_INR];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_enum(field: &'static str, value: &str, allowed: &[&str]) -> ValidationResult {
    if allowed.iter().all(|candidate| value != *candidate) {
        return Err(ValidationError::new(
            field,
            format!("must be one of: {}", allowed.join(", ")),
        ));
    }

    Ok(())
}

/// Lower-cases and trims a VPA before it is validated or looked up.
pub fn normalize_vpa(vpa: &str) -> String {
    vpa.trim().to_lowercase()
}

/// `handle@psp`: handle is `[a-z0-9._-]`, psp is `[a-z0-9]`.
pub fn validate_vpa(field: &'static str, vpa: &str) -> ValidationResult {
    validate_required(field, vpa)?;
    if vpa.len() < VPA_MIN_LEN || vpa.len() > VPA_MAX_LEN {
        return Err(ValidationError::new(
            field,
            format!("must be {}-{} characters", VPA_MIN_LEN, VPA_MAX_LEN),
        ));
    }

    let Some((handle, psp)) = vpa.split_once('@') else {
        return Err(ValidationError::new(field, "must look like handle@psp"));
    };
    if handle.is_empty() || psp.is_empty() {
        return Err(ValidationError::new(field, "must look like handle@psp"));
    }
    if !handle
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || matches!(ch, '.' | '_' | '-'))
    {
        return Err(ValidationError::new(field, "handle contains invalid characters"));
    }
    if !psp.chars().all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit()) {
        return Err(ValidationError::new(field, "psp contains invalid characters"));
    }

    Ok(())
}

pub fn validate_transaction_id(field: &'static str, id: &str) -> ValidationResult {
    validate_required(field, id)?;
    validate_max_len(field, id, TRANSACTION_ID_MAX_LEN)?;
    if !id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
    {
        return Err(ValidationError::new(
            field,
            "must contain only letters, digits, '-' and '_'",
        ));
    }
    if id.ends_with(COMPENSATION_SUFFIX) {
        return Err(ValidationError::new(
            field,
            format!("must not end with the reserved suffix {}", COMPENSATION_SUFFIX),
        ));
    }

    Ok(())
}

pub fn validate_amount(amount: i64) -> ValidationResult {
    if amount <= 0 {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }
    if amount > MAX_AMOUNT {
        return Err(ValidationError::new(
            "amount",
            format!("must not exceed {}", MAX_AMOUNT),
        ));
    }

    Ok(())
}

pub fn validate_currency(currency: &str) -> ValidationResult {
    validate_enum("currency", currency, ALLOWED_CURRENCIES)
}

pub fn validate_bank_code(bank_code: &str) -> ValidationResult {
    validate_required("bank_code", bank_code)?;
    validate_max_len("bank_code", bank_code, BANK_CODE_MAX_LEN)?;
    if !bank_code
        .chars()
        .all(|ch| ch.is_ascii_uppercase() || ch.is_ascii_digit())
    {
        return Err(ValidationError::new(
            "bank_code",
            "must contain only uppercase letters and digits",
        ));
    }

    Ok(())
}

pub fn validate_account_number(account_number: &str) -> ValidationResult {
    validate_required("account_number", account_number)?;
    validate_max_len("account_number", account_number, ACCOUNT_NUMBER_MAX_LEN)?;
    if !account_number.chars().all(|ch| ch.is_ascii_alphanumeric()) {
        return Err(ValidationError::new(
            "account_number",
            "must be alphanumeric",
        ));
    }

    Ok(())
}

pub fn validate_endpoint(endpoint: &str) -> ValidationResult {
    let parsed = url::Url::parse(endpoint)
        .map_err(|e| ValidationError::new("endpoint", format!("is not a valid URL: {}", e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ValidationError::new("endpoint", "must be http or https"));
    }

    Ok(())
}
