//! External license record validation.
//!
//! The external system of record ("AppCount") mixes key casing and field
//! types across its export endpoints, so the raw record is deserialized
//! with serde aliases for every casing variant and loosely-typed values
//! for fields that arrive as either numbers or numeric strings.
//! [`validate_license`] coerces, trims, and range-checks one record into
//! a [`SanitizedLicenseRecord`]; [`validate_licenses`] runs a whole batch
//! and keeps going past per-record failures.
//!
//! Field-level schema violations are errors. Business-rule violations
//! (an active license missing its activation date, SMS balance above the
//! purchased amount) are warnings. The one cross-field hard error is an
//! expiration date at or before the activation date.

use chrono::{NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Field limits and allow-lists
// ---------------------------------------------------------------------------

/// Maximum length for the DBA ("doing business as") name.
pub const MAX_DBA_LEN: usize = 255;

/// Maximum length for an email address (RFC 5321 limit).
pub const MAX_EMAIL_LEN: usize = 254;

/// Valid license types accepted from the external source.
pub const LICENSE_TYPE_TRIAL: &str = "trial";
pub const LICENSE_TYPE_STANDARD: &str = "standard";
pub const LICENSE_TYPE_PREMIUM: &str = "premium";
pub const LICENSE_TYPE_ENTERPRISE: &str = "enterprise";

/// All valid external license types.
pub const VALID_LICENSE_TYPES: &[&str] = &[
    LICENSE_TYPE_TRIAL,
    LICENSE_TYPE_STANDARD,
    LICENSE_TYPE_PREMIUM,
    LICENSE_TYPE_ENTERPRISE,
];

/// External status convention: 0 = inactive, 1 = active.
pub const EXTERNAL_STATUS_INACTIVE: i16 = 0;
pub const EXTERNAL_STATUS_ACTIVE: i16 = 1;

/// ZIP code pattern: `NNNNN` or `NNNNN-NNNN`.
const ZIP_PATTERN: &str = r"^\d{5}(-\d{4})?$";

/// Simple email shape: `local@domain.tld`. Deliberately loose — the
/// source system has already accepted these addresses.
const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

fn zip_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(ZIP_PATTERN).expect("ZIP_PATTERN is valid"))
}

fn email_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(EMAIL_PATTERN).expect("EMAIL_PATTERN is valid"))
}

// ---------------------------------------------------------------------------
// Raw record
// ---------------------------------------------------------------------------

/// A raw license record as fetched from the external system.
///
/// Immutable once fetched — a re-fetch supersedes it, nothing mutates it
/// in place. Loosely-typed fields (`Value`) absorb the source's habit of
/// sending numbers as strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalLicenseRecord {
    /// External numeric identifier, required and unique per source.
    #[serde(
        default,
        alias = "countId",
        alias = "CountId",
        alias = "COUNTID",
        alias = "count_id"
    )]
    pub countid: Option<Value>,

    /// External string identifier, optional.
    #[serde(default, alias = "appId", alias = "AppId", alias = "APPID", alias = "app_id")]
    pub appid: Option<String>,

    /// Customer-facing business name.
    #[serde(default, alias = "DBA", alias = "Dba", alias = "dbaName", alias = "dba_name")]
    pub dba: Option<String>,

    #[serde(default, alias = "Zip", alias = "ZIP", alias = "zipCode", alias = "zip_code")]
    pub zip: Option<String>,

    #[serde(default, alias = "Email", alias = "EMAIL", alias = "contactEmail")]
    pub email: Option<String>,

    #[serde(
        default,
        alias = "licenseType",
        alias = "LicenseType",
        alias = "license_Type"
    )]
    pub license_type: Option<String>,

    /// 0 = inactive, 1 = active.
    #[serde(default, alias = "Status", alias = "STATUS")]
    pub status: Option<Value>,

    #[serde(default, alias = "monthlyFee", alias = "MonthlyFee", alias = "monthly_Fee")]
    pub monthly_fee: Option<Value>,

    #[serde(default, alias = "smsBalance", alias = "SmsBalance", alias = "sms_Balance")]
    pub sms_balance: Option<Value>,

    #[serde(
        default,
        alias = "smsPurchased",
        alias = "SmsPurchased",
        alias = "sms_Purchased"
    )]
    pub sms_purchased: Option<Value>,

    #[serde(
        default,
        alias = "activateDate",
        alias = "ActivateDate",
        alias = "activationDate",
        alias = "activated"
    )]
    pub activated_at: Option<String>,

    #[serde(
        default,
        alias = "expiresAt",
        alias = "ExpiresAt",
        alias = "expirationDate",
        alias = "expireDate"
    )]
    pub expires_at: Option<String>,

    #[serde(
        default,
        alias = "lastActive",
        alias = "LastActive",
        alias = "lastActiveDate",
        alias = "last_active"
    )]
    pub last_active_at: Option<String>,
}

// ---------------------------------------------------------------------------
// Sanitized record
// ---------------------------------------------------------------------------

/// Validator output: the same logical record with coerced, trimmed,
/// range-checked fields. Guaranteed to contain no value that violates
/// the schema; fields absent in the source are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedLicenseRecord {
    pub countid: i64,
    pub appid: Option<String>,
    pub dba: Option<String>,
    pub zip: Option<String>,
    pub email: Option<String>,
    pub license_type: Option<String>,
    pub status: Option<i16>,
    pub monthly_fee: Option<f64>,
    pub sms_balance: Option<i64>,
    pub sms_purchased: Option<i64>,
    pub activated_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    pub last_active_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Options and outcomes
// ---------------------------------------------------------------------------

/// How field sanitization failures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// A sanitization failure rejects the record.
    Strict,
    /// A sanitization failure becomes a warning. String fields that fail
    /// a pattern check keep their original value; numeric and date fields
    /// that cannot be coerced are dropped to `None` (a typed record has
    /// nowhere to hold the raw text), with the raw value quoted in the
    /// warning.
    #[default]
    Lenient,
}

/// Options for single and batch validation.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    pub mode: ValidationMode,
    /// Batch validation collects failing records and continues.
    pub continue_on_error: bool,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            mode: ValidationMode::default(),
            continue_on_error: true,
        }
    }
}

/// Result of validating one record.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// `Some` only when `is_valid` is true.
    pub sanitized: Option<SanitizedLicenseRecord>,
}

/// One rejected record within a batch.
#[derive(Debug, Clone, Serialize)]
pub struct InvalidLicense {
    /// Index of the record within the submitted batch.
    pub index: usize,
    /// The external id, when it could at least be coerced.
    pub countid: Option<i64>,
    pub errors: Vec<String>,
}

/// Result of validating a batch of records.
#[derive(Debug, Clone, Serialize)]
pub struct BatchValidationReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    pub valid_licenses: Vec<SanitizedLicenseRecord>,
    pub invalid_licenses: Vec<InvalidLicense>,
    /// All errors across the batch, prefixed with the record index.
    pub errors: Vec<String>,
    /// All warnings across the batch, prefixed with the record index.
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Coercion helpers
// ---------------------------------------------------------------------------

/// Coerce a JSON value to i64: accepts integers and numeric strings.
fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Coerce a JSON value to f64: accepts numbers and numeric strings.
fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Parse an external date string. The source emits RFC 3339, bare dates,
/// and US-style `MM/DD/YYYY`.
fn parse_date(raw: &str) -> Option<Timestamp> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            let midnight = date.and_hms_opt(0, 0, 0)?;
            return Some(Utc.from_utc_datetime(&midnight));
        }
    }
    None
}

/// Trim a string field, mapping empty results to `None`.
fn trim_opt(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Single-record validation
// ---------------------------------------------------------------------------

/// Validate and sanitize one external license record.
///
/// Pure function, no I/O. Required: `countid` present and numeric. All
/// other fields are optional but checked when present.
pub fn validate_license(
    raw: &ExternalLicenseRecord,
    options: &ValidationOptions,
) -> ValidationOutcome {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let strict = options.mode == ValidationMode::Strict;

    // countid is the one hard requirement.
    let countid = match raw.countid.as_ref().and_then(coerce_i64) {
        Some(id) if id > 0 => Some(id),
        Some(id) => {
            errors.push(format!("countid must be positive, got {id}"));
            None
        }
        None => {
            errors.push("countid is required and must be numeric".to_string());
            None
        }
    };

    // -- String fields --

    let appid = trim_opt(&raw.appid);

    let dba = match trim_opt(&raw.dba) {
        Some(v) if v.len() > MAX_DBA_LEN => {
            let msg = format!("dba exceeds maximum length of {MAX_DBA_LEN} characters");
            if strict {
                errors.push(msg);
                None
            } else {
                warnings.push(msg);
                Some(v.chars().take(MAX_DBA_LEN).collect())
            }
        }
        other => other,
    };

    let zip = match trim_opt(&raw.zip) {
        Some(v) if !zip_regex().is_match(&v) => {
            let msg = format!("zip '{v}' does not match NNNNN or NNNNN-NNNN");
            if strict {
                errors.push(msg);
                None
            } else {
                warnings.push(msg);
                Some(v)
            }
        }
        other => other,
    };

    let email = match trim_opt(&raw.email).map(|v| v.to_lowercase()) {
        Some(v) if v.len() > MAX_EMAIL_LEN || !email_regex().is_match(&v) => {
            let msg = format!("email '{v}' is not a valid address");
            if strict {
                errors.push(msg);
                None
            } else {
                warnings.push(msg);
                Some(v)
            }
        }
        other => other,
    };

    // -- Enumerations --

    let license_type = match trim_opt(&raw.license_type).map(|v| v.to_lowercase()) {
        Some(v) if !VALID_LICENSE_TYPES.contains(&v.as_str()) => {
            let msg = format!(
                "license_type '{v}' is not one of: {}",
                VALID_LICENSE_TYPES.join(", ")
            );
            if strict {
                errors.push(msg);
            } else {
                warnings.push(msg);
            }
            None
        }
        other => other,
    };

    let status = match raw.status.as_ref() {
        None => None,
        Some(v) => match coerce_i64(v) {
            Some(s @ 0) | Some(s @ 1) => Some(s as i16),
            Some(s) => {
                let msg = format!("status must be 0 or 1, got {s}");
                if strict {
                    errors.push(msg);
                } else {
                    warnings.push(msg);
                }
                None
            }
            None => {
                let msg = format!("status could not be coerced to a number: {v}");
                if strict {
                    errors.push(msg);
                } else {
                    warnings.push(msg);
                }
                None
            }
        },
    };

    // -- Numeric fields: non-negative when present --

    let monthly_fee = coerce_numeric_field(
        raw.monthly_fee.as_ref(),
        "monthly_fee",
        strict,
        &mut errors,
        &mut warnings,
    );

    let sms_balance = coerce_count_field(
        raw.sms_balance.as_ref(),
        "sms_balance",
        strict,
        &mut errors,
        &mut warnings,
    );

    let sms_purchased = coerce_count_field(
        raw.sms_purchased.as_ref(),
        "sms_purchased",
        strict,
        &mut errors,
        &mut warnings,
    );

    // -- Dates --

    let activated_at = coerce_date_field(
        raw.activated_at.as_deref(),
        "activated_at",
        strict,
        &mut errors,
        &mut warnings,
    );
    let expires_at = coerce_date_field(
        raw.expires_at.as_deref(),
        "expires_at",
        strict,
        &mut errors,
        &mut warnings,
    );
    let last_active_at = coerce_date_field(
        raw.last_active_at.as_deref(),
        "last_active_at",
        strict,
        &mut errors,
        &mut warnings,
    );

    // -- Cross-field rules --

    // Hard error: expiration must be strictly after activation.
    if let (Some(activated), Some(expires)) = (activated_at, expires_at) {
        if expires <= activated {
            errors.push(format!(
                "expires_at ({expires}) must be strictly after activated_at ({activated})"
            ));
        }
    }

    // Business-rule warnings, never failures.
    if status == Some(EXTERNAL_STATUS_ACTIVE) {
        if activated_at.is_none() {
            warnings.push("active license has no activation date".to_string());
        }
        if last_active_at.is_none() {
            warnings.push("active license has no last-active timestamp".to_string());
        }
    }
    if let (Some(balance), Some(purchased)) = (sms_balance, sms_purchased) {
        if balance > purchased {
            warnings.push(format!(
                "sms_balance ({balance}) exceeds sms_purchased ({purchased})"
            ));
        }
    }

    let is_valid = errors.is_empty();
    let sanitized = match (is_valid, countid) {
        (true, Some(countid)) => Some(SanitizedLicenseRecord {
            countid,
            appid,
            dba,
            zip,
            email,
            license_type,
            status,
            monthly_fee,
            sms_balance,
            sms_purchased,
            activated_at,
            expires_at,
            last_active_at,
        }),
        _ => None,
    };

    ValidationOutcome {
        is_valid,
        errors,
        warnings,
        sanitized,
    }
}

/// Coerce an optional money-like field, enforcing non-negativity.
fn coerce_numeric_field(
    value: Option<&Value>,
    field: &str,
    strict: bool,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> Option<f64> {
    let value = value?;
    match coerce_f64(value) {
        Some(v) if v >= 0.0 => Some(v),
        Some(v) => {
            let msg = format!("{field} must be non-negative, got {v}");
            if strict {
                errors.push(msg);
            } else {
                warnings.push(msg);
            }
            None
        }
        None => {
            let msg = format!("{field} could not be coerced to a number: {value}");
            if strict {
                errors.push(msg);
            } else {
                warnings.push(msg);
            }
            None
        }
    }
}

/// Coerce an optional integer count field, enforcing non-negativity.
fn coerce_count_field(
    value: Option<&Value>,
    field: &str,
    strict: bool,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> Option<i64> {
    let value = value?;
    match coerce_i64(value) {
        Some(v) if v >= 0 => Some(v),
        Some(v) => {
            let msg = format!("{field} must be non-negative, got {v}");
            if strict {
                errors.push(msg);
            } else {
                warnings.push(msg);
            }
            None
        }
        None => {
            let msg = format!("{field} could not be coerced to an integer: {value}");
            if strict {
                errors.push(msg);
            } else {
                warnings.push(msg);
            }
            None
        }
    }
}

/// Parse an optional date field.
fn coerce_date_field(
    value: Option<&str>,
    field: &str,
    strict: bool,
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) -> Option<Timestamp> {
    let raw = value?.trim();
    if raw.is_empty() {
        return None;
    }
    match parse_date(raw) {
        Some(ts) => Some(ts),
        None => {
            let msg = format!("{field} '{raw}' is not a recognized date");
            if strict {
                errors.push(msg);
            } else {
                warnings.push(msg);
            }
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Batch validation
// ---------------------------------------------------------------------------

/// Validate a batch of external records.
///
/// With `continue_on_error` (the default), a failing record is collected
/// into `invalid_licenses` and excluded from `valid_licenses` without
/// halting the batch. With it disabled, validation stops at the first
/// failing record; records after it are not examined.
pub fn validate_licenses(
    raw: &[ExternalLicenseRecord],
    options: &ValidationOptions,
) -> BatchValidationReport {
    let mut report = BatchValidationReport {
        total: raw.len(),
        valid: 0,
        invalid: 0,
        valid_licenses: Vec::new(),
        invalid_licenses: Vec::new(),
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    for (index, record) in raw.iter().enumerate() {
        let outcome = validate_license(record, options);

        for w in &outcome.warnings {
            report.warnings.push(format!("record {index}: {w}"));
        }

        if let Some(sanitized) = outcome.sanitized {
            report.valid += 1;
            report.valid_licenses.push(sanitized);
            continue;
        }

        report.invalid += 1;
        for e in &outcome.errors {
            report.errors.push(format!("record {index}: {e}"));
        }
        report.invalid_licenses.push(InvalidLicense {
            index,
            countid: record.countid.as_ref().and_then(coerce_i64),
            errors: outcome.errors,
        });

        if !options.continue_on_error {
            break;
        }
    }

    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_record() -> ExternalLicenseRecord {
        ExternalLicenseRecord {
            countid: Some(json!(1001)),
            appid: Some("app-1001".to_string()),
            dba: Some("  Joe's Diner  ".to_string()),
            zip: Some("94107".to_string()),
            email: Some("Owner@Example.COM".to_string()),
            license_type: Some("standard".to_string()),
            status: Some(json!(1)),
            monthly_fee: Some(json!(49.99)),
            sms_balance: Some(json!(100)),
            sms_purchased: Some(json!(500)),
            activated_at: Some("2025-01-15".to_string()),
            expires_at: Some("2026-01-15".to_string()),
            last_active_at: Some("2026-08-01T12:00:00Z".to_string()),
        }
    }

    // -- Happy path -----------------------------------------------------------

    #[test]
    fn valid_record_passes_and_sanitizes() {
        let outcome = validate_license(&valid_record(), &ValidationOptions::default());
        assert!(outcome.is_valid, "errors: {:?}", outcome.errors);
        let s = outcome.sanitized.expect("sanitized data");
        assert_eq!(s.countid, 1001);
        assert_eq!(s.dba.as_deref(), Some("Joe's Diner")); // trimmed
        assert_eq!(s.email.as_deref(), Some("owner@example.com")); // lowercased
        assert_eq!(s.status, Some(1));
        assert_eq!(s.sms_balance, Some(100));
    }

    #[test]
    fn numeric_string_countid_is_coerced() {
        let mut record = valid_record();
        record.countid = Some(json!("2002"));
        let outcome = validate_license(&record, &ValidationOptions::default());
        assert!(outcome.is_valid);
        assert_eq!(outcome.sanitized.unwrap().countid, 2002);
    }

    #[test]
    fn mixed_casing_keys_normalize() {
        let record: ExternalLicenseRecord = serde_json::from_value(json!({
            "CountId": 7,
            "DBA": "Shop",
            "licenseType": "premium",
            "monthlyFee": "19.95"
        }))
        .unwrap();
        let outcome = validate_license(&record, &ValidationOptions::default());
        assert!(outcome.is_valid);
        let s = outcome.sanitized.unwrap();
        assert_eq!(s.countid, 7);
        assert_eq!(s.license_type.as_deref(), Some("premium"));
        assert_eq!(s.monthly_fee, Some(19.95));
    }

    // -- countid requirement ---------------------------------------------------

    #[test]
    fn missing_countid_fails() {
        let mut record = valid_record();
        record.countid = None;
        let outcome = validate_license(&record, &ValidationOptions::default());
        assert!(!outcome.is_valid);
        assert!(outcome.sanitized.is_none());
    }

    #[test]
    fn non_numeric_countid_fails() {
        let mut record = valid_record();
        record.countid = Some(json!("abc"));
        let outcome = validate_license(&record, &ValidationOptions::default());
        assert!(!outcome.is_valid);
    }

    #[test]
    fn non_positive_countid_fails() {
        let mut record = valid_record();
        record.countid = Some(json!(0));
        assert!(!validate_license(&record, &ValidationOptions::default()).is_valid);
        record.countid = Some(json!(-5));
        assert!(!validate_license(&record, &ValidationOptions::default()).is_valid);
    }

    // -- Field sanitization: strict vs lenient ---------------------------------

    #[test]
    fn bad_zip_is_warning_in_lenient_mode() {
        let mut record = valid_record();
        record.zip = Some("9410".to_string());
        let outcome = validate_license(&record, &ValidationOptions::default());
        assert!(outcome.is_valid);
        assert!(!outcome.warnings.is_empty());
        // Original value kept for string fields in lenient mode.
        assert_eq!(outcome.sanitized.unwrap().zip.as_deref(), Some("9410"));
    }

    #[test]
    fn bad_zip_is_error_in_strict_mode() {
        let mut record = valid_record();
        record.zip = Some("9410".to_string());
        let opts = ValidationOptions {
            mode: ValidationMode::Strict,
            ..Default::default()
        };
        let outcome = validate_license(&record, &opts);
        assert!(!outcome.is_valid);
    }

    #[test]
    fn zip_plus_four_accepted() {
        let mut record = valid_record();
        record.zip = Some("94107-1234".to_string());
        let outcome = validate_license(&record, &ValidationOptions::default());
        assert!(outcome.is_valid);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn bad_email_strict_rejects() {
        let mut record = valid_record();
        record.email = Some("not-an-email".to_string());
        let opts = ValidationOptions {
            mode: ValidationMode::Strict,
            ..Default::default()
        };
        assert!(!validate_license(&record, &opts).is_valid);
    }

    #[test]
    fn unknown_license_type_dropped_with_warning() {
        let mut record = valid_record();
        record.license_type = Some("platinum".to_string());
        let outcome = validate_license(&record, &ValidationOptions::default());
        assert!(outcome.is_valid);
        assert!(outcome.sanitized.unwrap().license_type.is_none());
        assert!(outcome.warnings.iter().any(|w| w.contains("platinum")));
    }

    #[test]
    fn negative_fee_dropped_in_lenient_rejected_in_strict() {
        let mut record = valid_record();
        record.monthly_fee = Some(json!(-10.0));

        let lenient = validate_license(&record, &ValidationOptions::default());
        assert!(lenient.is_valid);
        assert!(lenient.sanitized.unwrap().monthly_fee.is_none());

        let opts = ValidationOptions {
            mode: ValidationMode::Strict,
            ..Default::default()
        };
        assert!(!validate_license(&record, &opts).is_valid);
    }

    #[test]
    fn unparseable_date_is_warning_in_lenient_mode() {
        let mut record = valid_record();
        record.last_active_at = Some("next tuesday".to_string());
        let outcome = validate_license(&record, &ValidationOptions::default());
        assert!(outcome.is_valid);
        assert!(outcome.sanitized.unwrap().last_active_at.is_none());
    }

    #[test]
    fn us_style_date_parses() {
        let mut record = valid_record();
        record.activated_at = Some("01/15/2025".to_string());
        let outcome = validate_license(&record, &ValidationOptions::default());
        assert!(outcome.is_valid);
        assert!(outcome.sanitized.unwrap().activated_at.is_some());
    }

    // -- Cross-field rules ------------------------------------------------------

    #[test]
    fn expiration_before_activation_is_hard_error() {
        let mut record = valid_record();
        record.activated_at = Some("2026-01-15".to_string());
        record.expires_at = Some("2025-01-15".to_string());
        let outcome = validate_license(&record, &ValidationOptions::default());
        assert!(!outcome.is_valid);
        assert!(outcome
            .errors
            .iter()
            .any(|e| e.contains("strictly after")));
    }

    #[test]
    fn expiration_equal_to_activation_is_hard_error() {
        let mut record = valid_record();
        record.activated_at = Some("2025-01-15".to_string());
        record.expires_at = Some("2025-01-15".to_string());
        assert!(!validate_license(&record, &ValidationOptions::default()).is_valid);
    }

    #[test]
    fn active_without_activation_date_warns_only() {
        let mut record = valid_record();
        record.activated_at = None;
        record.expires_at = None;
        let outcome = validate_license(&record, &ValidationOptions::default());
        assert!(outcome.is_valid);
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.contains("no activation date")));
    }

    #[test]
    fn sms_balance_above_purchased_warns_only() {
        let mut record = valid_record();
        record.sms_balance = Some(json!(600));
        record.sms_purchased = Some(json!(500));
        let outcome = validate_license(&record, &ValidationOptions::default());
        assert!(outcome.is_valid);
        assert!(outcome.warnings.iter().any(|w| w.contains("exceeds")));
    }

    // -- Batch ------------------------------------------------------------------

    #[test]
    fn batch_continues_past_invalid_record() {
        let mut bad = valid_record();
        bad.countid = None;
        let batch = vec![valid_record(), bad, valid_record()];

        let report = validate_licenses(&batch, &ValidationOptions::default());
        assert_eq!(report.total, 3);
        assert_eq!(report.valid, 2);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.invalid_licenses.len(), 1);
        assert_eq!(report.invalid_licenses[0].index, 1);
    }

    #[test]
    fn batch_stops_when_continue_on_error_disabled() {
        let mut bad = valid_record();
        bad.countid = None;
        let batch = vec![bad, valid_record()];

        let opts = ValidationOptions {
            continue_on_error: false,
            ..Default::default()
        };
        let report = validate_licenses(&batch, &opts);
        assert_eq!(report.invalid, 1);
        // The second record was never examined.
        assert_eq!(report.valid, 0);
    }

    #[test]
    fn batch_errors_reference_record_index() {
        let mut bad = valid_record();
        bad.countid = Some(json!("nope"));
        let report = validate_licenses(&[bad], &ValidationOptions::default());
        assert!(report.errors[0].starts_with("record 0:"));
    }

    #[test]
    fn empty_batch_reports_zero_counts() {
        let report = validate_licenses(&[], &ValidationOptions::default());
        assert_eq!(report.total, 0);
        assert_eq!(report.valid, 0);
        assert_eq!(report.invalid, 0);
    }
}
