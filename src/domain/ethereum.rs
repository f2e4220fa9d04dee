//! Chain-level data: blocks, receipts, event logs and hex quantity arithmetic.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::{AppError, ValidationError};

/// Address returned by nodes for receipts that did not deploy a contract
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Receipt status for a successful execution
pub const RECEIPT_STATUS_SUCCESS: u64 = 1;

/// Increments are applied with this fixed-point precision
const INCREMENT_SCALE: u128 = 1_000_000;

/// A block as seen by the listener: only the transaction hashes matter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    pub hash: String,
    pub transactions: Vec<String>,
}

/// Transaction receipt (public or private)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub tx_hash: String,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub block_number: u64,
    #[serde(default)]
    pub tx_index: u64,
    #[serde(default)]
    pub contract_address: Option<String>,
    #[serde(default)]
    pub gas_used: u64,
    #[serde(default)]
    pub cumulative_gas_used: u64,
    /// Hex quantity; only meaningful for dynamic-fee transactions
    #[serde(default)]
    pub effective_gas_price: Option<String>,
    #[serde(default)]
    pub status: u64,
    #[serde(default)]
    pub logs: Vec<EventLog>,
    /// Set on private receipts
    #[serde(default)]
    pub privacy_group_id: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub revert_reason: Option<String>,
}

impl Receipt {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RECEIPT_STATUS_SUCCESS
    }

    /// Contract address when the receipt deployed a contract
    #[must_use]
    pub fn deployed_contract(&self) -> Option<&str> {
        self.contract_address
            .as_deref()
            .filter(|addr| !is_zero_address(addr))
    }
}

/// Event log emitted by a contract
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub block_number: u64,
    #[serde(default)]
    pub block_hash: Option<String>,
    #[serde(default)]
    pub tx_hash: Option<String>,
    #[serde(default)]
    pub tx_index: u64,
    #[serde(default)]
    pub log_index: u64,
    #[serde(default)]
    pub removed: bool,
}

/// Range query for contract event logs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: Vec<String>,
    pub from_block: u64,
    pub to_block: u64,
}

/// Lowercase an address so map lookups are case-insensitive.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

#[must_use]
pub fn is_zero_address(address: &str) -> bool {
    let trimmed = address.trim_start_matches("0x").trim_start_matches("0X");
    trimmed.is_empty() || trimmed.chars().all(|c| c == '0')
}

/// Parse a `0x`-prefixed hex quantity.
pub fn parse_quantity(value: &str) -> Result<u128, AppError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| invalid_quantity(value, "missing 0x prefix"))?;
    if digits.is_empty() {
        return Err(invalid_quantity(value, "no digits"));
    }
    u128::from_str_radix(digits, 16).map_err(|e| invalid_quantity(value, &e.to_string()))
}

/// Parse a hex quantity that must fit a block number.
pub fn parse_u64_quantity(value: &str) -> Result<u64, AppError> {
    let parsed = parse_quantity(value)?;
    u64::try_from(parsed).map_err(|_| invalid_quantity(value, "overflows u64"))
}

#[must_use]
pub fn format_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

/// Apply a relative increment (0.1 = +10%) to a hex quantity.
pub fn increment_quantity(value: &str, increment: f64) -> Result<String, AppError> {
    if !increment.is_finite() || increment < 0.0 {
        return Err(AppError::Validation(ValidationError::InvalidField {
            field: "gas_increment".to_string(),
            message: format!("must be a non-negative number, got {}", increment),
        }));
    }

    let base = parse_quantity(value)?;
    let scaled = (increment * INCREMENT_SCALE as f64).round() as u128;
    let bump = base
        .checked_mul(scaled)
        .map(|v| v / INCREMENT_SCALE)
        .ok_or_else(|| invalid_quantity(value, "increment overflows"))?;
    let next = base
        .checked_add(bump)
        .ok_or_else(|| invalid_quantity(value, "increment overflows"))?;

    Ok(format_quantity(next))
}

fn invalid_quantity(value: &str, reason: &str) -> AppError {
    AppError::Validation(ValidationError::InvalidField {
        field: "quantity".to_string(),
        message: format!("'{}' is not a valid hex quantity: {}", value, reason),
    })
}
