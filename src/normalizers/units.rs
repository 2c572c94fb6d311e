//! Price encoding boundary
//!
//! Providers send prices as strings in either major units ("145.00") or
//! minor units ("14500" cents). Everything past this module is major-unit
//! `Decimal`. Empty and non-positive amounts mean "no price"; anything that
//! does not parse is a normalization error.

use crate::error::{AppError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

/// Amount as it appears on the wire: usually a string, occasionally a bare number
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WireAmount {
    Text(String),
    Number(serde_json::Number),
}

impl WireAmount {
    pub fn as_text(&self) -> String {
        match self {
            WireAmount::Text(s) => s.clone(),
            WireAmount::Number(n) => n.to_string(),
        }
    }
}

/// Parse a major-unit string ("145", "145.00")
pub fn parse_major(raw: &str) -> Result<Option<Decimal>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value = Decimal::from_str(trimmed)
        .map_err(|e| AppError::Normalization(format!("invalid major-unit amount '{}': {}", raw, e)))?;
    Ok(positive(value))
}

/// Convert an integral minor-unit string ("14500") to major units.
///
/// `exponent` is the currency's minor-unit exponent (2 for cents).
pub fn minor_to_major(raw: &str, exponent: u32) -> Result<Option<Decimal>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let minor: i64 = trimmed.parse().map_err(|_| {
        AppError::Normalization(format!("invalid minor-unit amount '{}': expected an integer", raw))
    })?;

    let value = Decimal::try_from_i128_with_scale(i128::from(minor), exponent)
        .map_err(|e| AppError::Normalization(format!("minor-unit amount '{}' out of range: {}", raw, e)))?;
    Ok(positive(value))
}

/// `parse_major` over an optional wire value
pub fn major_amount(raw: Option<&WireAmount>) -> Result<Option<Decimal>> {
    match raw {
        Some(amount) => parse_major(&amount.as_text()),
        None => Ok(None),
    }
}

/// `minor_to_major` over an optional wire value
pub fn minor_amount(raw: Option<&WireAmount>, exponent: u32) -> Result<Option<Decimal>> {
    match raw {
        Some(amount) => minor_to_major(&amount.as_text(), exponent),
        None => Ok(None),
    }
}

/// Canonical size key: "10.0" and "10" are the same size
pub fn size_key(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match Decimal::from_str(trimmed) {
        Ok(value) => Some(value.normalize().to_string()),
        Err(_) => Some(trimmed.to_string()),
    }
}

fn positive(value: Decimal) -> Option<Decimal> {
    if value > Decimal::ZERO {
        Some(value)
    } else {
        None
    }
}
