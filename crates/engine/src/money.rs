//! Money helpers.
//!
//! Every monetary value in the engine is a [`Decimal`]. Floating point never
//! touches an amount: storage keeps the exact decimal string (scale included)
//! and user input is parsed digit by digit.
//!
//! # Examples
//!
//! ```rust
//! use engine::money::{format_vnd, parse_amount};
//! use rust_decimal::Decimal;
//!
//! let amount = parse_amount("2_300_000").unwrap();
//! assert_eq!(amount, Decimal::from(2_300_000));
//! assert_eq!(format_vnd(amount), "2,300,000 VND");
//! assert!(parse_amount("1e3").is_err());
//! ```

use std::str::FromStr;

use rust_decimal::Decimal;
use sea_orm::DbErr;

use crate::LedgerError;

/// Parses a user supplied amount.
///
/// Accepts an optional leading `+`/`-`, `_` as digit grouping and `.` as the
/// decimal separator. Exponents, commas and empty strings are rejected.
pub fn parse_amount(input: &str) -> Result<Decimal, LedgerError> {
    let invalid = || LedgerError::Validation(format!("invalid amount: {input:?}"));

    let trimmed = input.trim();
    let unsigned = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let cleaned: String = unsigned.chars().filter(|c| *c != '_').collect();

    let digits = cleaned.strip_prefix('-').unwrap_or(&cleaned);
    if digits.is_empty()
        || digits.starts_with('.')
        || digits.ends_with('.')
        || !digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        || digits.matches('.').count() > 1
    {
        return Err(invalid());
    }

    Decimal::from_str(&cleaned).map_err(|_| invalid())
}

/// Formats an amount with `,` thousands separators, e.g. `2,300,000 VND`.
#[must_use]
pub fn format_vnd(amount: Decimal) -> String {
    let raw = amount.abs().to_string();
    let (int_part, frac_part) = match raw.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (raw.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (idx, ch) in int_part.chars().enumerate() {
        if idx > 0 && (int_part.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount.is_sign_negative() && !amount.is_zero() {
        "-"
    } else {
        ""
    };
    match frac_part {
        Some(frac) => format!("{sign}{grouped}.{frac} VND"),
        None => format!("{sign}{grouped} VND"),
    }
}

/// Encodes an amount for a TEXT column, preserving its scale.
pub(crate) fn to_stored(amount: Decimal) -> String {
    amount.to_string()
}

/// Decodes an amount read back from a TEXT column.
pub(crate) fn from_stored(value: &str, column: &str) -> Result<Decimal, DbErr> {
    Decimal::from_str(value)
        .map_err(|_| DbErr::Type(format!("invalid decimal in column {column}: {value:?}")))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parse_accepts_grouping_and_sign() {
        assert_eq!(parse_amount("2300000").unwrap(), dec!(2300000));
        assert_eq!(parse_amount(" 2_300_000 ").unwrap(), dec!(2300000));
        assert_eq!(parse_amount("+10.50").unwrap(), dec!(10.50));
        assert_eq!(parse_amount("-0.000001").unwrap(), dec!(-0.000001));
    }

    #[test]
    fn parse_rejects_non_decimal_input() {
        for input in ["", "  ", "1e3", "1,000", "1.2.3", ".5", "5.", "abc", "-"] {
            assert!(parse_amount(input).is_err(), "{input:?} should be rejected");
        }
    }

    #[test]
    fn format_groups_thousands() {
        assert_eq!(format_vnd(dec!(0)), "0 VND");
        assert_eq!(format_vnd(dec!(999)), "999 VND");
        assert_eq!(format_vnd(dec!(1000)), "1,000 VND");
        assert_eq!(format_vnd(dec!(2300000)), "2,300,000 VND");
        assert_eq!(format_vnd(dec!(-1234567.5)), "-1,234,567.5 VND");
    }

    #[test]
    fn storage_keeps_scale() {
        let stored = to_stored(dec!(1000.00));
        assert_eq!(stored, "1000.00");
        let back = from_stored(&stored, "amount").unwrap();
        assert_eq!(back.scale(), 2);
        assert_eq!(back, dec!(1000));
        assert!(from_stored("1.0e2", "amount").is_err());
    }
}
