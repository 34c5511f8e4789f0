//! The module contains the errors the engine can throw.
//!
//! Errors are split per operation family:
//!
//! - [`LedgerError`] for appends to and reads from the ledger.
//! - [`BalanceError`] for merchant balance mutations.
//! - [`EngineError`] for coordinator operations, wrapping both.
//!
//! Every variant carries the structured context of the failure (merchant id,
//! amounts, bucket) so callers match on values rather than on messages.
use rust_decimal::Decimal;
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

use crate::{Bucket, Currency};

/// Ledger store errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Malformed or missing input, caught before anything is persisted.
    #[error("Invalid ledger entry: {0}")]
    Validation(String),
    /// Debit and credit sums of a group differ; nothing was persisted.
    #[error(
        "Unbalanced transaction {transaction_group_id} ({currency}): debits {debits} != credits {credits}"
    )]
    Unbalanced {
        transaction_group_id: Uuid,
        currency: Currency,
        debits: Decimal,
        credits: Decimal,
    },
    #[error("Ledger entry \"{0}\" not found!")]
    NotFound(Uuid),
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl PartialEq for LedgerError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Validation(a), Self::Validation(b)) => a == b,
            (
                Self::Unbalanced {
                    transaction_group_id: g1,
                    currency: c1,
                    debits: d1,
                    credits: k1,
                },
                Self::Unbalanced {
                    transaction_group_id: g2,
                    currency: c2,
                    debits: d2,
                    credits: k2,
                },
            ) => g1 == g2 && c1 == c2 && d1 == d2 && k1 == k2,
            (Self::NotFound(a), Self::NotFound(b)) => a == b,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

/// Merchant balance errors.
#[derive(Error, Debug)]
pub enum BalanceError {
    #[error("Balance for merchant \"{merchant_id}\" not found!")]
    NotFound { merchant_id: String },
    #[error("Balance for merchant \"{merchant_id}\" already present!")]
    AlreadyExists { merchant_id: String },
    /// Empty merchant id, or one with surrounding whitespace.
    #[error("Invalid merchant id \"{merchant_id}\"")]
    InvalidMerchantId { merchant_id: String },
    #[error("Negative amount: {amount}")]
    NegativeAmount { amount: Decimal },
    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: Decimal, reason: &'static str },
    #[error(
        "Insufficient funds for merchant \"{merchant_id}\": requested {requested} from {bucket}, available {available}"
    )]
    InsufficientFunds {
        merchant_id: String,
        bucket: Bucket,
        requested: Decimal,
        available: Decimal,
    },
    /// The stored version moved since the snapshot was read. Re-read and retry.
    #[error("Version conflict for merchant \"{merchant_id}\": expected version {expected}")]
    VersionConflict { merchant_id: String, expected: i64 },
    /// The state about to be written breaks a balance invariant. Nothing was written.
    #[error("Invalid balance state for merchant \"{merchant_id}\": {reason}")]
    InvalidState { merchant_id: String, reason: String },
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl BalanceError {
    /// `true` when re-reading the balance and repeating the call may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }
}

impl PartialEq for BalanceError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NotFound { merchant_id: a }, Self::NotFound { merchant_id: b }) => a == b,
            (Self::AlreadyExists { merchant_id: a }, Self::AlreadyExists { merchant_id: b }) => {
                a == b
            }
            (
                Self::InvalidMerchantId { merchant_id: a },
                Self::InvalidMerchantId { merchant_id: b },
            ) => a == b,
            (Self::NegativeAmount { amount: a }, Self::NegativeAmount { amount: b }) => a == b,
            (
                Self::InvalidAmount {
                    amount: a1,
                    reason: r1,
                },
                Self::InvalidAmount {
                    amount: a2,
                    reason: r2,
                },
            ) => a1 == a2 && r1 == r2,
            (
                Self::InsufficientFunds {
                    merchant_id: m1,
                    bucket: b1,
                    requested: r1,
                    available: a1,
                },
                Self::InsufficientFunds {
                    merchant_id: m2,
                    bucket: b2,
                    requested: r2,
                    available: a2,
                },
            ) => m1 == m2 && b1 == b2 && r1 == r2 && a1 == a2,
            (
                Self::VersionConflict {
                    merchant_id: m1,
                    expected: e1,
                },
                Self::VersionConflict {
                    merchant_id: m2,
                    expected: e2,
                },
            ) => m1 == m2 && e1 == e2,
            (
                Self::InvalidState {
                    merchant_id: m1,
                    reason: r1,
                },
                Self::InvalidState {
                    merchant_id: m2,
                    reason: r2,
                },
            ) => m1 == m2 && r1 == r2,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

/// Coordinator errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Balance(#[from] BalanceError),
    /// A group for this business reference was already recorded.
    #[error("\"{reference_type}:{reference_id}\" already recorded!")]
    AlreadyRecorded {
        reference_type: String,
        reference_id: String,
    },
    #[error(transparent)]
    Database(#[from] DbErr),
}

impl EngineError {
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Balance(err) if err.is_retryable())
    }
}

impl PartialEq for EngineError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Ledger(a), Self::Ledger(b)) => a == b,
            (Self::Balance(a), Self::Balance(b)) => a == b,
            (
                Self::AlreadyRecorded {
                    reference_type: t1,
                    reference_id: i1,
                },
                Self::AlreadyRecorded {
                    reference_type: t2,
                    reference_id: i2,
                },
            ) => t1 == t2 && i1 == i2,
            (Self::Database(a), Self::Database(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
