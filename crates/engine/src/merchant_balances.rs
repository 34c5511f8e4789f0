//! Merchant balance aggregate.
//!
//! One [`MerchantBalance`] exists per merchant. It is the mutable, denormalized view
//! of what a merchant can spend; the ledger remains the audit trail it is checked
//! against.
//!
//! Buckets:
//! - `pending_vnd`: detected but not yet spendable
//! - `available_vnd`: spendable
//! - `reserved_vnd`: a hold carved out of `available_vnd` for in-flight payouts
//!
//! `total_vnd == pending_vnd + available_vnd` and `reserved_vnd <= available_vnd`
//! hold after every mutation, and `version` grows by exactly one per mutation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    BalanceError,
    money::{from_stored, to_stored},
};

/// A named bucket of a merchant balance, used in error context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Pending,
    Available,
    Reserved,
    /// `available_vnd - reserved_vnd`, the headroom left for new holds and withdrawals.
    Unreserved,
}

impl core::fmt::Display for Bucket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Available => "available",
            Self::Reserved => "reserved",
            Self::Unreserved => "unreserved",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerchantBalance {
    pub merchant_id: String,
    pub pending_vnd: Decimal,
    pub available_vnd: Decimal,
    pub total_vnd: Decimal,
    pub reserved_vnd: Decimal,
    pub total_received_vnd: Decimal,
    pub total_paid_out_vnd: Decimal,
    pub total_fees_vnd: Decimal,
    pub total_payments_count: i64,
    pub total_payouts_count: i64,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub last_payout_at: Option<DateTime<Utc>>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MerchantBalance {
    /// A zeroed balance at version 1, as created on merchant onboarding.
    pub fn new(merchant_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            pending_vnd: Decimal::ZERO,
            available_vnd: Decimal::ZERO,
            total_vnd: Decimal::ZERO,
            reserved_vnd: Decimal::ZERO,
            total_received_vnd: Decimal::ZERO,
            total_paid_out_vnd: Decimal::ZERO,
            total_fees_vnd: Decimal::ZERO,
            total_payments_count: 0,
            total_payouts_count: 0,
            last_payment_at: None,
            last_payout_at: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Spendable headroom not already held by a reservation.
    pub fn unreserved_vnd(&self) -> Decimal {
        self.available_vnd - self.reserved_vnd
    }

    /// Checks every invariant a stored balance must satisfy.
    pub fn check_invariants(&self) -> Result<(), BalanceError> {
        let invalid = |reason: String| {
            Err(BalanceError::InvalidState {
                merchant_id: self.merchant_id.clone(),
                reason,
            })
        };

        let monetary = [
            ("pending_vnd", self.pending_vnd),
            ("available_vnd", self.available_vnd),
            ("total_vnd", self.total_vnd),
            ("reserved_vnd", self.reserved_vnd),
            ("total_received_vnd", self.total_received_vnd),
            ("total_paid_out_vnd", self.total_paid_out_vnd),
            ("total_fees_vnd", self.total_fees_vnd),
        ];
        if let Some((field, value)) = monetary.iter().find(|(_, v)| *v < Decimal::ZERO) {
            return invalid(format!("{field} must be >= 0, got {value}"));
        }
        if self.total_payments_count < 0 || self.total_payouts_count < 0 {
            return invalid("counters must be >= 0".to_string());
        }
        if self.total_vnd != self.pending_vnd + self.available_vnd {
            return invalid(format!(
                "total_vnd {} != pending_vnd {} + available_vnd {}",
                self.total_vnd, self.pending_vnd, self.available_vnd
            ));
        }
        if self.reserved_vnd > self.available_vnd {
            return invalid(format!(
                "reserved_vnd {} exceeds available_vnd {}",
                self.reserved_vnd, self.available_vnd
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "merchant_balances")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub merchant_id: String,
    pub pending_vnd: String,
    pub available_vnd: String,
    pub total_vnd: String,
    pub reserved_vnd: String,
    pub total_received_vnd: String,
    pub total_paid_out_vnd: String,
    pub total_fees_vnd: String,
    pub total_payments_count: i64,
    pub total_payouts_count: i64,
    pub last_payment_at: Option<DateTimeUtc>,
    pub last_payout_at: Option<DateTimeUtc>,
    pub version: i64,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&MerchantBalance> for ActiveModel {
    fn from(balance: &MerchantBalance) -> Self {
        Self {
            merchant_id: ActiveValue::Set(balance.merchant_id.clone()),
            pending_vnd: ActiveValue::Set(to_stored(balance.pending_vnd)),
            available_vnd: ActiveValue::Set(to_stored(balance.available_vnd)),
            total_vnd: ActiveValue::Set(to_stored(balance.total_vnd)),
            reserved_vnd: ActiveValue::Set(to_stored(balance.reserved_vnd)),
            total_received_vnd: ActiveValue::Set(to_stored(balance.total_received_vnd)),
            total_paid_out_vnd: ActiveValue::Set(to_stored(balance.total_paid_out_vnd)),
            total_fees_vnd: ActiveValue::Set(to_stored(balance.total_fees_vnd)),
            total_payments_count: ActiveValue::Set(balance.total_payments_count),
            total_payouts_count: ActiveValue::Set(balance.total_payouts_count),
            last_payment_at: ActiveValue::Set(balance.last_payment_at),
            last_payout_at: ActiveValue::Set(balance.last_payout_at),
            version: ActiveValue::Set(balance.version),
            created_at: ActiveValue::Set(balance.created_at),
            updated_at: ActiveValue::Set(balance.updated_at),
        }
    }
}

impl TryFrom<Model> for MerchantBalance {
    type Error = BalanceError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        Ok(Self {
            pending_vnd: from_stored(&model.pending_vnd, "pending_vnd")?,
            available_vnd: from_stored(&model.available_vnd, "available_vnd")?,
            total_vnd: from_stored(&model.total_vnd, "total_vnd")?,
            reserved_vnd: from_stored(&model.reserved_vnd, "reserved_vnd")?,
            total_received_vnd: from_stored(&model.total_received_vnd, "total_received_vnd")?,
            total_paid_out_vnd: from_stored(&model.total_paid_out_vnd, "total_paid_out_vnd")?,
            total_fees_vnd: from_stored(&model.total_fees_vnd, "total_fees_vnd")?,
            merchant_id: model.merchant_id,
            total_payments_count: model.total_payments_count,
            total_payouts_count: model.total_payouts_count,
            last_payment_at: model.last_payment_at,
            last_payout_at: model.last_payout_at,
            version: model.version,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}
