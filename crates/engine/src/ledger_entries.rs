//! Ledger entries.
//!
//! A [`LedgerEntry`] is one half of a double-entry record. Each entry names both
//! accounts of the movement (`debit_account` → `credit_account`) for traceability,
//! and its [`EntryType`] says which side of the movement the entry posts:
//!
//! - a `debit` entry posts `+amount` to its `debit_account`
//! - a `credit` entry posts `-amount` to its `credit_account`
//!
//! Entries sharing a `transaction_group_id` form a transaction group whose debit
//! and credit sums must match. Entries are written once and never updated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Currency, LedgerError,
    money::{from_stored, to_stored},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Debit,
    Credit,
}

impl EntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }
}

impl TryFrom<&str> for EntryType {
    type Error = LedgerError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            other => Err(LedgerError::Validation(format!(
                "invalid entry type: {other}"
            ))),
        }
    }
}

/// An entry about to be appended. Ids and timestamps are assigned by the store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub debit_account: String,
    pub credit_account: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub reference_type: String,
    pub reference_id: String,
    pub merchant_id: Option<String>,
    pub description: String,
    /// Generated by the store when absent.
    pub transaction_group_id: Option<Uuid>,
    pub entry_type: EntryType,
    pub metadata: Option<serde_json::Value>,
}

impl NewLedgerEntry {
    pub fn new(
        entry_type: EntryType,
        debit_account: impl Into<String>,
        credit_account: impl Into<String>,
        amount: Decimal,
        currency: Currency,
        reference_type: impl Into<String>,
        reference_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            debit_account: debit_account.into(),
            credit_account: credit_account.into(),
            amount,
            currency,
            reference_type: reference_type.into(),
            reference_id: reference_id.into(),
            merchant_id: None,
            description: description.into(),
            transaction_group_id: None,
            entry_type,
            metadata: None,
        }
    }

    /// The balanced debit/credit pair recording `amount` moving from
    /// `credit_account` into `debit_account`.
    pub fn pair(
        debit_account: &str,
        credit_account: &str,
        amount: Decimal,
        currency: Currency,
        reference_type: &str,
        reference_id: &str,
        description: &str,
    ) -> [Self; 2] {
        [EntryType::Debit, EntryType::Credit].map(|entry_type| {
            Self::new(
                entry_type,
                debit_account,
                credit_account,
                amount,
                currency,
                reference_type,
                reference_id,
                description,
            )
        })
    }

    #[must_use]
    pub fn with_merchant(mut self, merchant_id: impl Into<String>) -> Self {
        self.merchant_id = Some(merchant_id.into());
        self
    }

    #[must_use]
    pub fn with_group(mut self, transaction_group_id: Uuid) -> Self {
        self.transaction_group_id = Some(transaction_group_id);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Field-level checks shared by single and grouped appends.
    pub(crate) fn validate(&self) -> Result<(), LedgerError> {
        let invalid = |msg: String| Err(LedgerError::Validation(msg));

        if self.description.trim().is_empty() {
            return invalid("description must not be empty".to_string());
        }
        if self.amount <= Decimal::ZERO {
            return invalid(format!("amount must be > 0, got {}", self.amount));
        }
        if self.debit_account.trim().is_empty() || self.credit_account.trim().is_empty() {
            return invalid("debit and credit accounts must not be empty".to_string());
        }
        if self.debit_account == self.credit_account {
            return invalid(format!(
                "debit and credit account must differ, both are {}",
                self.debit_account
            ));
        }
        if self.reference_type.trim().is_empty() || self.reference_id.trim().is_empty() {
            return invalid("reference type and id must not be empty".to_string());
        }
        if let Some(merchant_id) = &self.merchant_id
            && merchant_id.trim().is_empty()
        {
            return invalid("merchant id must not be blank when present".to_string());
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub debit_account: String,
    pub credit_account: String,
    pub amount: Decimal,
    pub currency: Currency,
    pub reference_type: String,
    pub reference_id: String,
    pub merchant_id: Option<String>,
    pub description: String,
    pub transaction_group_id: Uuid,
    pub entry_type: EntryType,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// The account this entry posts to.
    pub fn posted_account(&self) -> &str {
        match self.entry_type {
            EntryType::Debit => &self.debit_account,
            EntryType::Credit => &self.credit_account,
        }
    }

    /// `+amount` for debit entries, `-amount` for credit entries.
    pub fn signed_amount(&self) -> Decimal {
        match self.entry_type {
            EntryType::Debit => self.amount,
            EntryType::Credit => -self.amount,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "ledger_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub transaction_group_id: String,
    /// Index of the entry inside its append call; orders entries sharing a timestamp.
    pub position: i32,
    pub entry_type: String,
    pub debit_account: String,
    pub credit_account: String,
    pub amount: String,
    pub currency: String,
    pub reference_type: String,
    pub reference_id: String,
    pub merchant_id: Option<String>,
    pub description: String,
    pub metadata: Option<String>,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl ActiveModel {
    pub(crate) fn from_entry(entry: &LedgerEntry, position: i32) -> Result<Self, LedgerError> {
        let metadata = entry
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| LedgerError::Validation(format!("invalid metadata: {err}")))?;
        Ok(Self {
            id: ActiveValue::Set(entry.id.to_string()),
            transaction_group_id: ActiveValue::Set(entry.transaction_group_id.to_string()),
            position: ActiveValue::Set(position),
            entry_type: ActiveValue::Set(entry.entry_type.as_str().to_string()),
            debit_account: ActiveValue::Set(entry.debit_account.clone()),
            credit_account: ActiveValue::Set(entry.credit_account.clone()),
            amount: ActiveValue::Set(to_stored(entry.amount)),
            currency: ActiveValue::Set(entry.currency.code().to_string()),
            reference_type: ActiveValue::Set(entry.reference_type.clone()),
            reference_id: ActiveValue::Set(entry.reference_id.clone()),
            merchant_id: ActiveValue::Set(entry.merchant_id.clone()),
            description: ActiveValue::Set(entry.description.clone()),
            metadata: ActiveValue::Set(metadata),
            created_at: ActiveValue::Set(entry.created_at),
        })
    }
}

impl TryFrom<Model> for LedgerEntry {
    type Error = LedgerError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let parse_id = |value: &str, label: &str| {
            Uuid::parse_str(value)
                .map_err(|_| LedgerError::Validation(format!("invalid {label} id: {value}")))
        };
        let metadata = model
            .metadata
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|err| LedgerError::Validation(format!("invalid stored metadata: {err}")))?;

        Ok(Self {
            id: parse_id(&model.id, "ledger entry")?,
            transaction_group_id: parse_id(&model.transaction_group_id, "transaction group")?,
            entry_type: EntryType::try_from(model.entry_type.as_str())?,
            amount: from_stored(&model.amount, "ledger_entries.amount")?,
            currency: Currency::try_from(model.currency.as_str())?,
            debit_account: model.debit_account,
            credit_account: model.credit_account,
            reference_type: model.reference_type,
            reference_id: model.reference_id,
            merchant_id: model.merchant_id,
            description: model.description,
            metadata,
            created_at: model.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn entry() -> NewLedgerEntry {
        NewLedgerEntry::new(
            EntryType::Debit,
            "crypto_pool",
            "merchant_balance:m1",
            dec!(1000),
            Currency::Vnd,
            "payment",
            "p1",
            "payment p1 confirmed",
        )
    }

    #[test]
    fn valid_entry_passes() {
        assert!(entry().validate().is_ok());
    }

    #[test]
    fn rejects_blank_description() {
        let mut e = entry();
        e.description = "   ".to_string();
        assert_eq!(
            e.validate().unwrap_err(),
            LedgerError::Validation("description must not be empty".to_string())
        );
    }

    #[test]
    fn rejects_non_positive_amount() {
        let mut e = entry();
        e.amount = Decimal::ZERO;
        assert!(e.validate().is_err());
        e.amount = dec!(-5);
        assert!(e.validate().is_err());
    }

    #[test]
    fn rejects_self_transfer_and_missing_reference() {
        let mut e = entry();
        e.credit_account = e.debit_account.clone();
        assert!(e.validate().is_err());

        let mut e = entry();
        e.reference_id = String::new();
        assert!(e.validate().is_err());
    }

    #[test]
    fn pair_is_one_debit_and_one_credit() {
        let [debit, credit] = NewLedgerEntry::pair(
            "crypto_pool",
            "merchant_balance:m1",
            dec!(10),
            Currency::Vnd,
            "payment",
            "p1",
            "x",
        );
        assert_eq!(debit.entry_type, EntryType::Debit);
        assert_eq!(credit.entry_type, EntryType::Credit);
        assert_eq!(debit.debit_account, credit.debit_account);
    }
}
