//! Ledger store.
//!
//! The ledger only grows: there is no update or delete path. Groups are
//! validated in full before the first row is written and are persisted in one
//! transaction, so a group is either entirely visible or absent.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    Condition, ConnectionTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait, prelude::*,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Currency, EntryType, LedgerEntry, LedgerError, NewLedgerEntry, ledger_entries,
    money::from_stored, with_tx,
};

type ResultLedger<T> = Result<T, LedgerError>;

/// A transaction group whose debits and credits do not match, as found by
/// [`validate_integrity`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbalancedGroup {
    pub transaction_group_id: Uuid,
    pub currency: Currency,
    pub debits: Decimal,
    pub credits: Decimal,
}

/// Validates a balanced group of entries and persists all of them, or none.
///
/// Entries without a `transaction_group_id` join the group; when no entry
/// carries one, a new id is generated.
pub async fn append_group<C>(conn: &C, entries: Vec<NewLedgerEntry>) -> ResultLedger<Vec<LedgerEntry>>
where
    C: ConnectionTrait + TransactionTrait,
{
    let prepared = prepare_group(entries, crate::now())?;
    with_tx!(conn, |txn| {
        insert_entries(&txn, &prepared).await?;
        tracing::debug!(
            transaction_group_id = %prepared[0].transaction_group_id,
            entries = prepared.len(),
            "ledger group appended"
        );
        Ok(prepared)
    })
}

/// Appends a lone entry without any group balance check.
///
/// The caller is responsible for balancing the group across separate calls;
/// [`validate_integrity`] reports groups that never do.
pub async fn append_single<C>(conn: &C, entry: NewLedgerEntry) -> ResultLedger<LedgerEntry>
where
    C: ConnectionTrait,
{
    entry.validate()?;
    let group_id = entry.transaction_group_id.unwrap_or_else(Uuid::new_v4);
    let entry = materialize(entry, group_id, crate::now());
    insert_entries(conn, std::slice::from_ref(&entry)).await?;
    tracing::debug!(
        transaction_group_id = %group_id,
        entry_id = %entry.id,
        "single ledger entry appended"
    );
    Ok(entry)
}

pub async fn get_by_id<C: ConnectionTrait>(conn: &C, id: Uuid) -> ResultLedger<LedgerEntry> {
    let model = ledger_entries::Entity::find_by_id(id.to_string())
        .one(conn)
        .await?
        .ok_or(LedgerError::NotFound(id))?;
    LedgerEntry::try_from(model)
}

/// Entries tagged with `merchant_id`, newest first.
pub async fn get_by_merchant<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    limit: u64,
    offset: u64,
) -> ResultLedger<Vec<LedgerEntry>> {
    let models = ledger_entries::Entity::find()
        .filter(ledger_entries::Column::MerchantId.eq(merchant_id))
        .order_by_desc(ledger_entries::Column::CreatedAt)
        .order_by_desc(ledger_entries::Column::Position)
        .limit(limit)
        .offset(offset)
        .all(conn)
        .await?;
    into_entries(models)
}

/// Entries touching `account` on either side, newest first.
pub async fn get_by_account<C: ConnectionTrait>(
    conn: &C,
    account: &str,
    limit: u64,
    offset: u64,
) -> ResultLedger<Vec<LedgerEntry>> {
    let models = ledger_entries::Entity::find()
        .filter(
            Condition::any()
                .add(ledger_entries::Column::DebitAccount.eq(account))
                .add(ledger_entries::Column::CreditAccount.eq(account)),
        )
        .order_by_desc(ledger_entries::Column::CreatedAt)
        .order_by_desc(ledger_entries::Column::Position)
        .limit(limit)
        .offset(offset)
        .all(conn)
        .await?;
    into_entries(models)
}

/// Entries recorded for a business event, in append order.
pub async fn get_by_reference<C: ConnectionTrait>(
    conn: &C,
    reference_type: &str,
    reference_id: &str,
) -> ResultLedger<Vec<LedgerEntry>> {
    let models = ledger_entries::Entity::find()
        .filter(ledger_entries::Column::ReferenceType.eq(reference_type))
        .filter(ledger_entries::Column::ReferenceId.eq(reference_id))
        .order_by_asc(ledger_entries::Column::CreatedAt)
        .order_by_asc(ledger_entries::Column::Position)
        .all(conn)
        .await?;
    into_entries(models)
}

/// Entries of one transaction group, in append order.
pub async fn get_by_transaction_group<C: ConnectionTrait>(
    conn: &C,
    transaction_group_id: Uuid,
) -> ResultLedger<Vec<LedgerEntry>> {
    let models = ledger_entries::Entity::find()
        .filter(ledger_entries::Column::TransactionGroupId.eq(transaction_group_id.to_string()))
        .order_by_asc(ledger_entries::Column::CreatedAt)
        .order_by_asc(ledger_entries::Column::Position)
        .all(conn)
        .await?;
    into_entries(models)
}

/// Number of entries in the ledger.
pub async fn count<C: ConnectionTrait>(conn: &C) -> ResultLedger<u64> {
    Ok(ledger_entries::Entity::find().count(conn).await?)
}

/// Recomputes debit and credit sums per transaction group and currency over the
/// whole ledger and returns the groups that do not balance, ordered by group id.
///
/// Read-only; intended for periodic audits, never for the write path.
pub async fn validate_integrity<C: ConnectionTrait>(conn: &C) -> ResultLedger<Vec<UnbalancedGroup>> {
    let rows: Vec<(String, String, String, String)> = ledger_entries::Entity::find()
        .select_only()
        .column(ledger_entries::Column::TransactionGroupId)
        .column(ledger_entries::Column::Currency)
        .column(ledger_entries::Column::EntryType)
        .column(ledger_entries::Column::Amount)
        .into_tuple()
        .all(conn)
        .await?;

    let mut sums: BTreeMap<(Uuid, Currency), (Decimal, Decimal)> = BTreeMap::new();
    for (group_id, currency, entry_type, amount) in rows {
        let group_id = Uuid::parse_str(&group_id).map_err(|_| {
            LedgerError::Validation(format!("invalid transaction group id: {group_id}"))
        })?;
        let currency = Currency::try_from(currency.as_str())?;
        let amount = from_stored(&amount, "ledger_entries.amount")?;
        let (debits, credits) = sums.entry((group_id, currency)).or_default();
        match EntryType::try_from(entry_type.as_str())? {
            EntryType::Debit => *debits += amount,
            EntryType::Credit => *credits += amount,
        }
    }

    let unbalanced: Vec<UnbalancedGroup> = sums
        .into_iter()
        .filter(|(_, (debits, credits))| debits != credits)
        .map(|((transaction_group_id, currency), (debits, credits))| UnbalancedGroup {
            transaction_group_id,
            currency,
            debits,
            credits,
        })
        .collect();

    for group in &unbalanced {
        tracing::warn!(
            transaction_group_id = %group.transaction_group_id,
            currency = %group.currency,
            debits = %group.debits,
            credits = %group.credits,
            "unbalanced ledger group"
        );
    }
    Ok(unbalanced)
}

/// Validates a group and turns it into the entries about to be stored.
fn prepare_group(
    entries: Vec<NewLedgerEntry>,
    created_at: DateTime<Utc>,
) -> ResultLedger<Vec<LedgerEntry>> {
    let first = entries
        .first()
        .ok_or_else(|| LedgerError::Validation("transaction group is empty".to_string()))?;
    let currency = first.currency;

    let mut group_id = None;
    let mut debits = Decimal::ZERO;
    let mut credits = Decimal::ZERO;
    for entry in &entries {
        entry.validate()?;
        if entry.currency != currency {
            return Err(LedgerError::Validation(format!(
                "transaction group mixes currencies {currency} and {}",
                entry.currency
            )));
        }
        match (group_id, entry.transaction_group_id) {
            (Some(current), Some(other)) if current != other => {
                return Err(LedgerError::Validation(format!(
                    "transaction group mixes group ids {current} and {other}"
                )));
            }
            (None, Some(other)) => group_id = Some(other),
            _ => {}
        }
        let sum = match entry.entry_type {
            EntryType::Debit => &mut debits,
            EntryType::Credit => &mut credits,
        };
        *sum = sum
            .checked_add(entry.amount)
            .ok_or_else(|| LedgerError::Validation("transaction group total overflows".to_string()))?;
    }

    let group_id = group_id.unwrap_or_else(Uuid::new_v4);
    if debits != credits {
        return Err(LedgerError::Unbalanced {
            transaction_group_id: group_id,
            currency,
            debits,
            credits,
        });
    }

    Ok(entries
        .into_iter()
        .map(|entry| materialize(entry, group_id, created_at))
        .collect())
}

fn materialize(entry: NewLedgerEntry, group_id: Uuid, created_at: DateTime<Utc>) -> LedgerEntry {
    LedgerEntry {
        id: Uuid::new_v4(),
        debit_account: entry.debit_account,
        credit_account: entry.credit_account,
        amount: entry.amount,
        currency: entry.currency,
        reference_type: entry.reference_type,
        reference_id: entry.reference_id,
        merchant_id: entry.merchant_id,
        description: entry.description,
        transaction_group_id: group_id,
        entry_type: entry.entry_type,
        metadata: entry.metadata,
        created_at,
    }
}

async fn insert_entries<C: ConnectionTrait>(conn: &C, entries: &[LedgerEntry]) -> ResultLedger<()> {
    let models = entries
        .iter()
        .enumerate()
        .map(|(position, entry)| ledger_entries::ActiveModel::from_entry(entry, position as i32))
        .collect::<ResultLedger<Vec<_>>>()?;
    ledger_entries::Entity::insert_many(models)
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

fn into_entries(models: Vec<ledger_entries::Model>) -> ResultLedger<Vec<LedgerEntry>> {
    models.into_iter().map(LedgerEntry::try_from).collect()
}
