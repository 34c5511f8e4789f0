//! Merchant balance aggregate operations.
//!
//! Two mutation shapes exist:
//!
//! - [`update`]: optimistic whole-record write. The caller hands back a
//!   snapshot it read earlier; a moved version is reported as
//!   [`BalanceError::VersionConflict`] and the caller re-reads and retries.
//! - Field deltas and composite operations ([`increment_available`],
//!   [`record_payment`], [`deduct_balance`], ...). Each evaluates its
//!   precondition against the current row and writes the new state with one
//!   compare-and-swap statement guarded by the version it read. A lost race is
//!   re-evaluated against the fresh row, so callers never loop.
//!
//! Rejected operations never write, and every successful mutation bumps the
//! version by exactly one.

use rust_decimal::Decimal;
use sea_orm::{
    ActiveValue, ConnectionTrait, DatabaseTransaction, DbBackend, QueryFilter, QuerySelect,
    SqlErr, prelude::*,
};

use crate::{BalanceError, Bucket, MerchantBalance, merchant_balances};

type ResultBalance<T> = Result<T, BalanceError>;

/// Upper bound on re-evaluations when concurrent writers keep moving the version.
const MAX_CAS_ATTEMPTS: usize = 16;

/// Creates the zeroed balance of a newly onboarded merchant (version 1).
pub async fn create<C: ConnectionTrait>(conn: &C, merchant_id: &str) -> ResultBalance<MerchantBalance> {
    // Stored verbatim; lookups never trim.
    if merchant_id.is_empty() || merchant_id.trim() != merchant_id {
        return Err(BalanceError::InvalidMerchantId {
            merchant_id: merchant_id.to_string(),
        });
    }

    let balance = MerchantBalance::new(merchant_id, crate::now());
    let model = merchant_balances::ActiveModel::from(&balance);
    match merchant_balances::Entity::insert(model)
        .exec_without_returning(conn)
        .await
    {
        Ok(_) => {
            tracing::debug!(merchant_id, "merchant balance created");
            Ok(balance)
        }
        Err(err) if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
            Err(BalanceError::AlreadyExists {
                merchant_id: merchant_id.to_string(),
            })
        }
        Err(err) => Err(err.into()),
    }
}

/// Latest committed snapshot. Takes no lock.
pub async fn get<C: ConnectionTrait>(conn: &C, merchant_id: &str) -> ResultBalance<MerchantBalance> {
    let model = merchant_balances::Entity::find_by_id(merchant_id.to_string())
        .one(conn)
        .await?
        .ok_or_else(|| not_found(merchant_id))?;
    MerchantBalance::try_from(model)
}

/// Reads the balance and locks its row until `txn` commits or rolls back.
///
/// Use it when a decision spans several rows that must be written consistently.
/// SQLite has no row locks; there the database-wide writer lock of the
/// transaction provides the exclusion.
pub async fn get_for_update(
    txn: &DatabaseTransaction,
    merchant_id: &str,
) -> ResultBalance<MerchantBalance> {
    let mut query = merchant_balances::Entity::find_by_id(merchant_id.to_string());
    if txn.get_database_backend() != DbBackend::Sqlite {
        query = query.lock_exclusive();
    }
    let model = query.one(txn).await?.ok_or_else(|| not_found(merchant_id))?;
    MerchantBalance::try_from(model)
}

/// Optimistic whole-record write of `snapshot`.
///
/// Succeeds only if the stored version still equals `snapshot.version`; the
/// returned balance carries the bumped version.
pub async fn update<C: ConnectionTrait>(
    conn: &C,
    snapshot: &MerchantBalance,
) -> ResultBalance<MerchantBalance> {
    snapshot.check_invariants()?;

    let mut next = snapshot.clone();
    next.version = snapshot.version + 1;
    next.updated_at = crate::now();

    if compare_and_swap(conn, &next, snapshot.version).await? {
        tracing::debug!(
            merchant_id = %next.merchant_id,
            version = next.version,
            "merchant balance updated"
        );
        return Ok(next);
    }

    // Nothing was written: tell a missing row apart from a stale snapshot.
    let exists = merchant_balances::Entity::find_by_id(snapshot.merchant_id.clone())
        .one(conn)
        .await?
        .is_some();
    if exists {
        Err(BalanceError::VersionConflict {
            merchant_id: snapshot.merchant_id.clone(),
            expected: snapshot.version,
        })
    } else {
        Err(not_found(&snapshot.merchant_id))
    }
}

/// Adds `amount` to `available_vnd` (and `total_vnd`).
pub async fn increment_available<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    amount: Decimal,
) -> ResultBalance<MerchantBalance> {
    ensure_non_negative(amount)?;
    mutate(conn, merchant_id, "increment_available", |b| {
        b.available_vnd = add(&b.merchant_id, b.available_vnd, amount)?;
        b.total_vnd = add(&b.merchant_id, b.total_vnd, amount)?;
        Ok(())
    })
    .await
}

/// Removes `amount` from `available_vnd` (and `total_vnd`).
///
/// Funds held by a reservation cannot be withdrawn this way: the amount must
/// fit in the unreserved headroom.
pub async fn decrement_available<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    amount: Decimal,
) -> ResultBalance<MerchantBalance> {
    ensure_non_negative(amount)?;
    mutate(conn, merchant_id, "decrement_available", |b| {
        ensure_covers(b, Bucket::Available, b.available_vnd, amount)?;
        ensure_covers(b, Bucket::Unreserved, b.unreserved_vnd(), amount)?;
        b.available_vnd -= amount;
        b.total_vnd -= amount;
        Ok(())
    })
    .await
}

/// Adds `amount` to `pending_vnd` (and `total_vnd`).
pub async fn increment_pending<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    amount: Decimal,
) -> ResultBalance<MerchantBalance> {
    ensure_non_negative(amount)?;
    mutate(conn, merchant_id, "increment_pending", |b| {
        b.pending_vnd = add(&b.merchant_id, b.pending_vnd, amount)?;
        b.total_vnd = add(&b.merchant_id, b.total_vnd, amount)?;
        Ok(())
    })
    .await
}

/// Removes `amount` from `pending_vnd` (and `total_vnd`).
pub async fn decrement_pending<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    amount: Decimal,
) -> ResultBalance<MerchantBalance> {
    ensure_non_negative(amount)?;
    mutate(conn, merchant_id, "decrement_pending", |b| {
        ensure_covers(b, Bucket::Pending, b.pending_vnd, amount)?;
        b.pending_vnd -= amount;
        b.total_vnd -= amount;
        Ok(())
    })
    .await
}

/// Holds `amount` of the available funds. `available_vnd` itself is untouched.
pub async fn increment_reserved<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    amount: Decimal,
) -> ResultBalance<MerchantBalance> {
    ensure_non_negative(amount)?;
    mutate(conn, merchant_id, "increment_reserved", |b| {
        ensure_covers(b, Bucket::Unreserved, b.unreserved_vnd(), amount)?;
        b.reserved_vnd = add(&b.merchant_id, b.reserved_vnd, amount)?;
        Ok(())
    })
    .await
}

/// Releases `amount` of a previous hold.
pub async fn decrement_reserved<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    amount: Decimal,
) -> ResultBalance<MerchantBalance> {
    ensure_non_negative(amount)?;
    mutate(conn, merchant_id, "decrement_reserved", |b| {
        ensure_covers(b, Bucket::Reserved, b.reserved_vnd, amount)?;
        b.reserved_vnd -= amount;
        Ok(())
    })
    .await
}

/// Holds funds for a payout request.
pub async fn reserve_balance<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    amount: Decimal,
) -> ResultBalance<MerchantBalance> {
    increment_reserved(conn, merchant_id, amount).await
}

/// Releases the hold of a cancelled or rejected payout.
pub async fn release_reserved_balance<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    amount: Decimal,
) -> ResultBalance<MerchantBalance> {
    decrement_reserved(conn, merchant_id, amount).await
}

/// Credits a confirmed payment to the available funds.
pub async fn record_payment<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    amount: Decimal,
) -> ResultBalance<MerchantBalance> {
    ensure_positive(amount, "payment amount must be > 0")?;
    let now = crate::now();
    mutate(conn, merchant_id, "record_payment", |b| {
        b.available_vnd = add(&b.merchant_id, b.available_vnd, amount)?;
        b.total_vnd = add(&b.merchant_id, b.total_vnd, amount)?;
        b.total_received_vnd = add(&b.merchant_id, b.total_received_vnd, amount)?;
        b.total_payments_count += 1;
        b.last_payment_at = Some(now);
        Ok(())
    })
    .await
}

/// Settles a payout of `amount` plus `fee` against reserved, available funds.
///
/// Both `available_vnd` and `reserved_vnd` must cover `amount + fee`; both are
/// drained by it, together with `total_vnd`.
pub async fn deduct_balance<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    amount: Decimal,
    fee: Decimal,
) -> ResultBalance<MerchantBalance> {
    ensure_non_negative(fee)?;
    ensure_positive(amount, "payout amount must be > 0")?;
    let debit = add(merchant_id, amount, fee)?;
    let now = crate::now();
    mutate(conn, merchant_id, "deduct_balance", |b| {
        ensure_covers(b, Bucket::Available, b.available_vnd, debit)?;
        ensure_covers(b, Bucket::Reserved, b.reserved_vnd, debit)?;
        b.available_vnd -= debit;
        b.total_vnd -= debit;
        b.reserved_vnd -= debit;
        b.total_paid_out_vnd = add(&b.merchant_id, b.total_paid_out_vnd, amount)?;
        b.total_fees_vnd = add(&b.merchant_id, b.total_fees_vnd, fee)?;
        b.total_payouts_count += 1;
        b.last_payout_at = Some(now);
        Ok(())
    })
    .await
}

/// Same as [`deduct_balance`].
pub async fn record_payout<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    amount: Decimal,
    fee: Decimal,
) -> ResultBalance<MerchantBalance> {
    deduct_balance(conn, merchant_id, amount, fee).await
}

/// Moves `amount` out of pending; `amount - fee` becomes available and `fee`
/// is booked as collected fees.
pub async fn convert_pending_to_available<C: ConnectionTrait>(
    conn: &C,
    merchant_id: &str,
    amount: Decimal,
    fee: Decimal,
) -> ResultBalance<MerchantBalance> {
    check_conversion(amount, fee)?;
    mutate(conn, merchant_id, "convert_pending_to_available", |b| {
        ensure_covers(b, Bucket::Pending, b.pending_vnd, amount)?;
        b.pending_vnd -= amount;
        b.available_vnd = add(&b.merchant_id, b.available_vnd, amount - fee)?;
        b.total_vnd -= fee;
        b.total_fees_vnd = add(&b.merchant_id, b.total_fees_vnd, fee)?;
        Ok(())
    })
    .await
}

pub(crate) fn ensure_non_negative(amount: Decimal) -> ResultBalance<()> {
    if amount < Decimal::ZERO {
        return Err(BalanceError::NegativeAmount { amount });
    }
    Ok(())
}

pub(crate) fn ensure_positive(amount: Decimal, reason: &'static str) -> ResultBalance<()> {
    ensure_non_negative(amount)?;
    if amount.is_zero() {
        return Err(BalanceError::InvalidAmount { amount, reason });
    }
    Ok(())
}

pub(crate) fn check_conversion(amount: Decimal, fee: Decimal) -> ResultBalance<()> {
    ensure_non_negative(amount)?;
    ensure_non_negative(fee)?;
    if fee >= amount {
        return Err(BalanceError::InvalidAmount {
            amount: fee,
            reason: "fee must be lower than the converted amount",
        });
    }
    Ok(())
}

/// Read, apply `change`, and write back through a version-guarded CAS.
///
/// `change` runs against the freshest row on every attempt and may reject the
/// operation, in which case nothing is written.
async fn mutate<C, F>(
    conn: &C,
    merchant_id: &str,
    operation: &'static str,
    change: F,
) -> ResultBalance<MerchantBalance>
where
    C: ConnectionTrait,
    F: Fn(&mut MerchantBalance) -> ResultBalance<()>,
{
    for _ in 0..MAX_CAS_ATTEMPTS {
        let current = get(conn, merchant_id).await?;
        let mut next = current.clone();
        if let Err(err) = change(&mut next) {
            tracing::debug!(merchant_id, operation, error = %err, "balance mutation rejected");
            return Err(err);
        }
        next.version = current.version + 1;
        next.updated_at = crate::now();
        next.check_invariants()?;

        if compare_and_swap(conn, &next, current.version).await? {
            tracing::debug!(
                merchant_id,
                operation,
                version = next.version,
                "merchant balance mutated"
            );
            return Ok(next);
        }
    }

    tracing::warn!(merchant_id, operation, "balance mutation kept losing the race");
    let latest = get(conn, merchant_id).await?;
    Err(BalanceError::VersionConflict {
        merchant_id: merchant_id.to_string(),
        expected: latest.version,
    })
}

/// Writes `next` if the stored version still equals `expected_version`.
/// Returns whether the row was written.
async fn compare_and_swap<C: ConnectionTrait>(
    conn: &C,
    next: &MerchantBalance,
    expected_version: i64,
) -> ResultBalance<bool> {
    let mut model = merchant_balances::ActiveModel::from(next);
    model.merchant_id = ActiveValue::NotSet;
    model.created_at = ActiveValue::NotSet;

    let result = merchant_balances::Entity::update_many()
        .set(model)
        .filter(merchant_balances::Column::MerchantId.eq(next.merchant_id.as_str()))
        .filter(merchant_balances::Column::Version.eq(expected_version))
        .exec(conn)
        .await?;
    Ok(result.rows_affected == 1)
}

fn ensure_covers(
    balance: &MerchantBalance,
    bucket: Bucket,
    available: Decimal,
    requested: Decimal,
) -> ResultBalance<()> {
    if requested > available {
        return Err(BalanceError::InsufficientFunds {
            merchant_id: balance.merchant_id.clone(),
            bucket,
            requested,
            available,
        });
    }
    Ok(())
}

fn add(merchant_id: &str, a: Decimal, b: Decimal) -> ResultBalance<Decimal> {
    a.checked_add(b).ok_or_else(|| BalanceError::InvalidState {
        merchant_id: merchant_id.to_string(),
        reason: format!("{a} + {b} overflows"),
    })
}

fn not_found(merchant_id: &str) -> BalanceError {
    BalanceError::NotFound {
        merchant_id: merchant_id.to_string(),
    }
}
