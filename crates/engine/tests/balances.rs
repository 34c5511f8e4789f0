use std::sync::Arc;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{Database, DatabaseConnection, TransactionTrait};

use engine::{BalanceError, Bucket, balances};
use migration::MigratorTrait;

async fn db_with_merchant(merchant_id: &str) -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    balances::create(&db, merchant_id).await.unwrap();
    db
}

#[tokio::test]
async fn create_zeroes_balance_and_rejects_duplicates() {
    let db = db_with_merchant("m1").await;

    let balance = balances::get(&db, "m1").await.unwrap();
    assert_eq!(balance.version, 1);
    assert_eq!(balance.total_vnd, Decimal::ZERO);
    assert_eq!(balance.last_payment_at, None);

    assert_eq!(
        balances::create(&db, "m1").await.unwrap_err(),
        BalanceError::AlreadyExists {
            merchant_id: "m1".to_string()
        }
    );
    assert_eq!(
        balances::get(&db, "nope").await.unwrap_err(),
        BalanceError::NotFound {
            merchant_id: "nope".to_string()
        }
    );
}

#[tokio::test]
async fn create_rejects_blank_or_padded_ids() {
    let db = db_with_merchant("m1").await;

    for merchant_id in ["", "   ", " m2", "m2\n"] {
        assert_eq!(
            balances::create(&db, merchant_id).await.unwrap_err(),
            BalanceError::InvalidMerchantId {
                merchant_id: merchant_id.to_string()
            }
        );
    }
    assert_eq!(
        balances::get(&db, "m2").await.unwrap_err(),
        BalanceError::NotFound {
            merchant_id: "m2".to_string()
        }
    );
}

#[tokio::test]
async fn record_payment_on_new_balance() {
    let db = db_with_merchant("m1").await;

    let balance = balances::record_payment(&db, "m1", dec!(2_300_000))
        .await
        .unwrap();

    assert_eq!(balance.available_vnd, dec!(2_300_000));
    assert_eq!(balance.total_vnd, dec!(2_300_000));
    assert_eq!(balance.total_received_vnd, dec!(2_300_000));
    assert_eq!(balance.total_payments_count, 1);
    assert_eq!(balance.pending_vnd, Decimal::ZERO);
    assert_eq!(balance.reserved_vnd, Decimal::ZERO);
    assert!(balance.last_payment_at.is_some());
    assert_eq!(balance.version, 2);
    assert_eq!(balances::get(&db, "m1").await.unwrap(), balance);

    assert_eq!(
        balances::record_payment(&db, "m1", Decimal::ZERO)
            .await
            .unwrap_err(),
        BalanceError::InvalidAmount {
            amount: Decimal::ZERO,
            reason: "payment amount must be > 0"
        }
    );
}

#[tokio::test]
async fn reservation_is_capped_by_unreserved_headroom() {
    let db = db_with_merchant("m1").await;
    balances::increment_available(&db, "m1", dec!(1_000_000))
        .await
        .unwrap();

    let balance = balances::increment_reserved(&db, "m1", dec!(300_000))
        .await
        .unwrap();
    assert_eq!(balance.reserved_vnd, dec!(300_000));
    assert_eq!(balance.available_vnd, dec!(1_000_000));

    assert_eq!(
        balances::increment_reserved(&db, "m1", dec!(800_000))
            .await
            .unwrap_err(),
        BalanceError::InsufficientFunds {
            merchant_id: "m1".to_string(),
            bucket: Bucket::Unreserved,
            requested: dec!(800_000),
            available: dec!(700_000),
        }
    );
    let balance = balances::get(&db, "m1").await.unwrap();
    assert_eq!(balance.reserved_vnd, dec!(300_000));
    assert_eq!(balance.version, 3);
}

#[tokio::test]
async fn rejected_decrement_leaves_bucket_unchanged() {
    let db = db_with_merchant("m1").await;
    balances::increment_available(&db, "m1", dec!(300_000))
        .await
        .unwrap();

    assert_eq!(
        balances::decrement_available(&db, "m1", dec!(500_000))
            .await
            .unwrap_err(),
        BalanceError::InsufficientFunds {
            merchant_id: "m1".to_string(),
            bucket: Bucket::Available,
            requested: dec!(500_000),
            available: dec!(300_000),
        }
    );
    let balance = balances::get(&db, "m1").await.unwrap();
    assert_eq!(balance.available_vnd, dec!(300_000));
    assert_eq!(balance.version, 2);

    // Reserved funds cannot be withdrawn directly.
    balances::increment_reserved(&db, "m1", dec!(200_000))
        .await
        .unwrap();
    let err = balances::decrement_available(&db, "m1", dec!(150_000))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BalanceError::InsufficientFunds {
            bucket: Bucket::Unreserved,
            ..
        }
    ));

    assert!(matches!(
        balances::decrement_pending(&db, "m1", dec!(1)).await,
        Err(BalanceError::InsufficientFunds {
            bucket: Bucket::Pending,
            ..
        })
    ));
    assert!(matches!(
        balances::decrement_reserved(&db, "m1", dec!(200_001)).await,
        Err(BalanceError::InsufficientFunds {
            bucket: Bucket::Reserved,
            ..
        })
    ));
    assert_eq!(balances::get(&db, "m1").await.unwrap().version, 3);
}

#[tokio::test]
async fn negative_amounts_fail_before_storage() {
    let db = db_with_merchant("m1").await;

    let negative = BalanceError::NegativeAmount { amount: dec!(-1) };
    assert_eq!(
        balances::increment_available(&db, "m1", dec!(-1))
            .await
            .unwrap_err(),
        negative
    );
    assert_eq!(
        balances::decrement_reserved(&db, "m1", dec!(-1))
            .await
            .unwrap_err(),
        negative
    );
    // No row is looked up for a negative amount.
    assert_eq!(
        balances::increment_pending(&db, "ghost", dec!(-1))
            .await
            .unwrap_err(),
        negative
    );
    assert_eq!(balances::get(&db, "m1").await.unwrap().version, 1);
}

#[tokio::test]
async fn deduct_balance_drains_available_and_reserved() {
    let db = db_with_merchant("m1").await;
    balances::record_payment(&db, "m1", dec!(1_000_000))
        .await
        .unwrap();
    balances::reserve_balance(&db, "m1", dec!(510_000))
        .await
        .unwrap();

    let balance = balances::deduct_balance(&db, "m1", dec!(500_000), dec!(10_000))
        .await
        .unwrap();
    assert_eq!(balance.available_vnd, dec!(490_000));
    assert_eq!(balance.total_vnd, dec!(490_000));
    assert_eq!(balance.reserved_vnd, Decimal::ZERO);
    assert_eq!(balance.total_paid_out_vnd, dec!(500_000));
    assert_eq!(balance.total_fees_vnd, dec!(10_000));
    assert_eq!(balance.total_payouts_count, 1);
    assert!(balance.last_payout_at.is_some());

    // Without a reservation the payout is refused.
    assert_eq!(
        balances::record_payout(&db, "m1", dec!(100_000), Decimal::ZERO)
            .await
            .unwrap_err(),
        BalanceError::InsufficientFunds {
            merchant_id: "m1".to_string(),
            bucket: Bucket::Reserved,
            requested: dec!(100_000),
            available: Decimal::ZERO,
        }
    );
    assert_eq!(balances::get(&db, "m1").await.unwrap(), balance);
}

#[tokio::test]
async fn convert_pending_to_available_books_the_fee() {
    let db = db_with_merchant("m1").await;
    balances::increment_pending(&db, "m1", dec!(1_000_000))
        .await
        .unwrap();

    let balance = balances::convert_pending_to_available(&db, "m1", dec!(600_000), dec!(6_000))
        .await
        .unwrap();
    assert_eq!(balance.pending_vnd, dec!(400_000));
    assert_eq!(balance.available_vnd, dec!(594_000));
    assert_eq!(balance.total_vnd, dec!(994_000));
    assert_eq!(balance.total_fees_vnd, dec!(6_000));

    assert!(matches!(
        balances::convert_pending_to_available(&db, "m1", dec!(100), dec!(100)).await,
        Err(BalanceError::InvalidAmount { .. })
    ));
    assert!(matches!(
        balances::convert_pending_to_available(&db, "m1", dec!(500_000), dec!(0)).await,
        Err(BalanceError::InsufficientFunds {
            bucket: Bucket::Pending,
            ..
        })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_updates_from_the_same_version() {
    let db = db_with_merchant("m1").await;
    for _ in 0..4 {
        balances::increment_available(&db, "m1", dec!(100)).await.unwrap();
    }

    let snapshot = balances::get(&db, "m1").await.unwrap();
    assert_eq!(snapshot.version, 5);

    let mut first = snapshot.clone();
    first.available_vnd += dec!(50);
    first.total_vnd += dec!(50);
    let mut second = snapshot.clone();
    second.pending_vnd += dec!(70);
    second.total_vnd += dec!(70);

    let (a, b) = tokio::join!(
        balances::update(&db, &first),
        balances::update(&db, &second)
    );

    let conflict = BalanceError::VersionConflict {
        merchant_id: "m1".to_string(),
        expected: 5,
    };
    let written = match (a, b) {
        (Ok(written), Err(err)) | (Err(err), Ok(written)) => {
            assert_eq!(err, conflict);
            written
        }
        (a, b) => panic!("expected exactly one winner, got {a:?} and {b:?}"),
    };
    assert_eq!(written.version, 6);
    assert_eq!(balances::get(&db, "m1").await.unwrap(), written);
}

#[tokio::test]
async fn update_rejects_broken_invariants_without_writing() {
    let db = db_with_merchant("m1").await;

    let mut snapshot = balances::get(&db, "m1").await.unwrap();
    snapshot.available_vnd = dec!(10);
    let err = balances::update(&db, &snapshot).await.unwrap_err();
    assert!(matches!(err, BalanceError::InvalidState { .. }));
    assert_eq!(balances::get(&db, "m1").await.unwrap().version, 1);

    let mut ghost = balances::get(&db, "m1").await.unwrap();
    ghost.merchant_id = "ghost".to_string();
    assert_eq!(
        balances::update(&db, &ghost).await.unwrap_err(),
        BalanceError::NotFound {
            merchant_id: "ghost".to_string()
        }
    );
}

#[tokio::test]
async fn version_grows_by_one_per_mutation() {
    let db = db_with_merchant("m1").await;

    balances::record_payment(&db, "m1", dec!(1_000)).await.unwrap();
    balances::increment_pending(&db, "m1", dec!(500)).await.unwrap();
    balances::reserve_balance(&db, "m1", dec!(400)).await.unwrap();
    balances::release_reserved_balance(&db, "m1", dec!(100))
        .await
        .unwrap();
    balances::convert_pending_to_available(&db, "m1", dec!(500), dec!(5))
        .await
        .unwrap();
    balances::deduct_balance(&db, "m1", dec!(300), Decimal::ZERO)
        .await
        .unwrap();
    let snapshot = balances::get(&db, "m1").await.unwrap();
    let balance = balances::update(&db, &snapshot).await.unwrap();

    assert_eq!(balance.version, 1 + 7);
    assert_eq!(balance.available_vnd, dec!(1_195));
    assert_eq!(balance.total_vnd, dec!(1_195));
    assert_eq!(balance.reserved_vnd, Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deltas_all_apply() {
    let db = Arc::new(db_with_merchant("m1").await);

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let db = Arc::clone(&db);
        tasks.push(tokio::spawn(async move {
            balances::increment_available(db.as_ref(), "m1", dec!(1_000)).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let balance = balances::get(db.as_ref(), "m1").await.unwrap();
    assert_eq!(balance.available_vnd, dec!(10_000));
    assert_eq!(balance.total_vnd, dec!(10_000));
    assert_eq!(balance.version, 11);
}

#[tokio::test]
async fn get_for_update_inside_a_transaction() {
    let db = db_with_merchant("m1").await;

    let txn = db.begin().await.unwrap();
    let locked = balances::get_for_update(&txn, "m1").await.unwrap();
    balances::increment_available(&txn, "m1", dec!(70)).await.unwrap();
    drop(txn);

    // Dropping the transaction rolled the delta back.
    assert_eq!(balances::get(&db, "m1").await.unwrap(), locked);
}
