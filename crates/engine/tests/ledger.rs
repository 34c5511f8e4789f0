use rust_decimal_macros::dec;
use sea_orm::{Database, DatabaseConnection, TransactionTrait};
use serde_json::json;
use uuid::Uuid;

use engine::{
    Currency, EntryType, LedgerError, NewLedgerEntry, accounts,
    ledger::{self, UnbalancedGroup},
};
use migration::MigratorTrait;

async fn db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    db
}

fn entry(entry_type: EntryType, amount: rust_decimal::Decimal) -> NewLedgerEntry {
    NewLedgerEntry::new(
        entry_type,
        "crypto_pool",
        "merchant_balance:m1",
        amount,
        Currency::Vnd,
        "payment",
        "p1",
        "payment p1 confirmed",
    )
}

#[tokio::test]
async fn append_group_round_trips_every_field() {
    let db = db().await;

    let entries = NewLedgerEntry::pair(
        "crypto_pool",
        "merchant_balance:m1",
        dec!(2300000.50),
        Currency::Vnd,
        "payment",
        "p1",
        "payment p1 confirmed",
    )
    .map(|e| {
        e.with_merchant("m1")
            .with_metadata(json!({"tx_hash": "0xabc", "confirmations": 12}))
    })
    .to_vec();

    let appended = ledger::append_group(&db, entries).await.unwrap();
    assert_eq!(appended.len(), 2);
    let group_id = appended[0].transaction_group_id;
    assert!(appended.iter().all(|e| e.transaction_group_id == group_id));

    for stored in &appended {
        assert_eq!(&ledger::get_by_id(&db, stored.id).await.unwrap(), stored);
    }
    assert_eq!(
        ledger::get_by_transaction_group(&db, group_id).await.unwrap(),
        appended
    );
    assert_eq!(
        ledger::get_by_reference(&db, "payment", "p1").await.unwrap(),
        appended
    );
}

#[tokio::test]
async fn unbalanced_group_is_rejected_and_nothing_persisted() {
    let db = db().await;
    let group = Uuid::new_v4();

    let err = ledger::append_group(
        &db,
        vec![
            entry(EntryType::Debit, dec!(1000)).with_group(group),
            entry(EntryType::Credit, dec!(900)),
        ],
    )
    .await
    .unwrap_err();

    assert_eq!(
        err,
        LedgerError::Unbalanced {
            transaction_group_id: group,
            currency: Currency::Vnd,
            debits: dec!(1000),
            credits: dec!(900),
        }
    );
    assert_eq!(ledger::count(&db).await.unwrap(), 0);
}

#[tokio::test]
async fn invalid_entries_are_rejected() {
    let db = db().await;

    let mut blank = entry(EntryType::Debit, dec!(10));
    blank.description = "  ".to_string();
    let err = ledger::append_single(&db, blank).await.unwrap_err();
    assert_eq!(
        err,
        LedgerError::Validation("description must not be empty".to_string())
    );

    let err = ledger::append_single(&db, entry(EntryType::Debit, dec!(0)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let mut usd = entry(EntryType::Credit, dec!(10));
    usd.currency = Currency::Usd;
    let err = ledger::append_group(&db, vec![entry(EntryType::Debit, dec!(10)), usd])
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(msg) if msg.contains("mixes currencies")));

    let err = ledger::append_group(&db, Vec::new()).await.unwrap_err();
    assert_eq!(
        err,
        LedgerError::Validation("transaction group is empty".to_string())
    );

    assert_eq!(ledger::count(&db).await.unwrap(), 0);
}

#[tokio::test]
async fn get_by_id_reports_missing_entry() {
    let db = db().await;
    let id = Uuid::new_v4();
    assert_eq!(
        ledger::get_by_id(&db, id).await.unwrap_err(),
        LedgerError::NotFound(id)
    );
}

#[tokio::test]
async fn merchant_entries_are_paginated_newest_first() {
    let db = db().await;

    for n in 0..3 {
        let entries = NewLedgerEntry::pair(
            "crypto_pool",
            "merchant_balance:m1",
            dec!(100) * rust_decimal::Decimal::from(n + 1),
            Currency::Vnd,
            "payment",
            &format!("p{n}"),
            "payment",
        )
        .map(|e| e.with_merchant("m1"))
        .to_vec();
        ledger::append_group(&db, entries).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let page = ledger::get_by_merchant(&db, "m1", 2, 0).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].reference_id, "p2");
    assert_eq!(page[0].entry_type, EntryType::Credit);
    assert_eq!(page[1].reference_id, "p2");
    assert_eq!(page[1].entry_type, EntryType::Debit);

    let rest = ledger::get_by_merchant(&db, "m1", 10, 2).await.unwrap();
    assert_eq!(rest.len(), 4);
    assert_eq!(rest.last().unwrap().reference_id, "p0");

    let by_account = ledger::get_by_account(&db, "crypto_pool", 10, 0)
        .await
        .unwrap();
    assert_eq!(by_account.len(), 6);
    assert!(ledger::get_by_merchant(&db, "m2", 10, 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn validate_integrity_reports_single_entries_and_is_idempotent() {
    let db = db().await;

    let balanced = NewLedgerEntry::pair(
        "crypto_pool",
        "merchant_balance:m1",
        dec!(500),
        Currency::Vnd,
        "payment",
        "p1",
        "payment p1",
    )
    .to_vec();
    ledger::append_group(&db, balanced).await.unwrap();
    assert!(ledger::validate_integrity(&db).await.unwrap().is_empty());

    let single = ledger::append_single(&db, entry(EntryType::Debit, dec!(42)))
        .await
        .unwrap();

    let expected = vec![UnbalancedGroup {
        transaction_group_id: single.transaction_group_id,
        currency: Currency::Vnd,
        debits: dec!(42),
        credits: dec!(0),
    }];
    assert_eq!(ledger::validate_integrity(&db).await.unwrap(), expected);
    assert_eq!(ledger::validate_integrity(&db).await.unwrap(), expected);

    // The matching half, appended later, closes the group.
    ledger::append_single(
        &db,
        entry(EntryType::Credit, dec!(42)).with_group(single.transaction_group_id),
    )
    .await
    .unwrap();
    assert!(ledger::validate_integrity(&db).await.unwrap().is_empty());
}

#[tokio::test]
async fn single_entry_moves_only_its_own_side() {
    let db = db().await;

    let debit = ledger::append_single(&db, entry(EntryType::Debit, dec!(42)))
        .await
        .unwrap();
    assert_eq!(
        accounts::account_balance(&db, "crypto_pool").await.unwrap(),
        dec!(42)
    );
    assert_eq!(
        accounts::account_balance(&db, "merchant_balance:m1")
            .await
            .unwrap(),
        dec!(0)
    );

    ledger::append_single(
        &db,
        entry(EntryType::Credit, dec!(42)).with_group(debit.transaction_group_id),
    )
    .await
    .unwrap();
    assert_eq!(
        accounts::account_balance(&db, "crypto_pool").await.unwrap(),
        dec!(42)
    );
    assert_eq!(
        accounts::account_balance(&db, "merchant_balance:m1")
            .await
            .unwrap(),
        dec!(-42)
    );
}

#[tokio::test]
async fn group_appended_inside_a_rolled_back_transaction_disappears() {
    let db = db().await;

    let txn = db.begin().await.unwrap();
    ledger::append_group(&txn, vec![
        entry(EntryType::Debit, dec!(10)),
        entry(EntryType::Credit, dec!(10)),
    ])
    .await
    .unwrap();
    assert_eq!(ledger::count(&txn).await.unwrap(), 2);
    txn.rollback().await.unwrap();

    assert_eq!(ledger::count(&db).await.unwrap(), 0);
}
