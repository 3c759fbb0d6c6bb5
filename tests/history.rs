mod common;

use std::{collections::HashMap, time::Duration};

use alloy::{hex, primitives::U256, sol_types::SolCall};
use common::{PagedIndexer, TOKEN, WALLET, native_transaction, token_transfer};
use tokio_stream::StreamExt;
use wallet_chain_sync::{
    Notification, SyncError, SyncMessage, TransactionHistoryBuilder, TransactionType,
    abi::CloneFactory,
};

fn purchase_method_id() -> String {
    format!("0x{}", hex::encode(CloneFactory::setPurchaseRentalContractCall::SELECTOR))
}

#[tokio::test]
async fn token_transfer_and_purchase_call_merge_into_one_purchase() -> anyhow::Result<()> {
    let indexer = PagedIndexer {
        tokens: HashMap::from([(1, vec![token_transfer("0xabc", 7, 1_000, 10)])]),
        natives: HashMap::from([(
            1,
            vec![native_transaction("0xabc", 7, 1_000, &purchase_method_id())],
        )]),
        ..Default::default()
    };
    let history = TransactionHistoryBuilder::new(TOKEN).indexer(indexer).build()?;

    let records = history.get_transactions(0, None, 1, 50, WALLET).await?;

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.tx_hash, "0xabc");
    assert_eq!(record.kind, TransactionType::Purchase);
    let transfers: Vec<_> =
        record.transfers.iter().map(|t| (t.token_symbol.as_str(), t.amount)).collect();
    assert_eq!(transfers, vec![("LMR", U256::from(10)), ("ETH", U256::from(1))]);
    Ok(())
}

#[tokio::test]
async fn records_are_sorted_newest_first() -> anyhow::Result<()> {
    let indexer = PagedIndexer {
        tokens: HashMap::from([(
            1,
            vec![
                token_transfer("0x1", 1, 100, 1),
                token_transfer("0x3", 3, 300, 1),
                token_transfer("0x2", 2, 200, 1),
            ],
        )]),
        ..Default::default()
    };
    let history = TransactionHistoryBuilder::new(TOKEN).indexer(indexer).build()?;

    let records = history.get_transactions(0, None, 1, 50, WALLET).await?;

    let hashes: Vec<_> = records.iter().map(|r| r.tx_hash.as_str()).collect();
    assert_eq!(hashes, vec!["0x3", "0x2", "0x1"]);
    Ok(())
}

#[tokio::test]
async fn second_watch_is_rejected_and_first_keeps_running() -> anyhow::Result<()> {
    let indexer = PagedIndexer {
        tokens: HashMap::from([(1, vec![token_transfer("0xabc", 7, 1_000, 10)])]),
        ..Default::default()
    };
    let history = TransactionHistoryBuilder::new(TOKEN)
        .indexer(indexer)
        .polling_interval(Duration::from_secs(60))
        .build()?;

    let mut stream = history.start_watching(WALLET, 0)?;
    assert!(matches!(history.start_watching(WALLET, 0), Err(SyncError::AlreadyStarted)));

    assert_eq!(stream.next().await.unwrap()?, Notification::ScanStarted);
    let Some(Ok(SyncMessage::Data(page))) = stream.next().await else {
        panic!("expected the first page");
    };
    assert_eq!(page.page, 1);
    assert_eq!(page.transactions[0].tx_hash, "0xabc");
    assert_eq!(stream.next().await.unwrap()?, Notification::ScanFinished);
    assert!(history.is_watching());
    assert_eq!(history.cursor(), 7);

    history.stop_watching().await;
    assert!(!history.is_watching());
    Ok(())
}
