#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use alloy::{
    primitives::{Address, B256, LogData, address},
    rpc::types::{Filter, Log},
};
use async_trait::async_trait;
use wallet_chain_sync::{
    SyncError,
    history::{Indexer, IndexerError, NativeTransaction, TokenTransfer, TransferQuery},
    log_poller::LogSource,
};

pub const WALLET: Address = address!("0x00000000000000000000000000000000000000aa");
pub const TOKEN: Address = address!("0x00000000000000000000000000000000000000bb");

/// Indexer serving fixed items per page number.
#[derive(Debug, Default)]
pub struct PagedIndexer {
    pub tokens: HashMap<u64, Vec<TokenTransfer>>,
    pub natives: HashMap<u64, Vec<NativeTransaction>>,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Indexer for PagedIndexer {
    fn name(&self) -> &str {
        "paged"
    }

    async fn token_transfers(
        &self,
        query: TransferQuery,
    ) -> Result<Vec<TokenTransfer>, IndexerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tokens.get(&query.page).cloned().unwrap_or_default())
    }

    async fn native_transactions(
        &self,
        query: TransferQuery,
    ) -> Result<Vec<NativeTransaction>, IndexerError> {
        Ok(self.natives.get(&query.page).cloned().unwrap_or_default())
    }
}

pub fn token_transfer(hash: &str, block: u64, timestamp: u64, amount: u64) -> TokenTransfer {
    TokenTransfer {
        hash: hash.into(),
        block_number: block.to_string(),
        time_stamp: timestamp.to_string(),
        from: WALLET.to_string(),
        to: TOKEN.to_string(),
        value: amount.to_string(),
        gas_price: "1".into(),
        gas_used: "21000".into(),
    }
}

pub fn native_transaction(
    hash: &str,
    block: u64,
    timestamp: u64,
    method_id: &str,
) -> NativeTransaction {
    NativeTransaction {
        hash: hash.into(),
        block_number: block.to_string(),
        time_stamp: timestamp.to_string(),
        from: WALLET.to_string(),
        to: TOKEN.to_string(),
        value: "1".into(),
        gas_price: "1".into(),
        gas_used: "21000".into(),
        method_id: Some(method_id.into()),
        input: "0x".into(),
    }
}

/// Serves one log per watched address on the first query for it, nothing afterwards.
#[derive(Debug, Default)]
pub struct OneLogPerAddress {
    served: Mutex<Vec<Address>>,
    pub queries: AtomicUsize,
}

#[async_trait]
impl LogSource for OneLogPerAddress {
    async fn logs(&self, filter: &Filter) -> Result<Vec<Log>, SyncError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut served = self.served.lock().unwrap();
        let mut logs = Vec::new();
        for address in filter.address.iter() {
            if served.contains(address) {
                continue;
            }
            served.push(*address);
            logs.push(Log {
                inner: alloy::primitives::Log {
                    address: *address,
                    data: LogData::new_unchecked(vec![B256::repeat_byte(0x11)], Default::default()),
                },
                block_number: Some(5),
                transaction_hash: Some(B256::repeat_byte(address.0[19])),
                log_index: Some(0),
                ..Default::default()
            });
        }
        Ok(logs)
    }
}
