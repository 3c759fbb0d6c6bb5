use std::collections::{HashMap, hash_map::Entry};

use alloy::{
    primitives::{Address, B256, U256},
    rpc::types::{Log, TransactionReceipt},
};
use thiserror::Error;

use crate::{
    abi::{self, AbiRegistry, Lumerin},
    history::{
        TransactionRecord, TransactionType, Transfer,
        indexer::{NativeTransaction, TokenTransfer},
    },
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field}: {value:?}")]
pub struct MappingError {
    pub field: &'static str,
    pub value: String,
}

/// Symbols attached to token and native transfers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenSymbols {
    pub token: String,
    pub native: String,
}

impl Default for TokenSymbols {
    fn default() -> Self {
        Self { token: "LMR".to_owned(), native: "ETH".to_owned() }
    }
}

/// Maps a token transfer reported by an indexer. Token transfers are always
/// [`TransactionType::Transfer`].
///
/// # Errors
///
/// Fails when a numeric or address field does not parse.
pub fn map_token_transfer(
    tx: &TokenTransfer,
    symbol: &str,
) -> Result<TransactionRecord, MappingError> {
    Ok(TransactionRecord {
        tx_hash: tx.hash.clone(),
        block_number: parse_u64("blockNumber", &tx.block_number)?,
        timestamp: parse_u64("timeStamp", &tx.time_stamp)?,
        kind: TransactionType::Transfer,
        fee: fee(&tx.gas_price, &tx.gas_used)?,
        transfers: vec![Transfer {
            from: parse_address("from", &tx.from)?,
            to: parse_optional_address("to", &tx.to)?,
            amount: parse_u256("value", &tx.value)?,
            token_symbol: symbol.to_owned(),
        }],
    })
}

/// Maps a native transaction reported by an indexer. The transaction type is taken from
/// the call's method selector.
///
/// # Errors
///
/// Fails when a numeric or address field does not parse.
pub fn map_native_transaction(
    registry: &AbiRegistry,
    tx: &NativeTransaction,
    symbol: &str,
) -> Result<TransactionRecord, MappingError> {
    let method = tx.selector().and_then(|selector| registry.method_name(selector));
    Ok(TransactionRecord {
        tx_hash: tx.hash.clone(),
        block_number: parse_u64("blockNumber", &tx.block_number)?,
        timestamp: parse_u64("timeStamp", &tx.time_stamp)?,
        kind: TransactionType::from_contract_call(method),
        fee: fee(&tx.gas_price, &tx.gas_used)?,
        transfers: vec![Transfer {
            from: parse_address("from", &tx.from)?,
            to: parse_optional_address("to", &tx.to)?,
            amount: parse_u256("value", &tx.value)?,
            token_symbol: symbol.to_owned(),
        }],
    })
}

/// Merges records sharing a transaction hash and sorts the result by timestamp, newest first.
///
/// Transfers of merged records are concatenated in input order. A non-transfer type wins
/// over [`TransactionType::Transfer`]; between two non-transfer types the later one wins.
/// Records with equal timestamps keep their first-seen order.
#[must_use]
pub fn merge_transactions<I>(records: I) -> Vec<TransactionRecord>
where
    I: IntoIterator<Item = TransactionRecord>,
{
    let mut merged: Vec<TransactionRecord> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in records {
        match positions.entry(record.tx_hash.clone()) {
            Entry::Occupied(entry) => {
                let existing = &mut merged[*entry.get()];
                existing.transfers.extend(record.transfers);
                if record.kind != TransactionType::Transfer {
                    existing.kind = record.kind;
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(merged.len());
                merged.push(record);
            }
        }
    }

    merged.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    merged
}

/// Folds `part`, a possibly partial record of the same transaction, into `existing` with the
/// rules of [`merge_transactions`]. Transfers `existing` already carries are not added again.
/// Returns whether `existing` changed.
pub fn absorb_transaction(existing: &mut TransactionRecord, part: TransactionRecord) -> bool {
    let known = existing.transfers.len();
    let mut matched = vec![false; known];
    let mut changed = false;

    for transfer in part.transfers {
        let position = (0..known).find(|&i| !matched[i] && existing.transfers[i] == transfer);
        match position {
            Some(i) => matched[i] = true,
            None => {
                existing.transfers.push(transfer);
                changed = true;
            }
        }
    }
    if part.kind != TransactionType::Transfer && part.kind != existing.kind {
        existing.kind = part.kind;
        changed = true;
    }
    changed
}

/// Native part of a transaction sent by the wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentCall {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
}

/// Fields of a mined receipt needed to build a [`TransactionRecord`].
#[derive(Clone, Debug)]
pub struct ReceiptSummary {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub effective_gas_price: u128,
    pub logs: Vec<Log>,
}

impl From<&TransactionReceipt> for ReceiptSummary {
    fn from(receipt: &TransactionReceipt) -> Self {
        Self {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.unwrap_or_default(),
            gas_used: receipt.gas_used,
            effective_gas_price: receipt.effective_gas_price,
            logs: receipt.inner.logs().to_vec(),
        }
    }
}

/// Builds the record of a transaction sent by the wallet from its call and receipt.
///
/// Token `Transfer` logs are appended as token transfers. The type is taken from the last
/// emitted event that classifies as something other than a transfer. Logs that do not decode
/// against the registry are skipped.
#[must_use]
pub fn map_sent_transaction(
    registry: &AbiRegistry,
    call: &SentCall,
    receipt: &ReceiptSummary,
    symbols: &TokenSymbols,
    timestamp: u64,
) -> TransactionRecord {
    let mut transfers = vec![Transfer {
        from: call.from,
        to: call.to,
        amount: call.value,
        token_symbol: symbols.native.clone(),
    }];
    let mut kind = TransactionType::Transfer;

    for log in &receipt.logs {
        let Some(name) = log.topics().first().and_then(|topic| registry.event_name(topic)) else {
            debug!(tx_hash = %receipt.tx_hash, "Skipping receipt log with unknown event");
            continue;
        };
        if name == "Transfer" {
            match abi::decode::<Lumerin::Transfer>(log.data()) {
                Ok(event) => transfers.push(Transfer {
                    from: event.from,
                    to: Some(event.to),
                    amount: event.value,
                    token_symbol: symbols.token.clone(),
                }),
                Err(err) => {
                    warn!(tx_hash = %receipt.tx_hash, error = %err, "Skipping undecodable log");
                    continue;
                }
            }
        }
        let event_kind = TransactionType::from_event(Some(name));
        if event_kind != TransactionType::Transfer {
            kind = event_kind;
        }
    }

    TransactionRecord {
        tx_hash: receipt.tx_hash.to_string(),
        block_number: receipt.block_number,
        timestamp,
        kind,
        fee: U256::from(receipt.effective_gas_price).saturating_mul(U256::from(receipt.gas_used)),
        transfers,
    }
}

fn fee(gas_price: &str, gas_used: &str) -> Result<U256, MappingError> {
    Ok(parse_u256("gasPrice", gas_price)?.saturating_mul(parse_u256("gasUsed", gas_used)?))
}

fn invalid(field: &'static str, value: &str) -> MappingError {
    MappingError { field, value: value.to_owned() }
}

fn parse_u64(field: &'static str, value: &str) -> Result<u64, MappingError> {
    value.trim().parse().map_err(|_| invalid(field, value))
}

fn parse_u256(field: &'static str, value: &str) -> Result<U256, MappingError> {
    U256::from_str_radix(value.trim(), 10).map_err(|_| invalid(field, value))
}

fn parse_address(field: &'static str, value: &str) -> Result<Address, MappingError> {
    value.trim().parse().map_err(|_| invalid(field, value))
}

fn parse_optional_address(
    field: &'static str,
    value: &str,
) -> Result<Option<Address>, MappingError> {
    if value.trim().is_empty() { Ok(None) } else { parse_address(field, value).map(Some) }
}
