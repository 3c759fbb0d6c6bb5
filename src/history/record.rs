use alloy::primitives::{Address, U256};
use serde::Serialize;

/// Classification of a wallet transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Transfer,
    Purchase,
    Create,
    Update,
    Delete,
    Closeout,
}

/// One value movement inside a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transfer {
    pub from: Address,
    /// `None` for contract creations.
    pub to: Option<Address>,
    pub amount: U256,
    pub token_symbol: String,
}

/// A wallet transaction as shown in the history.
///
/// Records sharing a `tx_hash` are merged with [`merge_transactions`](super::merge_transactions),
/// never listed twice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransactionRecord {
    pub tx_hash: String,
    pub block_number: u64,
    /// Unix seconds.
    pub timestamp: u64,
    pub kind: TransactionType,
    /// `gas_price * gas_used`, in wei.
    pub fee: U256,
    pub transfers: Vec<Transfer>,
}
