//! Known contract ABI: event and function signatures used to classify chain activity.
//!
//! [`AbiRegistry`] resolves 4-byte call selectors and 32-byte `topic0` hashes to names.
//! [`TransactionType::from_contract_call`] and [`TransactionType::from_event`] turn those
//! names into a transaction type.

use std::collections::HashMap;

use alloy::{
    primitives::{Address, B256, LogData, Selector, keccak256},
    sol,
    sol_types::{SolCall, SolEvent},
};
use thiserror::Error;

use crate::history::TransactionType;

sol! {
    interface CloneFactory {
        event contractCreated(address indexed _address, string _pubkey);
        event clonefactoryContractPurchased(address indexed _address, address indexed _validator);
        event contractDeleteUpdated(address indexed _address, bool _isDeleted);
        event purchaseInfoUpdated(address indexed _address);

        function setCreateNewRentalContract(
            uint256 _price,
            uint256 _limit,
            uint256 _speed,
            uint256 _length,
            address _validator,
            string _pubKey
        ) external returns (address);
        function setCreateNewRentalContractV2(
            uint256 _price,
            uint256 _limit,
            uint256 _speed,
            uint256 _length,
            int8 _profitTarget,
            address _validator,
            string _pubKey
        ) external returns (address);
        function setPurchaseRentalContract(
            address _contractAddress,
            string _cipherText,
            uint32 _termsVersion
        ) external;
        function setPurchaseRentalContractV2(
            address _contractAddress,
            address _validatorAddress,
            string _encrValidatorURL,
            string _encrDestURL,
            uint32 _termsVersion
        ) external;
        function setContractDeleted(address _contractAddress, bool _isDeleted) external;
        function setUpdateContractInformation(
            address _contractAddress,
            uint256 _price,
            uint256 _limit,
            uint256 _speed,
            uint256 _length
        ) external;
        function setUpdateContractInformationV2(
            address _contractAddress,
            uint256 _price,
            uint256 _limit,
            uint256 _speed,
            uint256 _length,
            int8 _profitTarget
        ) external;
    }

    interface Implementation {
        event contractClosed(address indexed _address, uint256 _closeOutType);

        function setContractCloseOut(uint256 _closeOutType) external;
    }

    interface Lumerin {
        event Transfer(address indexed from, address indexed to, uint256 value);
    }
}

#[derive(Error, Debug, Clone)]
pub enum DecodeError {
    #[error("Log has no topics")]
    MissingTopic,
    #[error("Event {0} not found")]
    UnknownEvent(B256),
    #[error("Event {event} decode error: {reason}")]
    Malformed { event: &'static str, reason: String },
}

/// `topic0` hashes of the contract lifecycle events watched by the log poller.
#[must_use]
pub fn contract_event_topics() -> Vec<B256> {
    vec![
        CloneFactory::contractCreated::SIGNATURE_HASH,
        CloneFactory::clonefactoryContractPurchased::SIGNATURE_HASH,
        CloneFactory::contractDeleteUpdated::SIGNATURE_HASH,
        Implementation::contractClosed::SIGNATURE_HASH,
        CloneFactory::purchaseInfoUpdated::SIGNATURE_HASH,
    ]
}

/// Decodes the indexed contract address carried by a contract lifecycle event.
///
/// # Errors
///
/// Fails when the log has no topics, its `topic0` is not a lifecycle event, or the log
/// does not match the event's layout.
pub fn decode_contract_address(log: &LogData) -> Result<Address, DecodeError> {
    let topic0 = *log.topics().first().ok_or(DecodeError::MissingTopic)?;
    match topic0 {
        t if t == CloneFactory::contractCreated::SIGNATURE_HASH => {
            decode::<CloneFactory::contractCreated>(log).map(|e| e._address)
        }
        t if t == CloneFactory::clonefactoryContractPurchased::SIGNATURE_HASH => {
            decode::<CloneFactory::clonefactoryContractPurchased>(log).map(|e| e._address)
        }
        t if t == CloneFactory::contractDeleteUpdated::SIGNATURE_HASH => {
            decode::<CloneFactory::contractDeleteUpdated>(log).map(|e| e._address)
        }
        t if t == CloneFactory::purchaseInfoUpdated::SIGNATURE_HASH => {
            decode::<CloneFactory::purchaseInfoUpdated>(log).map(|e| e._address)
        }
        t if t == Implementation::contractClosed::SIGNATURE_HASH => {
            decode::<Implementation::contractClosed>(log).map(|e| e._address)
        }
        other => Err(DecodeError::UnknownEvent(other)),
    }
}

pub(crate) fn decode<E: SolEvent>(log: &LogData) -> Result<E, DecodeError> {
    E::decode_log_data(log)
        .map_err(|err| DecodeError::Malformed { event: E::SIGNATURE, reason: err.to_string() })
}

/// Selector and event-topic lookup table.
#[derive(Debug, Clone, Default)]
pub struct AbiRegistry {
    functions: HashMap<Selector, String>,
    events: HashMap<B256, String>,
}

impl AbiRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the CloneFactory, Implementation and token interfaces.
    #[must_use]
    pub fn known() -> Self {
        let mut registry = Self::new();

        registry.register_call::<CloneFactory::setCreateNewRentalContractCall>();
        registry.register_call::<CloneFactory::setCreateNewRentalContractV2Call>();
        registry.register_call::<CloneFactory::setPurchaseRentalContractCall>();
        registry.register_call::<CloneFactory::setPurchaseRentalContractV2Call>();
        registry.register_call::<CloneFactory::setContractDeletedCall>();
        registry.register_call::<CloneFactory::setUpdateContractInformationCall>();
        registry.register_call::<CloneFactory::setUpdateContractInformationV2Call>();
        registry.register_call::<Implementation::setContractCloseOutCall>();

        registry.register_sol_event::<CloneFactory::contractCreated>();
        registry.register_sol_event::<CloneFactory::clonefactoryContractPurchased>();
        registry.register_sol_event::<CloneFactory::contractDeleteUpdated>();
        registry.register_sol_event::<CloneFactory::purchaseInfoUpdated>();
        registry.register_sol_event::<Implementation::contractClosed>();
        registry.register_sol_event::<Lumerin::Transfer>();

        registry
    }

    /// Registers a function from its canonical signature, e.g. `transfer(address,uint256)`.
    /// Returns the computed selector.
    pub fn register_function(&mut self, signature: &str) -> Selector {
        let selector = Selector::from_slice(&keccak256(signature.as_bytes())[..4]);
        self.functions.insert(selector, signature_name(signature).to_owned());
        selector
    }

    /// Registers an event from its canonical signature, e.g. `Transfer(address,address,uint256)`.
    /// Returns the computed `topic0`.
    pub fn register_event(&mut self, signature: &str) -> B256 {
        let topic = keccak256(signature.as_bytes());
        self.events.insert(topic, signature_name(signature).to_owned());
        topic
    }

    fn register_call<C: SolCall>(&mut self) {
        self.functions.insert(C::SELECTOR.into(), signature_name(C::SIGNATURE).to_owned());
    }

    fn register_sol_event<E: SolEvent>(&mut self) {
        self.events.insert(E::SIGNATURE_HASH, signature_name(E::SIGNATURE).to_owned());
    }

    #[must_use]
    pub fn function_name(&self, selector: Selector) -> Option<&str> {
        self.functions.get(&selector).map(String::as_str)
    }

    /// Resolves a hex method id as reported by indexers (`0x` + 8 hex chars). Call data
    /// longer than a selector is accepted and truncated; anything shorter resolves to `None`.
    #[must_use]
    pub fn method_name(&self, method_id: &str) -> Option<&str> {
        let hex = method_id.strip_prefix("0x").unwrap_or(method_id);
        let selector: Selector = hex.get(..8)?.parse().ok()?;
        self.function_name(selector)
    }

    #[must_use]
    pub fn event_name(&self, topic0: &B256) -> Option<&str> {
        self.events.get(topic0).map(String::as_str)
    }
}

fn signature_name(signature: &str) -> &str {
    signature.split_once('(').map_or(signature, |(name, _)| name).trim()
}

impl TransactionType {
    /// Classifies a contract call by its function name. Unknown calls are transfers.
    #[must_use]
    pub fn from_contract_call(name: Option<&str>) -> Self {
        let Some(name) = name else {
            return TransactionType::Transfer;
        };
        if name.starts_with("setPurchaseRentalContract") {
            TransactionType::Purchase
        } else if name.starts_with("setCreateNewRentalContract") {
            TransactionType::Create
        } else if name.starts_with("setContractDeleted") {
            TransactionType::Delete
        } else if name.starts_with("setUpdateContractInformation") {
            TransactionType::Update
        } else if name.eq_ignore_ascii_case("setContractCloseout") {
            TransactionType::Closeout
        } else {
            TransactionType::Transfer
        }
    }

    /// Classifies an emitted event by its name. Unknown events are transfers.
    #[must_use]
    pub fn from_event(name: Option<&str>) -> Self {
        match name {
            Some("contractClosed") => TransactionType::Closeout,
            Some("purchaseInfoUpdated") => TransactionType::Update,
            Some("contractCreated") => TransactionType::Create,
            Some("contractDeleteUpdated") => TransactionType::Delete,
            Some(name) if name.ends_with("Purchased") => TransactionType::Purchase,
            _ => TransactionType::Transfer,
        }
    }
}
