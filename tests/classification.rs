use alloy::{
    hex,
    primitives::{U256, keccak256},
    sol_types::SolCall,
};
use wallet_chain_sync::{
    TransactionType,
    abi::{AbiRegistry, CloneFactory, Implementation},
    history::{NativeTransaction, map_native_transaction},
};

fn call_with(method_id: &str) -> NativeTransaction {
    NativeTransaction {
        hash: "0xdef".into(),
        block_number: "12".into(),
        time_stamp: "1700000000".into(),
        from: "0x00000000000000000000000000000000000000aa".into(),
        to: "0x00000000000000000000000000000000000000cc".into(),
        value: "0".into(),
        gas_price: "3".into(),
        gas_used: "7".into(),
        method_id: Some(method_id.into()),
        input: "0x".into(),
    }
}

fn method_id(selector: [u8; 4]) -> String {
    format!("0x{}", hex::encode(selector))
}

#[test]
fn contract_calls_are_typed_by_selector() -> anyhow::Result<()> {
    let registry = AbiRegistry::known();
    let cases = [
        (CloneFactory::setPurchaseRentalContractCall::SELECTOR, TransactionType::Purchase),
        (CloneFactory::setCreateNewRentalContractV2Call::SELECTOR, TransactionType::Create),
        (CloneFactory::setContractDeletedCall::SELECTOR, TransactionType::Delete),
        (CloneFactory::setUpdateContractInformationCall::SELECTOR, TransactionType::Update),
        (Implementation::setContractCloseOutCall::SELECTOR, TransactionType::Closeout),
    ];

    for (selector, expected) in cases {
        let record = map_native_transaction(&registry, &call_with(&method_id(selector)), "ETH")?;
        assert_eq!(record.kind, expected, "selector {}", method_id(selector));
    }
    Ok(())
}

#[test]
fn unknown_selector_is_a_transfer() -> anyhow::Result<()> {
    let record = map_native_transaction(&AbiRegistry::known(), &call_with("0xdeadbeef"), "ETH")?;

    assert_eq!(record.kind, TransactionType::Transfer);
    assert_eq!(record.fee, U256::from(21));
    Ok(())
}

#[test]
fn registered_signatures_are_resolved() {
    let mut registry = AbiRegistry::new();
    let selector = registry.register_function("setPurchaseRentalContractV3(address,string)");

    assert_eq!(selector.as_slice(), &keccak256("setPurchaseRentalContractV3(address,string)")[..4]);
    let name = registry.method_name(&method_id(selector.0));
    assert_eq!(name, Some("setPurchaseRentalContractV3"));
    assert_eq!(TransactionType::from_contract_call(name), TransactionType::Purchase);
}
