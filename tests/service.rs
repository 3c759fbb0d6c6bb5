use alloy::primitives::address;
use wallet_chain_sync::{SyncError, config::SyncConfig, events::WalletEvent, service::SyncService};

const CONFIG: &str = r#"
    chain-id = 11155111
    rpc-urls = ["http://127.0.0.1:1", "http://127.0.0.1:2"]
    page-size = 25
    clone-factory-address = "0x00000000000000000000000000000000000000cc"
    token-address = "0x00000000000000000000000000000000000000bb"

    [[indexers]]
    url = "http://127.0.0.1:3/api"
    kind = "blockscout"
"#;

#[tokio::test]
async fn service_is_wired_from_config() -> anyhow::Result<()> {
    let config = SyncConfig::from_toml(CONFIG)?;
    let wallet = address!("0x00000000000000000000000000000000000000aa");

    let service = SyncService::from_config(&config, wallet).await?;

    assert_eq!(service.wallet(), wallet);
    assert_eq!(service.pool().endpoints().len(), 2);
    assert_eq!(service.history().page_size(), 25);
    assert!(service.registry().is_empty());
    assert!(!service.history().is_watching());
    Ok(())
}

#[tokio::test]
async fn refresh_without_start_announces_every_contract() -> anyhow::Result<()> {
    let config = SyncConfig::from_toml(CONFIG)?;
    let wallet = address!("0x00000000000000000000000000000000000000aa");
    let service = SyncService::from_config(&config, wallet).await?;
    let mut events = service.subscribe();
    let contract = address!("0x00000000000000000000000000000000000000c1");

    service.refresh_contracts([contract])?;

    assert!(matches!(events.recv().await?, WalletEvent::ContractsScanStarted));
    assert!(matches!(
        events.recv().await?,
        WalletEvent::ContractUpdated { address } if address == contract
    ));
    assert!(matches!(events.recv().await?, WalletEvent::ContractsScanFinished));
    assert!(service.registry().contains(&contract));

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn zero_event_bus_capacity_is_rejected() -> anyhow::Result<()> {
    let config = SyncConfig::from_toml(&format!("event-bus-capacity = 0\n{CONFIG}"))?;
    let wallet = address!("0x00000000000000000000000000000000000000aa");

    let result = SyncService::from_config(&config, wallet).await;

    assert!(matches!(result, Err(SyncError::InvalidBufferCapacity)));
    Ok(())
}
