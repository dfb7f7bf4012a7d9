//! Recorder, gateway and verifier against the in-process chain.

use std::sync::Arc;
use std::time::Duration;

use agritrace_chain::{
    digest, envelope, Account, Address, ChainError, ChainNode, ChainRecorder, ContractGateway,
    GasParams, GasPolicy, GasPriceMode, MemoryChain, NewProduct, StageUpdate, TransactionSender,
    TxRequest, VerificationReader, U256,
};
use serde_json::json;

const TIMEOUT: Duration = Duration::from_secs(5);

fn recorder(chain: &Arc<MemoryChain>) -> ChainRecorder<MemoryChain> {
    ChainRecorder::new(chain.clone(), GasPolicy::default(), TIMEOUT)
        .with_poll_interval(Duration::from_millis(10))
}

fn gateway(chain: &Arc<MemoryChain>) -> ContractGateway<MemoryChain> {
    ContractGateway::new(chain.clone(), GasPolicy::default(), TIMEOUT)
        .with_poll_interval(Duration::from_millis(10))
}

fn verifier(chain: &Arc<MemoryChain>) -> VerificationReader<MemoryChain> {
    VerificationReader::new(chain.clone(), Some("https://explorer.test/".to_string()))
}

fn tomato() -> NewProduct {
    NewProduct {
        product_id: "P1".to_string(),
        product_name: "Tomatoes".to_string(),
        farmer_name: "Asha".to_string(),
        farmer_location: "Nashik".to_string(),
        crop_type: "Vegetable".to_string(),
        harvest_date: 1_717_200_000,
    }
}

fn stage(product_id: &str, name: &str, status: &str) -> StageUpdate {
    StageUpdate {
        product_id: product_id.to_string(),
        stage_name: name.to_string(),
        location: "Pune".to_string(),
        status: status.to_string(),
        notes: String::new(),
    }
}

#[tokio::test]
async fn record_anchors_digest_as_self_transfer() {
    let chain = Arc::new(MemoryChain::new());
    let payload = json!({"batchId": "B1", "cropType": "wheat"});

    let tx = recorder(&chain).record("addBatch", &payload).await.unwrap();

    let expected = digest(&envelope("addBatch", &payload));
    assert_eq!(tx.digest, Some(format!("0x{:x}", expected)));
    assert_eq!(tx.block_number, 1);

    let hash = agritrace_chain::parse_tx_hash(&tx.tx_hash).unwrap();
    let input = chain.transaction_input(hash).await.unwrap();
    assert_eq!(input.as_ref(), expected.as_slice());

    let result = verifier(&chain).verify(&tx.tx_hash).await.unwrap();
    assert!(result.is_success());
    assert_eq!(result.confirmations, 1);
    assert_eq!(result.from, format!("{}", chain.operator()));
    assert_eq!(result.contract_address, Some(format!("{}", chain.operator())));
    assert_eq!(result.gas_price, "30000000000");
    assert_eq!(result.timestamp, "2023-11-14T22:13:22Z");
    assert_eq!(
        result.explorer_url.as_deref(),
        Some(format!("https://explorer.test/tx/{}", tx.tx_hash).as_str())
    );
}

#[tokio::test]
async fn confirmations_grow_with_later_blocks() {
    let chain = Arc::new(MemoryChain::new());
    let recorder = recorder(&chain);

    let first = recorder.record("addEvent", &json!({"n": 1})).await.unwrap();
    recorder.record("addEvent", &json!({"n": 2})).await.unwrap();
    recorder.record("addEvent", &json!({"n": 3})).await.unwrap();

    let result = verifier(&chain).verify(&first.tx_hash).await.unwrap();
    assert_eq!(result.confirmations, 3);
}

#[tokio::test]
async fn insufficient_balance_is_rejected_before_submit() {
    let chain = Arc::new(MemoryChain::new());
    chain.set_balance(chain.operator(), U256::from(1000u64)).await;

    let err = recorder(&chain)
        .record("addBatch", &json!({"batchId": "B1"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::InsufficientFunds(_)));
    assert_eq!(chain.transaction_count().await, 0);
}

#[tokio::test]
async fn offline_node_is_unavailable() {
    let chain = Arc::new(MemoryChain::new());
    chain.set_offline(true).await;

    let err = recorder(&chain)
        .record("addBatch", &json!({"batchId": "B1"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::ChainUnavailable(_)));
    assert!(err.is_retriable());
}

#[tokio::test]
async fn slow_confirmation_times_out() {
    let chain = Arc::new(MemoryChain::new());
    chain.set_confirmation_delay(Duration::from_secs(30)).await;

    let recorder = ChainRecorder::new(
        chain.clone(),
        GasPolicy::default(),
        Duration::from_millis(200),
    )
    .with_poll_interval(Duration::from_millis(20));

    let err = recorder
        .record("addBatch", &json!({"batchId": "B1"}))
        .await
        .unwrap_err();
    let Some(tx_hash) = err.unconfirmed_tx() else {
        panic!("expected timeout, got {err}");
    };
    // The transaction was broadcast even though we stopped waiting.
    assert_eq!(chain.transaction_count().await, 1);
    assert!(chain
        .transaction_input(agritrace_chain::parse_tx_hash(tx_hash).unwrap())
        .await
        .is_some());
}

#[tokio::test]
async fn gas_price_ceiling_blocks_write() {
    let chain = Arc::new(MemoryChain::new());
    chain.set_gas_price(80_000_000_000).await;

    let policy = GasPolicy {
        price: GasPriceMode::Estimated {
            multiplier: 1.0,
            max_gwei: 50,
        },
        ..Default::default()
    };
    let recorder = ChainRecorder::new(chain.clone(), policy, TIMEOUT);

    let err = recorder
        .record("addBatch", &json!({"batchId": "B1"}))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::GasPriceTooHigh { .. }));
    assert_eq!(chain.transaction_count().await, 0);
}

#[tokio::test]
async fn transfer_moves_value() {
    let chain = Arc::new(MemoryChain::new());
    let farmer = Address::repeat_byte(0x42);
    let amount = agritrace_chain::parse_eth_amount("0.5").unwrap();

    let tx = recorder(&chain).transfer(farmer, amount).await.unwrap();
    assert!(tx.digest.is_none());
    assert_eq!(tx.gas_used, 21_000);
    assert_eq!(chain.balance(farmer).await.unwrap(), amount);

    let result = verifier(&chain).verify(&tx.tx_hash).await.unwrap();
    assert_eq!(result.contract_address, Some(format!("{}", farmer)));
}

#[tokio::test]
async fn verify_reports_pending_then_success() {
    let chain = Arc::new(MemoryChain::new());
    chain.withhold_receipts(true).await;

    let tx_hash = chain
        .submit(TxRequest {
            to: chain.operator(),
            value: U256::ZERO,
            data: Default::default(),
            gas: GasParams {
                limit: 21_000,
                price_wei: 1,
            },
        })
        .await
        .unwrap();
    let hash = format!("0x{:x}", tx_hash);

    let err = verifier(&chain).verify(&hash).await.unwrap_err();
    assert!(matches!(err, ChainError::Pending(_)));

    chain.release_receipts().await;
    let result = verifier(&chain).verify(&hash).await.unwrap();
    assert!(result.is_success());
}

#[tokio::test]
async fn verify_rejects_malformed_and_unknown_hashes() {
    let chain = Arc::new(MemoryChain::new());
    let verifier = verifier(&chain);

    let err = verifier.verify("0x1234").await.unwrap_err();
    assert!(matches!(err, ChainError::InvalidHash(_)));

    let unknown = format!("0x{}", "0".repeat(64));
    let err = verifier.verify(&unknown).await.unwrap_err();
    assert!(matches!(err, ChainError::TransactionNotFound(_)));
}

#[tokio::test]
async fn gateway_registers_product_and_stages() {
    let chain = Arc::new(MemoryChain::new());
    let gateway = gateway(&chain);

    let added = gateway.add_product(&tomato()).await.unwrap();
    assert!(gateway.product_exists("P1").await.unwrap());

    gateway
        .update_stage(&stage("P1", "Harvested", "Completed"))
        .await
        .unwrap();
    gateway
        .update_stage(&stage("P1", "Shipped", "In Transit"))
        .await
        .unwrap();
    gateway.update_stage(&stage("P1", "Delivered", "")).await.unwrap();

    let product = gateway.get_product("P1").await.unwrap();
    assert_eq!(product.product_name, "Tomatoes");
    assert_eq!(product.harvest_date, "2024-06-01T00:00:00Z");
    assert_eq!(product.stage_count, 3);
    let names: Vec<&str> = product.stages.iter().map(|s| s.stage_name.as_str()).collect();
    assert_eq!(names, ["Harvested", "Shipped", "Delivered"]);
    assert_eq!(product.stages[1].status, "In Transit");
    assert_eq!(product.stages[2].status, "Completed");
    assert_eq!(product.stages[2].index, 2);

    let result = verifier(&chain)
        .verify(&added.tx_hash_hex())
        .await
        .unwrap();
    assert_eq!(
        result.contract_address,
        Some(format!("{}", chain.contract_address()))
    );
}

#[tokio::test]
async fn gateway_duplicate_and_missing_products() {
    let chain = Arc::new(MemoryChain::new());
    let gateway = gateway(&chain);

    gateway.add_product(&tomato()).await.unwrap();
    let sent = chain.transaction_count().await;

    let err = gateway.add_product(&tomato()).await.unwrap_err();
    assert!(matches!(err, ChainError::DuplicateProduct(id) if id == "P1"));

    let err = gateway
        .update_stage(&stage("P404", "Harvested", "Completed"))
        .await
        .unwrap_err();
    assert!(matches!(err, ChainError::ProductNotFound(_)));

    let err = gateway.get_product("P404").await.unwrap_err();
    assert!(matches!(err, ChainError::ProductNotFound(_)));

    // Pre-checks never reach the chain.
    assert_eq!(chain.transaction_count().await, sent);
}

#[tokio::test]
async fn too_little_gas_reverts() {
    let chain = Arc::new(MemoryChain::new());
    let policy = GasPolicy {
        add_product_limit: 100_000,
        ..Default::default()
    };
    let gateway = ContractGateway::new(chain.clone(), policy, TIMEOUT)
        .with_poll_interval(Duration::from_millis(10));

    let err = gateway.add_product(&tomato()).await.unwrap_err();
    assert!(matches!(err, ChainError::Reverted(_)));
    assert!(!gateway.product_exists("P1").await.unwrap());
}

#[tokio::test]
async fn works_through_a_trait_object() {
    let node: Arc<dyn ChainNode> = Arc::new(MemoryChain::new());
    let recorder: ChainRecorder = ChainRecorder::new(node.clone(), GasPolicy::default(), TIMEOUT);
    let verifier: VerificationReader = VerificationReader::new(node, None);

    let tx = recorder
        .record("confirmDelivery", &json!({"batchId": "B1"}))
        .await
        .unwrap();
    let result = verifier.verify(&tx.tx_hash).await.unwrap();
    assert!(result.explorer_url.is_none());
}
