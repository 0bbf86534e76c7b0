#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use upi_switch::adapters::MemoryStore;
use upi_switch::bank::{BankGateway, GatewaySettings, SimulatedBank};
use upi_switch::config::Config;
use upi_switch::ports::SwitchStore;
use upi_switch::schemas::{ProcessTransactionRequest, RegisterBankRequest, RegisterVpaRequest};
use upi_switch::services::InMemoryVpaCache;
use upi_switch::Switch;

pub const ALICE: &str = "alice@hdfc";
pub const BOB: &str = "bob@icici";

pub struct TestSwitch {
    pub switch: Switch,
    pub store: Arc<MemoryStore>,
    pub bank: Arc<SimulatedBank>,
    pub config: Config,
}

pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    let mut env: HashMap<String, String> = HashMap::new();
    env.insert("STORE_BACKEND".to_string(), "memory".to_string());
    env.insert("INSTANCE_ID".to_string(), "test-instance".to_string());
    env.insert("BANK_TIMEOUT_MS".to_string(), "200".to_string());
    for (key, value) in overrides {
        env.insert(key.to_string(), value.to_string());
    }
    Config::from_lookup(|key| env.get(key).cloned()).unwrap()
}

/// A switch on the in-memory store with every bank answered by a scripted simulator.
pub async fn setup(overrides: &[(&str, &str)]) -> TestSwitch {
    let config = test_config(overrides);
    let store = Arc::new(MemoryStore::new());
    let bank = Arc::new(SimulatedBank::new());
    let gateway = Arc::new(BankGateway::with_fallback(
        GatewaySettings::from_config(&config),
        bank.clone(),
    ));
    let dyn_store: Arc<dyn SwitchStore> = store.clone();
    let switch = Switch::assemble(&config, dyn_store, gateway, Arc::new(InMemoryVpaCache::new())).unwrap();

    TestSwitch {
        switch,
        store,
        bank,
        config,
    }
}

/// Registers HDFC and ICICI with one VPA each.
pub async fn setup_with_participants(overrides: &[(&str, &str)]) -> TestSwitch {
    let ts = setup(overrides).await;
    for (code, name) in [("HDFC", "HDFC Bank"), ("ICICI", "ICICI Bank")] {
        ts.switch
            .state
            .registry
            .register_bank(RegisterBankRequest {
                bank_code: code.to_string(),
                name: name.to_string(),
                endpoint: format!("https://{}.bank.test/upi", code.to_lowercase()),
                public_key: None,
            })
            .await
            .unwrap();
    }
    for (vpa, bank_code, account, holder) in [
        (ALICE, "HDFC", "HDFC0001", "Alice"),
        (BOB, "ICICI", "ICIC0002", "Bob"),
    ] {
        ts.switch
            .state
            .directory
            .register(RegisterVpaRequest {
                vpa: vpa.to_string(),
                bank_code: bank_code.to_string(),
                account_number: account.to_string(),
                holder_name: holder.to_string(),
                mobile: None,
            })
            .await
            .unwrap();
    }
    ts
}

pub fn payment(transaction_id: &str, amount: i64) -> ProcessTransactionRequest {
    ProcessTransactionRequest {
        transaction_id: transaction_id.to_string(),
        payer_vpa: ALICE.to_string(),
        payee_vpa: BOB.to_string(),
        amount,
        currency: "INR".to_string(),
        transaction_type: upi_switch::domain::TransactionType::P2p,
        description: Some("dinner".to_string()),
        signature: None,
    }
}
