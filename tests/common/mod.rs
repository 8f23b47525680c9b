//! テスト用のインメモリ外部サービス

#![allow(dead_code)]

use async_trait::async_trait;
use bch_sweep_gateway::backend::{BalanceSource, Broadcaster, TokenClassifier, UtxoSource};
use bch_sweep_gateway::types::{OutputClass, TokenInfo};
use bch_sweep_gateway::{Balance, ClassifiedOutput, SweepEngine, SweepError, SweepPolicy, SweepResult, UnspentOutput};
use bitcoin::hashes::Hash;
use bitcoin::{Network, Transaction, Txid};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const WIF: &str = "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn";
pub const DEST: &str = "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a";
pub const TOKEN_A: &str = "4de69e374a8ed21cbddd47f2338cc0f479dc58daa2bbe11cd604ca488eca0ddf";
pub const TOKEN_B: &str = "c4b0d62156b3fa5c8f3436079b5394f7edc1bef5dc1cd2f9d0c4d46f82cca479";

pub fn utxo(n: u8, value: u64) -> UnspentOutput {
    UnspentOutput {
        txid: Txid::from_byte_array([n; 32]),
        output_index: n as u32,
        value,
        confirmations: 6,
    }
}

#[derive(Default)]
pub struct FakeBackend {
    pub balance: Mutex<Option<SweepResult<Balance>>>,
    pub utxos: Mutex<Vec<UnspentOutput>>,
    /// (txid, vout) -> トークン情報。含まれないものは BCH のみ
    pub tokens: Mutex<HashMap<(Txid, u32), TokenInfo>>,
    pub broadcast_error: Mutex<Option<SweepError>>,
    pub balance_calls: AtomicUsize,
    pub utxo_calls: AtomicUsize,
    pub classify_calls: AtomicUsize,
    pub submitted: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn with_funds(confirmed: i64, unconfirmed: i64, utxos: Vec<UnspentOutput>) -> Arc<Self> {
        let backend = FakeBackend::default();
        *backend.balance.lock().unwrap() = Some(Ok(Balance { confirmed, unconfirmed }));
        *backend.utxos.lock().unwrap() = utxos;
        Arc::new(backend)
    }

    pub fn mark_token(&self, output: &UnspentOutput, token_id: &str, qty: u64) {
        self.tokens.lock().unwrap().insert(
            (output.txid, output.output_index),
            TokenInfo { token_id: token_id.to_string(), token_quantity: qty, decimals: 0 },
        );
    }

    pub fn submitted_transactions(&self) -> Vec<Transaction> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|hex| bitcoin::consensus::encode::deserialize_hex(hex).unwrap())
            .collect()
    }

    pub fn engine(self: &Arc<Self>, policy: SweepPolicy) -> SweepEngine {
        SweepEngine::new(
            Network::Bitcoin,
            policy,
            self.clone(),
            self.clone(),
            self.clone(),
            self.clone(),
        )
    }
}

#[async_trait]
impl BalanceSource for FakeBackend {
    async fn balance(&self, _address: &str) -> SweepResult<Balance> {
        self.balance_calls.fetch_add(1, Ordering::SeqCst);
        match self.balance.lock().unwrap().take() {
            Some(result) => result,
            None => Ok(Balance::default()),
        }
    }
}

#[async_trait]
impl UtxoSource for FakeBackend {
    async fn utxos(&self, _address: &str) -> SweepResult<Vec<UnspentOutput>> {
        self.utxo_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.utxos.lock().unwrap().clone())
    }
}

#[async_trait]
impl TokenClassifier for FakeBackend {
    async fn classify(&self, outputs: &[UnspentOutput]) -> SweepResult<Vec<ClassifiedOutput>> {
        self.classify_calls.fetch_add(1, Ordering::SeqCst);
        let tokens = self.tokens.lock().unwrap();
        Ok(outputs
            .iter()
            .map(|o| ClassifiedOutput {
                output: o.clone(),
                class: match tokens.get(&(o.txid, o.output_index)) {
                    Some(info) => OutputClass::TokenCarrying(info.clone()),
                    None => OutputClass::Plain,
                },
            })
            .collect())
    }
}

#[async_trait]
impl Broadcaster for FakeBackend {
    async fn submit(&self, raw_tx_hex: &str) -> SweepResult<Txid> {
        if let Some(err) = self.broadcast_error.lock().unwrap().take() {
            return Err(err);
        }
        self.submitted.lock().unwrap().push(raw_tx_hex.to_string());
        let tx: Transaction = bitcoin::consensus::encode::deserialize_hex(raw_tx_hex)
            .map_err(|e| SweepError::Internal(e.to_string()))?;
        Ok(tx.compute_txid())
    }
}
