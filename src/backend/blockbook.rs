//! Blockbook 互換インデクサーからの残高・UTXO取得

use async_trait::async_trait;
use bitcoin::Txid;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use super::{BalanceSource, UtxoSource, check_status};
use crate::error::{SweepError, SweepResult};
use crate::types::{Balance, UnspentOutput};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddressInfo {
    balance: String,
    #[serde(default)]
    unconfirmed_balance: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BlockbookUtxo {
    txid: String,
    vout: u32,
    value: String,
    #[serde(default)]
    confirmations: u32,
}

#[derive(Clone)]
pub struct BlockbookClient {
    base_url: String,
    http: reqwest::Client,
}

impl BlockbookClient {
    pub fn new(base_url: &str, timeout: Duration) -> SweepResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SweepError::Internal(format!("HTTPクライアントの生成に失敗しました: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }
}

fn invalid_response(what: &str, detail: impl std::fmt::Display) -> SweepError {
    SweepError::downstream(502, format!("インデクサーの応答が不正です ({}): {}", what, detail))
}

fn parse_balance(info: AddressInfo) -> SweepResult<Balance> {
    let confirmed = info
        .balance
        .parse::<i64>()
        .map_err(|e| invalid_response("balance", e))?;
    let unconfirmed = match info.unconfirmed_balance.as_deref() {
        Some(v) => v.parse::<i64>().map_err(|e| invalid_response("unconfirmedBalance", e))?,
        None => 0,
    };
    Ok(Balance { confirmed, unconfirmed })
}

fn parse_utxos(raw: Vec<BlockbookUtxo>) -> SweepResult<Vec<UnspentOutput>> {
    raw.into_iter()
        .map(|u| -> SweepResult<UnspentOutput> {
            Ok(UnspentOutput {
                txid: Txid::from_str(&u.txid).map_err(|e| invalid_response("txid", e))?,
                output_index: u.vout,
                value: u.value.parse().map_err(|e| invalid_response("value", e))?,
                confirmations: u.confirmations,
            })
        })
        .collect()
}

#[async_trait]
impl BalanceSource for BlockbookClient {
    async fn balance(&self, address: &str) -> SweepResult<Balance> {
        let url = format!("{}/api/v2/address/{}", self.base_url, address);
        log::debug!("残高照会: {}", url);
        let response = self
            .http
            .get(&url)
            .query(&[("details", "basic")])
            .send()
            .await?;
        let info: AddressInfo = check_status(response).await?.json().await?;
        parse_balance(info)
    }
}

#[async_trait]
impl UtxoSource for BlockbookClient {
    async fn utxos(&self, address: &str) -> SweepResult<Vec<UnspentOutput>> {
        let url = format!("{}/api/v2/utxo/{}", self.base_url, address);
        log::debug!("UTXO照会: {}", url);
        let response = self.http.get(&url).send().await?;
        let raw: Vec<BlockbookUtxo> = check_status(response).await?.json().await?;
        let utxos = parse_utxos(raw)?;
        log::debug!("UTXO {} 件を取得しました", utxos.len());
        Ok(utxos)
    }
}
