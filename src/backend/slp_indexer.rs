//! SLPインデクサーによるUTXOの分類 (BCHのみ / トークン付き)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{TokenClassifier, check_status};
use crate::error::{SweepError, SweepResult};
use crate::slp;
use crate::types::{ClassifiedOutput, OutputClass, TokenInfo, UnspentOutput};

#[derive(Debug, Serialize)]
struct HydrateRequest {
    utxos: Vec<HydrateUtxo>,
}

#[derive(Debug, Serialize)]
struct HydrateUtxo {
    txid: String,
    vout: u32,
    value: u64,
}

#[derive(Debug, Deserialize)]
struct HydrateResponse {
    utxos: Vec<HydratedUtxo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HydratedUtxo {
    txid: String,
    vout: u32,
    /// null はインデクサーが判定できなかったことを示す
    #[serde(default)]
    is_valid: Option<bool>,
    #[serde(default)]
    token_id: Option<String>,
    #[serde(default)]
    token_qty: Option<String>,
    #[serde(default)]
    decimals: Option<u8>,
}

#[derive(Clone)]
pub struct SlpIndexerClient {
    base_url: String,
    http: reqwest::Client,
}

impl SlpIndexerClient {
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

fn contract_error(detail: impl Into<String>) -> SweepError {
    SweepError::downstream(502, format!("SLPインデクサーの応答が不正です: {}", detail.into()))
}

/// 分類結果を入力と1対1で突き合わせる。確実にトークン付きと判定されたものだけを TokenCarrying とする
fn pair_classification(
    outputs: &[UnspentOutput],
    hydrated: Vec<HydratedUtxo>,
) -> SweepResult<Vec<ClassifiedOutput>> {
    if hydrated.len() != outputs.len() {
        return Err(contract_error(format!(
            "件数が一致しません (要求 {}, 応答 {})",
            outputs.len(),
            hydrated.len()
        )));
    }

    outputs
        .iter()
        .zip(hydrated)
        .map(|(output, h)| -> SweepResult<ClassifiedOutput> {
            if h.txid != output.txid.to_string() || h.vout != output.output_index {
                return Err(contract_error(format!(
                    "順序が一致しません ({}:{} に対して {}:{})",
                    output.txid, output.output_index, h.txid, h.vout
                )));
            }
            if h.is_valid != Some(true) {
                return Ok(ClassifiedOutput::plain(output.clone()));
            }

            let token_id = h
                .token_id
                .ok_or_else(|| contract_error("tokenId がありません"))?;
            let token_qty = h
                .token_qty
                .ok_or_else(|| contract_error("tokenQty がありません"))?;
            let decimals = h
                .decimals
                .ok_or_else(|| contract_error("decimals がありません"))?;
            // tokenQty は表示単位。SEND には最小単位で書き込む
            let token_quantity = slp::to_base_units(&token_qty, decimals).ok_or_else(|| {
                contract_error(format!("tokenQty が不正です: {} (decimals {})", token_qty, decimals))
            })?;

            Ok(ClassifiedOutput {
                output: output.clone(),
                class: OutputClass::TokenCarrying(TokenInfo {
                    token_id: token_id.to_ascii_lowercase(),
                    token_quantity,
                    decimals,
                }),
            })
        })
        .collect()
}

#[async_trait]
impl TokenClassifier for SlpIndexerClient {
    async fn classify(&self, outputs: &[UnspentOutput]) -> SweepResult<Vec<ClassifiedOutput>> {
        let url = format!("{}/slp/hydrateUtxos", self.base_url);
        let body = HydrateRequest {
            utxos: outputs
                .iter()
                .map(|u| HydrateUtxo {
                    txid: u.txid.to_string(),
                    vout: u.output_index,
                    value: u.value,
                })
                .collect(),
        };
        log::debug!("UTXO {} 件の分類を要求します: {}", outputs.len(), url);

        let response = self.http.post(&url).json(&body).send().await?;
        let hydrated: HydrateResponse = check_status(response).await?.json().await?;
        let classified = pair_classification(outputs, hydrated.utxos)?;

        let tokens = classified.iter().filter(|c| c.token().is_some()).count();
        log::info!("UTXO分類完了: BCH {} 件, トークン {} 件", classified.len() - tokens, tokens);
        Ok(classified)
    }
}
