//! 固定された1台のフルノードへの生トランザクション送信

use async_trait::async_trait;
use bitcoin::Txid;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use super::Broadcaster;
use crate::error::{SweepError, SweepResult};

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

/// ロードバランサーを経由せず、同じノードへ1件ずつ送信する
pub struct NodeBroadcaster {
    url: String,
    auth: Option<(String, String)>,
    http: reqwest::Client,
    next_id: AtomicU64,
    // 競合する送信が同じノードで同時に処理されないようにする
    submit_gate: Mutex<()>,
}

impl NodeBroadcaster {
    pub fn new(url: &str, auth: Option<(String, String)>, timeout: Duration) -> SweepResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SweepError::Internal(format!("HTTPクライアントの生成に失敗しました: {}", e)))?;
        Ok(Self {
            url: url.to_string(),
            auth,
            http,
            next_id: AtomicU64::new(1),
            submit_gate: Mutex::new(()),
        })
    }
}

/// ノードの応答を txid かエラーに変換する。RPCエラーは本文をそのまま伝える
fn interpret_response(status: u16, body: &str) -> SweepResult<Txid> {
    let parsed: Option<RpcResponse> = serde_json::from_str(body).ok();

    match parsed {
        Some(RpcResponse { error: Some(err), .. }) => Err(SweepError::downstream(
            if status >= 500 { status } else { 500 },
            format!("{} (code {})", err.message, err.code),
        )),
        Some(RpcResponse { result: Some(txid), .. }) if (200..300).contains(&status) => {
            Txid::from_str(&txid).map_err(|e| {
                SweepError::downstream(502, format!("ノードが不正なtxidを返しました ({}): {}", txid, e))
            })
        }
        _ => Err(SweepError::downstream(
            status.max(500),
            format!("ノードの応答が不正です (HTTP {}): {}", status, body),
        )),
    }
}

#[async_trait]
impl Broadcaster for NodeBroadcaster {
    async fn submit(&self, raw_tx_hex: &str) -> SweepResult<Txid> {
        let _permit = self.submit_gate.lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": "sendrawtransaction",
            "params": [raw_tx_hex],
        });

        let mut request = self.http.post(&self.url).json(&payload);
        if let Some((user, password)) = &self.auth {
            request = request.basic_auth(user, Some(password));
        }

        log::info!("トランザクションを送信します ({} bytes)", raw_tx_hex.len() / 2);
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        let txid = interpret_response(status, &body)?;
        log::info!("トランザクション送信完了: {}", txid);
        Ok(txid)
    }
}
