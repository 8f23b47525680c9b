//! 外部サービスとの境界。スイープ処理はこれらのトレイト越しにのみ外部へアクセスする

pub mod blockbook;
pub mod node;
pub mod slp_indexer;

use async_trait::async_trait;
use bitcoin::Txid;

use crate::error::SweepResult;
use crate::types::{Balance, ClassifiedOutput, UnspentOutput};

pub use blockbook::BlockbookClient;
pub use node::NodeBroadcaster;
pub use slp_indexer::SlpIndexerClient;

#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance(&self, address: &str) -> SweepResult<Balance>;
}

#[async_trait]
pub trait UtxoSource: Send + Sync {
    async fn utxos(&self, address: &str) -> SweepResult<Vec<UnspentOutput>>;
}

/// 入力と同じ順序・同じ件数で分類結果を返すこと
#[async_trait]
pub trait TokenClassifier: Send + Sync {
    async fn classify(&self, outputs: &[UnspentOutput]) -> SweepResult<Vec<ClassifiedOutput>>;
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn submit(&self, raw_tx_hex: &str) -> SweepResult<Txid>;
}

/// 2xx 以外の応答を本文付きの Downstream エラーに変換する
pub(crate) async fn check_status(response: reqwest::Response) -> SweepResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("外部サービスがエラーを返しました: {}", status)
    } else {
        body
    };
    Err(crate::error::SweepError::downstream(status.as_u16(), message))
}
