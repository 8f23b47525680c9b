use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bitcoin::key::FromWifError as BitcoinKeyError; // WIFデコードエラー用
use serde_json::json;
use thiserror::Error;

/// 接続失敗・タイムアウト・DNS失敗を区別せずに返すメッセージ
pub const UNREACHABLE_MESSAGE: &str = "外部サービスに接続できませんでした";

#[derive(Debug, Error)]
pub enum SweepError {
    // --- 入力エラー (400) ---
    #[error("秘密鍵(WIF)が不正です: {0}")]
    InvalidKey(String),

    #[error("送金先アドレス(toAddr)が指定されていません")]
    MissingDestination,

    #[error("送金先アドレスが不正です ({address}): {reason}")]
    InvalidDestination { address: String, reason: String },

    #[error("リクエストが不正です: {0}")]
    InvalidRequest(String),

    // --- 状態エラー (422) ---
    #[error("残高がありません")]
    NoFunds,

    #[error("UTXOが見つかりません")]
    NoUtxos,

    #[error("トークンUTXOのみで、手数料を支払うためのBCH UTXOがありません")]
    TokensWithoutFunds,

    #[error("複数のトークンクラスが検出されました。1回のスイープで扱えるトークンは1種類のみです")]
    MultipleTokenClasses,

    #[error("入力総額 {total} sats がダスト閾値 {dust_limit} sats 未満です")]
    BelowDustLimit { total: u64, dust_limit: u64 },

    #[error("資金不足: 利用可能な総額 {available} sats, 手数料 {fee} sats")]
    InsufficientFunds { available: u64, fee: u64 },

    #[error("トークンUTXOがありません")]
    NoTokenInputs,

    #[error("BCH UTXOがありません")]
    NoPlainInputs,

    // --- 外部サービスエラー (5xx) ---
    #[error("{message}")]
    Downstream { status: u16, message: String },

    #[error("{}", UNREACHABLE_MESSAGE)]
    Unreachable,

    // --- 予期しないエラー (500) ---
    #[error("署名エラー (入力インデックス {input_index}): {reason}")]
    Signing { input_index: usize, reason: String },

    #[error("内部エラー: {0}")]
    Internal(String),
}

pub type SweepResult<T> = Result<T, SweepError>;

impl SweepError {
    /// エラー種別ごとに対応するHTTPステータス
    pub fn status(&self) -> StatusCode {
        match self {
            SweepError::InvalidKey(_)
            | SweepError::MissingDestination
            | SweepError::InvalidDestination { .. }
            | SweepError::InvalidRequest(_) => StatusCode::BAD_REQUEST,

            SweepError::NoFunds
            | SweepError::NoUtxos
            | SweepError::TokensWithoutFunds
            | SweepError::MultipleTokenClasses
            | SweepError::BelowDustLimit { .. }
            | SweepError::InsufficientFunds { .. }
            | SweepError::NoTokenInputs
            | SweepError::NoPlainInputs => StatusCode::UNPROCESSABLE_ENTITY,

            SweepError::Downstream { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            SweepError::Unreachable => StatusCode::SERVICE_UNAVAILABLE,

            SweepError::Signing { .. } | SweepError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 外部サービスからの応答をそのまま伝える
    pub fn downstream(status: u16, message: impl Into<String>) -> Self {
        SweepError::Downstream {
            status,
            message: message.into(),
        }
    }
}

impl From<BitcoinKeyError> for SweepError {
    fn from(e: BitcoinKeyError) -> Self {
        SweepError::InvalidKey(e.to_string())
    }
}

impl From<reqwest::Error> for SweepError {
    fn from(e: reqwest::Error) -> Self {
        // トランスポート層の失敗は詳細を呼び出し元に見せない
        if e.is_connect() || e.is_timeout() || e.is_request() {
            log::warn!("外部サービスへの接続に失敗しました: {}", e);
            return SweepError::Unreachable;
        }
        match e.status() {
            Some(status) => SweepError::downstream(status.as_u16(), e.to_string()),
            None => SweepError::downstream(502, format!("外部サービスの応答が不正です: {}", e)),
        }
    }
}

impl IntoResponse for SweepError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("スイープ失敗 ({}): {}", status, self);
        } else {
            log::info!("スイープ拒否 ({}): {}", status, self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes_follow_taxonomy() {
        assert_eq!(SweepError::MissingDestination.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            SweepError::InvalidKey("短すぎます".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(SweepError::NoFunds.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            SweepError::MultipleTokenClasses.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            SweepError::BelowDustLimit { total: 1, dust_limit: 546 }.status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(SweepError::Unreachable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            SweepError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn downstream_status_is_passed_through_when_5xx() {
        assert_eq!(
            SweepError::downstream(503, "busy").status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(SweepError::downstream(504, "slow").status(), StatusCode::GATEWAY_TIMEOUT);
        // 4xx は呼び出し元の責任ではないので 502 に寄せる
        assert_eq!(SweepError::downstream(404, "nope").status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn downstream_message_is_not_rewritten() {
        let err = SweepError::downstream(500, "txn-mempool-conflict (code 18)");
        assert_eq!(err.to_string(), "txn-mempool-conflict (code 18)");
        assert_eq!(SweepError::Unreachable.to_string(), UNREACHABLE_MESSAGE);
    }
}
