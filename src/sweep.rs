//! 秘密鍵の残高をすべて送金先へ移すスイープ処理

use bitcoin::consensus::encode;
use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Network as BitcoinNetwork, NetworkKind, PrivateKey};
use std::fmt;
use std::sync::Arc;

use crate::backend::{BalanceSource, Broadcaster, TokenClassifier, UtxoSource};
use crate::cashaddr;
use crate::config::SweepPolicy;
use crate::error::{SweepError, SweepResult};
use crate::transaction;
use crate::types::{ClassifiedOutput, OutputClass, SigningKey, SweepOutcome, SweepRequest, UnspentOutput};

/// 圧縮形式WIFの文字数
pub const COMPRESSED_WIF_LEN: usize = 52;

/// スイープ処理の段階。後戻りや再試行はない
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStage {
    Validating,
    DerivingKey,
    CheckingBalance,
    FetchingUtxos,
    Classifying,
    BuildingPlain,
    BuildingToken,
    Signing,
    Broadcasting,
}

impl fmt::Display for SweepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SweepStage::Validating => "入力検証",
            SweepStage::DerivingKey => "鍵導出",
            SweepStage::CheckingBalance => "残高確認",
            SweepStage::FetchingUtxos => "UTXO取得",
            SweepStage::Classifying => "UTXO分類",
            SweepStage::BuildingPlain => "BCHトランザクション構築",
            SweepStage::BuildingToken => "トークントランザクション構築",
            SweepStage::Signing => "署名",
            SweepStage::Broadcasting => "送信",
        };
        f.write_str(name)
    }
}

/// 境界での入力検証。外部サービスへの問い合わせ前に行う
pub fn validate_request(
    wif: &str,
    to_addr: Option<&str>,
    balance_only: bool,
    network: BitcoinNetwork,
) -> SweepResult<SweepRequest> {
    let wif = wif.trim();
    if wif.len() != COMPRESSED_WIF_LEN {
        return Err(SweepError::InvalidKey(format!(
            "圧縮形式のWIFは {} 文字です (入力 {} 文字)",
            COMPRESSED_WIF_LEN,
            wif.len()
        )));
    }
    let private_key = PrivateKey::from_wif(wif)?;
    if !private_key.compressed {
        return Err(SweepError::InvalidKey("圧縮形式の秘密鍵のみ対応しています".into()));
    }
    if private_key.network != NetworkKind::from(network) {
        return Err(SweepError::InvalidKey(format!(
            "ネットワーク不整合: サーバー設定 ({:?}) vs WIF ({:?})",
            network, private_key.network
        )));
    }

    let destination = match to_addr.map(str::trim).filter(|a| !a.is_empty()) {
        Some(address) => Some(cashaddr::destination_script(address, network)?),
        None if balance_only => None,
        None => return Err(SweepError::MissingDestination),
    };

    Ok(SweepRequest {
        private_key,
        destination,
        balance_only,
    })
}

/// スイープ処理本体。外部サービスはすべてコンストラクタで受け取る
pub struct SweepEngine {
    network: BitcoinNetwork,
    policy: SweepPolicy,
    balances: Arc<dyn BalanceSource>,
    utxos: Arc<dyn UtxoSource>,
    classifier: Arc<dyn TokenClassifier>,
    broadcaster: Arc<dyn Broadcaster>,
    secp: Secp256k1<All>,
}

impl SweepEngine {
    pub fn new(
        network: BitcoinNetwork,
        policy: SweepPolicy,
        balances: Arc<dyn BalanceSource>,
        utxos: Arc<dyn UtxoSource>,
        classifier: Arc<dyn TokenClassifier>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            network,
            policy,
            balances,
            utxos,
            classifier,
            broadcaster,
            secp: Secp256k1::new(),
        }
    }

    pub fn network(&self) -> BitcoinNetwork {
        self.network
    }

    pub async fn sweep(&self, request: SweepRequest) -> SweepResult<SweepOutcome> {
        log::debug!("段階: {}", SweepStage::DerivingKey);
        let key = SigningKey::new(request.private_key, &self.secp)?;
        let source = cashaddr::source_address(&key.public_key, self.network);
        log::info!("スイープ開始: source={}, balance_only={}", source, request.balance_only);

        log::debug!("段階: {}", SweepStage::CheckingBalance);
        let balance = self.balances.balance(&source).await?;
        let total = balance.spendable().ok_or(SweepError::NoFunds)?;
        log::info!(
            "残高: confirmed={} sats, unconfirmed={} sats",
            balance.confirmed,
            balance.unconfirmed
        );
        if request.balance_only {
            return Ok(SweepOutcome::Balance(total));
        }
        let destination = request.destination.ok_or(SweepError::MissingDestination)?;

        log::debug!("段階: {}", SweepStage::FetchingUtxos);
        let utxos = self.utxos.utxos(&source).await?;
        if utxos.is_empty() {
            // 残高照会とUTXO照会は別のインデックスを参照するため食い違うことがある
            log::warn!("残高 {} sats に対してUTXOが0件です: {}", total, source);
            return Err(SweepError::NoUtxos);
        }

        log::debug!("段階: {}", SweepStage::Classifying);
        let classified = self.classifier.classify(&utxos).await?;
        if classified.len() != utxos.len() {
            return Err(SweepError::downstream(
                502,
                format!("分類結果の件数が一致しません (要求 {}, 応答 {})", utxos.len(), classified.len()),
            ));
        }

        let (token_outputs, plain_outputs): (Vec<ClassifiedOutput>, Vec<ClassifiedOutput>) = classified
            .into_iter()
            .partition(|c| matches!(c.class, OutputClass::TokenCarrying(_)));
        let plain_outputs: Vec<UnspentOutput> = plain_outputs.into_iter().map(|c| c.output).collect();

        let assembled = if token_outputs.is_empty() {
            log::debug!("段階: {}", SweepStage::BuildingPlain);
            transaction::build_plain(&plain_outputs, &destination, &self.policy)?
        } else if plain_outputs.is_empty() {
            return Err(SweepError::TokensWithoutFunds);
        } else {
            if crate::slp::token_classes(&token_outputs).len() > 1 {
                return Err(SweepError::MultipleTokenClasses);
            }
            log::debug!("段階: {}", SweepStage::BuildingToken);
            transaction::build_token(&plain_outputs, &token_outputs, &destination, &self.policy)?
        };

        log::info!(
            "トランザクション構築完了: 入力 {} 件 ({} sats), 出力 {} 件 ({} sats)",
            assembled.inputs.len(),
            assembled.input_total().unwrap_or_default(),
            assembled.outputs.len(),
            assembled.output_total().unwrap_or_default()
        );

        log::debug!("段階: {}", SweepStage::Signing);
        let signed = transaction::sign_transaction(&assembled, &key, &self.secp)?;
        let raw_hex = encode::serialize_hex(&signed);
        log::debug!("Raw transaction hex: {}", raw_hex);

        log::debug!("段階: {}", SweepStage::Broadcasting);
        let txid = self.broadcaster.submit(&raw_hex).await?;
        log::info!("スイープ完了: txid={}", txid);
        Ok(SweepOutcome::Broadcast(txid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIF: &str = "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn";
    const DEST: &str = "bitcoincash:qpm2qsznhks23z7629mms6s4cwef74vcwvy22gdx6a";

    #[test]
    fn short_key_is_invalid() {
        let err = validate_request(&WIF[..51], Some(DEST), false, BitcoinNetwork::Bitcoin).unwrap_err();
        assert!(matches!(err, SweepError::InvalidKey(_)));
    }

    #[test]
    fn corrupted_key_is_invalid() {
        let mut wif = WIF.to_string();
        wif.replace_range(10..11, "z");
        let err = validate_request(&wif, Some(DEST), false, BitcoinNetwork::Bitcoin).unwrap_err();
        assert!(matches!(err, SweepError::InvalidKey(_)));
    }

    #[test]
    fn mainnet_key_is_rejected_on_testnet() {
        let err = validate_request(WIF, None, true, BitcoinNetwork::Testnet).unwrap_err();
        assert!(matches!(err, SweepError::InvalidKey(_)));
    }

    #[test]
    fn destination_required_unless_balance_only() {
        let err = validate_request(WIF, None, false, BitcoinNetwork::Bitcoin).unwrap_err();
        assert!(matches!(err, SweepError::MissingDestination));
        let err = validate_request(WIF, Some("  "), false, BitcoinNetwork::Bitcoin).unwrap_err();
        assert!(matches!(err, SweepError::MissingDestination));

        let req = validate_request(WIF, None, true, BitcoinNetwork::Bitcoin).unwrap();
        assert!(req.balance_only);
        assert!(req.destination.is_none());
    }

    #[test]
    fn valid_request_resolves_destination_script() {
        let req = validate_request(WIF, Some(DEST), false, BitcoinNetwork::Bitcoin).unwrap();
        assert!(req.destination.unwrap().is_p2pkh());
        assert!(req.private_key.compressed);
    }
}
