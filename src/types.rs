use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{OutPoint, PrivateKey, PublicKey, ScriptBuf, Txid};

use crate::error::SweepError;

/// 秘密鍵のアドレスに紐づく未使用出力。1回のスイープの間だけ使われる
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub txid: Txid,
    pub output_index: u32,
    pub value: u64,
    pub confirmations: u32,
}

impl UnspentOutput {
    pub fn out_point(&self) -> OutPoint {
        OutPoint::new(self.txid, self.output_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    /// 表示順(ビッグエンディアン)の16進トークンID
    pub token_id: String,
    /// 最小単位での数量
    pub token_quantity: u64,
    pub decimals: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputClass {
    Plain,
    TokenCarrying(TokenInfo),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedOutput {
    pub output: UnspentOutput,
    pub class: OutputClass,
}

impl ClassifiedOutput {
    pub fn plain(output: UnspentOutput) -> Self {
        Self { output, class: OutputClass::Plain }
    }

    pub fn token(&self) -> Option<&TokenInfo> {
        match &self.class {
            OutputClass::TokenCarrying(info) => Some(info),
            OutputClass::Plain => None,
        }
    }
}

/// 確定残高と未確定残高 (未確定側は負になり得る)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Balance {
    pub confirmed: i64,
    pub unconfirmed: i64,
}

impl Balance {
    /// 使用可能な総額。0以下またはオーバーフロー時は None
    pub fn spendable(&self) -> Option<u64> {
        self.confirmed
            .checked_add(self.unconfirmed)
            .filter(|total| *total > 0)
            .map(|total| total as u64)
    }
}

/// 境界で検証済みのスイープ要求
#[derive(Debug, Clone)]
pub struct SweepRequest {
    pub private_key: PrivateKey,
    /// 送金先アドレスから導出済みの scriptPubKey
    pub destination: Option<ScriptBuf>,
    pub balance_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    Balance(u64),
    Broadcast(Txid),
}

/// 出力の宛先。通常のスクリプトか、トークンのメタデータ(OP_RETURN)か
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Destination(ScriptBuf),
    Metadata(ScriptBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    pub value: u64,
    pub target: OutputTarget,
}

impl PlannedOutput {
    pub fn script_pubkey(&self) -> &ScriptBuf {
        match &self.target {
            OutputTarget::Destination(script) | OutputTarget::Metadata(script) => script,
        }
    }
}

/// 署名前のトランザクション。入力はすべて同じ鍵で署名される
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledTransaction {
    pub inputs: Vec<UnspentOutput>,
    pub outputs: Vec<PlannedOutput>,
}

impl AssembledTransaction {
    /// オーバーフロー時は None
    pub fn input_total(&self) -> Option<u64> {
        self.inputs.iter().try_fold(0u64, |acc, u| acc.checked_add(u.value))
    }

    pub fn output_total(&self) -> Option<u64> {
        self.outputs.iter().try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }
}

/// 署名に使う鍵とその公開鍵・P2PKHスクリプト
#[derive(Debug, Clone)]
pub struct SigningKey {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
    pub script_pubkey: ScriptBuf,
}

impl SigningKey {
    pub fn new(private_key: PrivateKey, secp: &Secp256k1<All>) -> Result<Self, SweepError> {
        if !private_key.compressed {
            return Err(SweepError::InvalidKey("圧縮形式の秘密鍵のみ対応しています".into()));
        }
        let public_key = private_key.public_key(secp);
        let script_pubkey = ScriptBuf::new_p2pkh(&public_key.pubkey_hash());
        Ok(Self { private_key, public_key, script_pubkey })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;

    fn utxo(value: u64) -> UnspentOutput {
        UnspentOutput { txid: Txid::all_zeros(), output_index: 0, value, confirmations: 1 }
    }

    #[test]
    fn totals_are_checked() {
        let assembled = AssembledTransaction {
            inputs: vec![utxo(u64::MAX), utxo(1)],
            outputs: vec![PlannedOutput { value: 7, target: OutputTarget::Destination(ScriptBuf::new()) }],
        };
        assert_eq!(assembled.input_total(), None);
        assert_eq!(assembled.output_total(), Some(7));
    }

    #[test]
    fn spendable_balance_includes_negative_unconfirmed() {
        assert_eq!(Balance { confirmed: 1_000, unconfirmed: -400 }.spendable(), Some(600));
        assert_eq!(Balance { confirmed: 400, unconfirmed: -400 }.spendable(), None);
        assert_eq!(Balance { confirmed: i64::MAX, unconfirmed: 1 }.spendable(), None);
    }
}
