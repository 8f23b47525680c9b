use bitcoin::{
    absolute::LockTime,
    hashes::{Hash, sha256d},
    script::{Builder, PushBytesBuf},
    secp256k1::{All, Message, Secp256k1},
    sighash::{EcdsaSighashType, SighashCache},
    Amount, Script, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Witness,
};

use crate::{
    config::SweepPolicy,
    error::{SweepError, SweepResult},
    slp,
    types::{AssembledTransaction, ClassifiedOutput, OutputTarget, PlannedOutput, SigningKey, UnspentOutput},
};

/// SIGHASH_ALL | SIGHASH_FORKID (フォークID 0)
pub const SIGHASH_ALL_FORKID: u32 = 0x41;

/// 入力額の合計。インデクサー由来の値なのでオーバーフローは応答不正として扱う
fn total_value<'a>(outputs: impl IntoIterator<Item = &'a UnspentOutput>) -> SweepResult<u64> {
    outputs
        .into_iter()
        .try_fold(0u64, |acc, u| acc.checked_add(u.value))
        .ok_or_else(|| SweepError::downstream(502, "入力総額がオーバーフローしました"))
}

/// BCHのみのUTXOをすべて1つの送金先へ送る
pub fn build_plain(
    outputs: &[UnspentOutput],
    destination: &ScriptBuf,
    policy: &SweepPolicy,
) -> SweepResult<AssembledTransaction> {
    let total = total_value(outputs)?;
    if total < policy.dust_limit {
        return Err(SweepError::BelowDustLimit {
            total,
            dust_limit: policy.dust_limit,
        });
    }

    let fee = policy.fee_model.fee(outputs.len(), 1);
    let send_value = total
        .checked_sub(fee)
        .filter(|v| *v > 0)
        .ok_or(SweepError::InsufficientFunds { available: total, fee })?;

    log::debug!(
        "BCHスイープ: 入力 {} 件, 総額 {} sats, 手数料 {} sats, 送金額 {} sats",
        outputs.len(),
        total,
        fee,
        send_value
    );

    Ok(AssembledTransaction {
        inputs: outputs.to_vec(),
        outputs: vec![PlannedOutput {
            value: send_value,
            target: OutputTarget::Destination(destination.clone()),
        }],
    })
}

/// BCHとトークンのUTXOをまとめて送金先へ送る。トークンは1クラスのみ
pub fn build_token(
    plain_outputs: &[UnspentOutput],
    token_outputs: &[ClassifiedOutput],
    destination: &ScriptBuf,
    policy: &SweepPolicy,
) -> SweepResult<AssembledTransaction> {
    if token_outputs.is_empty() {
        return Err(SweepError::NoTokenInputs);
    }
    if plain_outputs.is_empty() {
        return Err(SweepError::NoPlainInputs);
    }
    if slp::token_classes(token_outputs).len() > 1 {
        return Err(SweepError::MultipleTokenClasses);
    }

    let total = total_value(plain_outputs.iter().chain(token_outputs.iter().map(|t| &t.output)))?;
    let fee = policy.token_fee;
    if total < policy.token_min_total {
        return Err(SweepError::InsufficientFunds { available: total, fee });
    }

    let remainder = total
        .checked_sub(fee)
        .and_then(|v| v.checked_sub(policy.token_dust_output))
        .filter(|v| *v >= 1)
        .ok_or(SweepError::InsufficientFunds { available: total, fee })?;

    let token_quantity = token_outputs
        .iter()
        .filter_map(|t| t.token())
        .try_fold(0u64, |acc, t| acc.checked_add(t.token_quantity))
        .ok_or_else(|| SweepError::Internal("トークン数量がオーバーフローしました".into()))?;

    let transfer = slp::encode_transfer_all(token_outputs, token_quantity)?;
    if transfer.output_count > 1 {
        return Err(SweepError::MultipleTokenClasses);
    }

    log::debug!(
        "トークンスイープ: BCH入力 {} 件, トークン入力 {} 件, 総額 {} sats, トークン数量 {}, 残額 {} sats",
        plain_outputs.len(),
        token_outputs.len(),
        total,
        token_quantity,
        remainder
    );

    let inputs = plain_outputs
        .iter()
        .cloned()
        .chain(token_outputs.iter().map(|t| t.output.clone()))
        .collect();

    Ok(AssembledTransaction {
        inputs,
        outputs: vec![
            PlannedOutput {
                value: 0,
                target: OutputTarget::Metadata(transfer.metadata_script),
            },
            PlannedOutput {
                value: policy.token_dust_output,
                target: OutputTarget::Destination(destination.clone()),
            },
            PlannedOutput {
                value: remainder,
                target: OutputTarget::Destination(destination.clone()),
            },
        ],
    })
}

fn unsigned_transaction(assembled: &AssembledTransaction) -> Transaction {
    Transaction {
        version: bitcoin::transaction::Version(2),
        lock_time: LockTime::ZERO,
        input: assembled
            .inputs
            .iter()
            .map(|u| TxIn {
                previous_output: u.out_point(),
                script_sig: ScriptBuf::new(), // 署名前は空
                sequence: Sequence::MAX,
                witness: Witness::new(),
            })
            .collect(),
        output: assembled
            .outputs
            .iter()
            .map(|o| TxOut {
                value: Amount::from_sat(o.value),
                script_pubkey: o.script_pubkey().clone(),
            })
            .collect(),
    }
}

/// BIP143 形式 + フォークIDの署名ハッシュ。scriptSig に依存しないので署名前に計算できる
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    value: u64,
) -> SweepResult<[u8; 32]> {
    let mut sighash_cache = SighashCache::new(tx);
    forkid_digest(&mut sighash_cache, input_index, script_code, value)
}

fn forkid_digest(
    sighash_cache: &mut SighashCache<&Transaction>,
    input_index: usize,
    script_code: &Script,
    value: u64,
) -> SweepResult<[u8; 32]> {
    let mut preimage = Vec::with_capacity(256);
    sighash_cache
        .segwit_v0_encode_signing_data_to(
            &mut preimage,
            input_index,
            script_code,
            Amount::from_sat(value),
            EcdsaSighashType::All,
        )
        .map_err(|e| SweepError::Signing {
            input_index,
            reason: format!("署名対象データの生成に失敗しました: {}", e),
        })?;

    // 末尾4バイトの sighash 型を ALL|FORKID に差し替える
    preimage.truncate(preimage.len().saturating_sub(4));
    preimage.extend(SIGHASH_ALL_FORKID.to_le_bytes());

    Ok(sha256d::Hash::hash(&preimage).to_byte_array())
}

/// すべての入力を入力順に同じ鍵で署名する
pub fn sign_transaction(
    assembled: &AssembledTransaction,
    key: &SigningKey,
    secp: &Secp256k1<All>,
) -> SweepResult<Transaction> {
    let mut transaction = unsigned_transaction(assembled);
    log::info!("トランザクション署名処理を開始します。入力数: {}", transaction.input.len());

    // 1. 署名生成フェーズ (トランザクションは変更しない)
    let mut sighash_cache = SighashCache::new(&transaction);
    let mut script_sigs = Vec::with_capacity(assembled.inputs.len());
    for (input_index, utxo) in assembled.inputs.iter().enumerate() {
        let digest = forkid_digest(&mut sighash_cache, input_index, &key.script_pubkey, utxo.value)?;
        let message = Message::from_digest(digest);
        let signature = secp.sign_ecdsa(&message, &key.private_key.inner);

        let mut sig_bytes = signature.serialize_der().to_vec();
        sig_bytes.push(SIGHASH_ALL_FORKID as u8);
        let sig_push = PushBytesBuf::try_from(sig_bytes).map_err(|_| SweepError::Signing {
            input_index,
            reason: "署名のPushBytes変換に失敗しました".into(),
        })?;

        script_sigs.push(
            Builder::new()
                .push_slice(sig_push)
                .push_key(&key.public_key)
                .into_script(),
        );
        log::debug!("入力 {} (txid={}, vout={}) の署名完了。", input_index, utxo.txid, utxo.output_index);
    }

    // 2. 署名適用フェーズ
    for (txin, script_sig) in transaction.input.iter_mut().zip(script_sigs) {
        txin.script_sig = script_sig;
    }
    log::info!("全ての入力の署名が完了しました。");

    Ok(transaction)
}
