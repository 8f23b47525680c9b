//! SLP (Simple Ledger Protocol) トークン送付用メタデータ出力の生成

use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::ScriptBuf;
use std::collections::BTreeSet;

use crate::error::SweepError;
use crate::types::ClassifiedOutput;

const LOKAD_ID: &[u8; 4] = b"SLP\0";
const TOKEN_TYPE_FUNGIBLE: u8 = 0x01;
const SEND: &[u8; 4] = b"SEND";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferScript {
    pub metadata_script: ScriptBuf,
    /// このメタデータで送付するのに必要な出力数。トークンクラスが複数あると 1 を超える
    pub output_count: usize,
}

/// トークンUTXOに含まれる異なるトークンIDの一覧
pub fn token_classes(token_outputs: &[ClassifiedOutput]) -> BTreeSet<&str> {
    token_outputs
        .iter()
        .filter_map(|o| o.token())
        .map(|t| t.token_id.as_str())
        .collect()
}

fn push(bytes: &[u8]) -> Result<PushBytesBuf, SweepError> {
    PushBytesBuf::try_from(bytes.to_vec())
        .map_err(|_| SweepError::Internal("OP_RETURN のプッシュデータが大きすぎます".into()))
}

/// 表示単位の数量 ("1.5" など) を小数桁数に従って最小単位へ換算する。
/// 桁数を超える端数や数字以外を含む場合、オーバーフローする場合は None
pub fn to_base_units(display_qty: &str, decimals: u8) -> Option<u64> {
    let qty = display_qty.trim();
    let (whole, fraction) = qty.split_once('.').unwrap_or((qty, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let fraction = fraction.trim_end_matches('0');
    let width = usize::from(decimals);
    if fraction.len() > width {
        return None;
    }

    let scale = 10u64.checked_pow(u32::from(decimals))?;
    let whole: u64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let fraction: u64 = if fraction.is_empty() {
        0
    } else {
        format!("{:0<width$}", fraction, width = width).parse().ok()?
    };
    whole.checked_mul(scale)?.checked_add(fraction)
}

/// 全数量を1つの出力へ送る SEND メッセージを組み立てる
pub fn encode_transfer_all(
    token_outputs: &[ClassifiedOutput],
    quantity: u64,
) -> Result<TransferScript, SweepError> {
    let classes = token_classes(token_outputs);
    let token_id = classes
        .iter()
        .next()
        .ok_or_else(|| SweepError::Internal("トークンUTXOが空です".into()))?;

    let token_id_bytes = hex::decode(token_id)
        .ok()
        .filter(|b| b.len() == 32)
        .ok_or_else(|| SweepError::Internal(format!("トークンIDが不正です: {}", token_id)))?;

    let decimals = token_outputs
        .iter()
        .filter_map(|o| o.token())
        .map(|t| t.decimals)
        .next()
        .unwrap_or_default();

    // SLP はすべて直接プッシュで表現する (OP_1 などは使わない)
    let metadata_script = Builder::new()
        .push_opcode(OP_RETURN)
        .push_slice(push(LOKAD_ID)?)
        .push_slice(push(&[TOKEN_TYPE_FUNGIBLE])?)
        .push_slice(push(SEND)?)
        .push_slice(push(&token_id_bytes)?)
        .push_slice(push(&quantity.to_be_bytes())?)
        .into_script();

    log::debug!(
        "SLP SEND メタデータ生成: token_id={}, quantity={} (decimals {}), classes={}",
        token_id,
        quantity,
        decimals,
        classes.len()
    );

    Ok(TransferScript {
        metadata_script,
        output_count: classes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OutputClass, TokenInfo, UnspentOutput};
    use bitcoin::Txid;
    use bitcoin::hashes::Hash;

    fn token_output(token_id: &str, qty: u64) -> ClassifiedOutput {
        ClassifiedOutput {
            output: UnspentOutput {
                txid: Txid::all_zeros(),
                output_index: 1,
                value: 546,
                confirmations: 1,
            },
            class: OutputClass::TokenCarrying(TokenInfo {
                token_id: token_id.to_string(),
                token_quantity: qty,
                decimals: 2,
            }),
        }
    }

    const TOKEN_A: &str = "4de69e374a8ed21cbddd47f2338cc0f479dc58daa2bbe11cd604ca488eca0ddf";
    const TOKEN_B: &str = "c4b0d62156b3fa5c8f3436079b5394f7edc1bef5dc1cd2f9d0c4d46f82cca479";

    #[test]
    fn send_script_layout() {
        let script = encode_transfer_all(&[token_output(TOKEN_A, 1_000)], 1_000).unwrap();
        assert_eq!(script.output_count, 1);

        let bytes = script.metadata_script.as_bytes();
        let mut expected = vec![0x6a, 0x04];
        expected.extend_from_slice(b"SLP\0");
        expected.extend_from_slice(&[0x01, 0x01, 0x04]);
        expected.extend_from_slice(b"SEND");
        expected.push(0x20);
        expected.extend_from_slice(&hex::decode(TOKEN_A).unwrap());
        expected.push(0x08);
        expected.extend_from_slice(&1_000u64.to_be_bytes());
        assert_eq!(bytes, expected.as_slice());
    }

    #[test]
    fn two_token_classes_need_two_outputs() {
        let outputs = [token_output(TOKEN_A, 1), token_output(TOKEN_B, 2)];
        let script = encode_transfer_all(&outputs, 3).unwrap();
        assert_eq!(script.output_count, 2);
    }

    #[test]
    fn same_class_across_outputs_needs_one_output() {
        let outputs = [token_output(TOKEN_A, 1), token_output(TOKEN_A, 2)];
        assert_eq!(encode_transfer_all(&outputs, 3).unwrap().output_count, 1);
    }

    #[test]
    fn display_quantity_scales_by_decimals() {
        assert_eq!(to_base_units("15", 2), Some(1_500));
        assert_eq!(to_base_units("1.5", 2), Some(150));
        assert_eq!(to_base_units("0.01", 2), Some(1));
        assert_eq!(to_base_units("2.500", 2), Some(250));
        assert_eq!(to_base_units("42", 0), Some(42));
        assert_eq!(to_base_units(".5", 1), Some(5));
    }

    #[test]
    fn unrepresentable_display_quantity_is_rejected() {
        assert_eq!(to_base_units("1.234", 2), None);
        assert_eq!(to_base_units("1.5", 0), None);
        assert_eq!(to_base_units("-1", 0), None);
        assert_eq!(to_base_units("1e3", 0), None);
        assert_eq!(to_base_units("", 2), None);
        assert_eq!(to_base_units(".", 2), None);
        assert_eq!(to_base_units("18446744073709551615", 1), None);
    }

    #[test]
    fn malformed_token_id_is_rejected() {
        let err = encode_transfer_all(&[token_output("abcd", 1)], 1).unwrap_err();
        assert!(matches!(err, SweepError::Internal(_)));
    }
}
