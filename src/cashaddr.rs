//! CashAddr 形式のアドレスのエンコード/デコードと、送金先スクリプトの導出

use bitcoin::hashes::Hash;
use bitcoin::{Address, AddressType, Network as BitcoinNetwork, PubkeyHash, PublicKey, ScriptBuf, ScriptHash};
use std::str::FromStr;
use thiserror::Error;

use crate::error::SweepError;

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";
const CHECKSUM_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CashAddrError {
    #[error("大文字と小文字が混在しています")]
    MixedCase,
    #[error("使用できない文字が含まれています: {0:?}")]
    InvalidChar(char),
    #[error("チェックサムが一致しません")]
    BadChecksum,
    #[error("プレフィックスが一致しません (期待値 {expected}, 実際 {actual})")]
    PrefixMismatch { expected: String, actual: String },
    #[error("ペイロードが不正です")]
    InvalidPayload,
    #[error("未対応のアドレスタイプです: {0}")]
    UnsupportedType(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    P2pkh,
    P2sh,
}

impl AddressKind {
    fn type_bits(self) -> u8 {
        match self {
            AddressKind::P2pkh => 0,
            AddressKind::P2sh => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CashAddress {
    pub prefix: String,
    pub kind: AddressKind,
    pub hash: [u8; 20],
}

impl CashAddress {
    pub fn script_pubkey(&self) -> ScriptBuf {
        match self.kind {
            AddressKind::P2pkh => ScriptBuf::new_p2pkh(&PubkeyHash::from_byte_array(self.hash)),
            AddressKind::P2sh => ScriptBuf::new_p2sh(&ScriptHash::from_byte_array(self.hash)),
        }
    }
}

/// ネットワークごとのCashAddrプレフィックス
pub fn prefix_for(network: BitcoinNetwork) -> &'static str {
    match network {
        BitcoinNetwork::Bitcoin => "bitcoincash",
        BitcoinNetwork::Regtest => "bchreg",
        _ => "bchtest",
    }
}

fn polymod(values: &[u8]) -> u64 {
    let mut c: u64 = 1;
    for &d in values {
        let c0 = (c >> 35) as u8;
        c = ((c & 0x07_ffff_ffff) << 5) ^ d as u64;
        if c0 & 0x01 != 0 {
            c ^= 0x98_f2bc_8e61;
        }
        if c0 & 0x02 != 0 {
            c ^= 0x79_b76d_99e2;
        }
        if c0 & 0x04 != 0 {
            c ^= 0xf3_3e5f_b3c4;
        }
        if c0 & 0x08 != 0 {
            c ^= 0xae_2eab_e2a8;
        }
        if c0 & 0x10 != 0 {
            c ^= 0x1e_4f43_e470;
        }
    }
    c ^ 1
}

fn expand_prefix(prefix: &str) -> Vec<u8> {
    prefix.bytes().map(|b| b & 0x1f).chain(std::iter::once(0)).collect()
}

fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let maxv: u32 = (1 << to) - 1;
    let max_acc: u32 = (1 << (from + to - 1)) - 1;
    let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);

    for &value in data {
        let v = value as u32;
        if v >> from != 0 {
            return None;
        }
        acc = ((acc << from) | v) & max_acc;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & maxv) as u8);
        }
    }

    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & maxv) as u8);
        }
    } else if bits >= from || ((acc << (to - bits)) & maxv) != 0 {
        return None;
    }
    Some(out)
}

pub fn encode(prefix: &str, kind: AddressKind, hash: &[u8; 20]) -> String {
    // サイズビット 0 = 160bit ハッシュ
    let mut raw = Vec::with_capacity(21);
    raw.push(kind.type_bits() << 3);
    raw.extend_from_slice(hash);
    // 8bit -> 5bit の変換はパディングありなら失敗しない
    let payload = convert_bits(&raw, 8, 5, true).unwrap_or_default();

    let mut checksum_input = expand_prefix(prefix);
    checksum_input.extend_from_slice(&payload);
    checksum_input.extend_from_slice(&[0u8; CHECKSUM_LEN]);
    let checksum = polymod(&checksum_input);

    let mut encoded = String::with_capacity(prefix.len() + 1 + payload.len() + CHECKSUM_LEN);
    encoded.push_str(prefix);
    encoded.push(':');
    for &v in &payload {
        encoded.push(CHARSET[v as usize] as char);
    }
    for i in 0..CHECKSUM_LEN {
        let v = (checksum >> (5 * (CHECKSUM_LEN - 1 - i))) & 0x1f;
        encoded.push(CHARSET[v as usize] as char);
    }
    encoded
}

/// プレフィックス省略時は `expected_prefix` を補って検証する
pub fn decode(address: &str, expected_prefix: &str) -> Result<CashAddress, CashAddrError> {
    let has_lower = address.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = address.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(CashAddrError::MixedCase);
    }
    let address = address.to_ascii_lowercase();

    let (prefix, payload_str) = match address.split_once(':') {
        Some((prefix, payload)) => (prefix.to_string(), payload),
        None => (expected_prefix.to_string(), address.as_str()),
    };
    if prefix != expected_prefix {
        return Err(CashAddrError::PrefixMismatch {
            expected: expected_prefix.to_string(),
            actual: prefix,
        });
    }

    let mut values = Vec::with_capacity(payload_str.len());
    for c in payload_str.chars() {
        let pos = CHARSET
            .iter()
            .position(|&x| x as char == c)
            .ok_or(CashAddrError::InvalidChar(c))?;
        values.push(pos as u8);
    }
    if values.len() <= CHECKSUM_LEN {
        return Err(CashAddrError::InvalidPayload);
    }

    let mut checksum_input = expand_prefix(&prefix);
    checksum_input.extend_from_slice(&values);
    if polymod(&checksum_input) != 0 {
        return Err(CashAddrError::BadChecksum);
    }

    let data = &values[..values.len() - CHECKSUM_LEN];
    let raw = convert_bits(data, 5, 8, false).ok_or(CashAddrError::InvalidPayload)?;
    let (&version, hash_bytes) = raw.split_first().ok_or(CashAddrError::InvalidPayload)?;
    if version & 0x07 != 0 || hash_bytes.len() != 20 {
        return Err(CashAddrError::InvalidPayload);
    }
    let kind = match version >> 3 {
        0 => AddressKind::P2pkh,
        1 => AddressKind::P2sh,
        other => return Err(CashAddrError::UnsupportedType(other)),
    };
    let mut hash = [0u8; 20];
    hash.copy_from_slice(hash_bytes);

    Ok(CashAddress { prefix, kind, hash })
}

/// 公開鍵から外部サービス照会用のCashAddrを導出する
pub fn source_address(public_key: &PublicKey, network: BitcoinNetwork) -> String {
    encode(
        prefix_for(network),
        AddressKind::P2pkh,
        &public_key.pubkey_hash().to_byte_array(),
    )
}

/// CashAddr またはレガシー形式の送金先アドレスから scriptPubKey を得る
pub fn destination_script(address: &str, network: BitcoinNetwork) -> Result<ScriptBuf, SweepError> {
    let invalid = |reason: String| SweepError::InvalidDestination {
        address: address.to_string(),
        reason,
    };
    let trimmed = address.trim();

    let cash_err = match decode(trimmed, prefix_for(network)) {
        Ok(cash) => return Ok(cash.script_pubkey()),
        Err(e) => e,
    };

    // プレフィックス付きならレガシー形式ではない
    if trimmed.contains(':') {
        return Err(invalid(cash_err.to_string()));
    }

    let legacy = Address::from_str(trimmed)
        .map_err(|_| invalid(cash_err.to_string()))?
        .require_network(network)
        .map_err(|e| invalid(e.to_string()))?;
    match legacy.address_type() {
        Some(AddressType::P2pkh) | Some(AddressType::P2sh) => Ok(legacy.script_pubkey()),
        other => Err(invalid(format!("未対応のアドレスタイプです: {:?}", other))),
    }
}
