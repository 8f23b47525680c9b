use crate::fee::FeeModel;

/// ネットワークの最小出力額 (P2PKH)
pub const DUST_LIMIT_SATS: u64 = 546;

/// スイープ時の閾値と手数料の設定値
#[derive(Debug, Clone, PartialEq)]
pub struct SweepPolicy {
    /// BCHのみのスイープで必要な最低入力総額
    pub dust_limit: u64,
    /// トークンスイープで必要な最低入力総額
    pub token_min_total: u64,
    /// トークンスイープの固定手数料
    pub token_fee: u64,
    /// トークンを受け取る出力の金額
    pub token_dust_output: u64,
    pub fee_model: FeeModel,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self {
            dust_limit: DUST_LIMIT_SATS,
            token_min_total: 300,
            token_fee: 500,
            token_dust_output: DUST_LIMIT_SATS,
            fee_model: FeeModel::default(),
        }
    }
}
