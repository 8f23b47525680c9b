//! P2PKH入出力の数からトランザクションサイズを見積もり、手数料を求める

/// 入出力数から必要な手数料を返す純粋関数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeModel {
    /// version + locktime + 入出力数の可変長整数
    pub base_bytes: u64,
    /// 署名済みP2PKH入力1つ分
    pub input_bytes: u64,
    /// P2PKH出力1つ分
    pub output_bytes: u64,
    pub sats_per_byte: u64,
    /// 1.0 未満は 1.0 として扱う
    pub safety_factor: f64,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self {
            base_bytes: 10,
            input_bytes: 148,
            output_bytes: 34,
            sats_per_byte: 1,
            safety_factor: 1.1,
        }
    }
}

impl FeeModel {
    pub fn estimated_size(&self, n_inputs: usize, n_outputs: usize) -> u64 {
        self.base_bytes
            .saturating_add(self.input_bytes.saturating_mul(n_inputs as u64))
            .saturating_add(self.output_bytes.saturating_mul(n_outputs as u64))
    }

    pub fn fee(&self, n_inputs: usize, n_outputs: usize) -> u64 {
        let raw = self
            .estimated_size(n_inputs, n_outputs)
            .saturating_mul(self.sats_per_byte);
        let factor = self.safety_factor.max(1.0);
        (raw as f64 * factor).floor() as u64
    }
}
