use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use bitcoin::Network as BitcoinNetwork;
use crate::error::SweepError;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct CliArgs {
    /// HTTPサーバーの待ち受けアドレス
    #[clap(long, env = "SWEEP_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: SocketAddr,

    /// 使用するネットワーク ("mainnet", "testnet", "regtest")
    #[clap(short, long, env = "SWEEP_NETWORK", default_value = "mainnet")]
    pub network: String,

    /// 残高・UTXO照会に使う Blockbook 互換インデクサーのURL
    #[clap(long, env = "SWEEP_INDEXER_URL")]
    pub indexer_url: String,

    /// UTXO分類に使うSLPインデクサーのURL
    #[clap(long, env = "SWEEP_SLP_URL")]
    pub slp_url: String,

    /// トランザクション送信に使うフルノードのJSON-RPC URL (1台に固定)
    #[clap(long, env = "SWEEP_NODE_URL")]
    pub node_url: String,

    #[clap(long, env = "SWEEP_NODE_USER")]
    pub node_user: Option<String>,

    #[clap(long, env = "SWEEP_NODE_PASSWORD", hide_env_values = true)]
    pub node_password: Option<String>,

    /// 外部サービス呼び出しのタイムアウト (秒)
    #[clap(long, env = "SWEEP_TIMEOUT_SECS", default_value_t = 15)]
    pub timeout_secs: u64,
}

impl CliArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn node_auth(&self) -> Option<(String, String)> {
        self.node_user
            .clone()
            .map(|user| (user, self.node_password.clone().unwrap_or_default()))
    }
}

pub fn parse_network(network_str: &str) -> Result<BitcoinNetwork, SweepError> {
    match network_str.to_lowercase().as_str() {
        "bitcoin" | "mainnet" => Ok(BitcoinNetwork::Bitcoin),
        "testnet" => Ok(BitcoinNetwork::Testnet),
        "regtest" => Ok(BitcoinNetwork::Regtest),
        s => Err(SweepError::InvalidRequest(format!("無効なネットワークが指定されました: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_names() {
        assert_eq!(parse_network("MainNet").unwrap(), BitcoinNetwork::Bitcoin);
        assert_eq!(parse_network("bitcoin").unwrap(), BitcoinNetwork::Bitcoin);
        assert_eq!(parse_network("testnet").unwrap(), BitcoinNetwork::Testnet);
        assert_eq!(parse_network("regtest").unwrap(), BitcoinNetwork::Regtest);
        assert!(parse_network("litecoin").is_err());
    }

    #[test]
    fn args_parse_with_defaults() {
        let args = CliArgs::try_parse_from([
            "bch-sweep-gateway",
            "--indexer-url",
            "http://blockbook:9130",
            "--slp-url",
            "http://slp:5000",
            "--node-url",
            "http://node:8332",
            "--node-user",
            "rpc",
        ])
        .unwrap();
        assert_eq!(args.listen.port(), 3000);
        assert_eq!(args.timeout(), Duration::from_secs(15));
        assert_eq!(args.node_auth(), Some(("rpc".to_string(), String::new())));
    }
}
