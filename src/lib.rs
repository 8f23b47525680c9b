//! BCH/SLP スイープゲートウェイ
//!
//! 秘密鍵(WIF)の残高を確認し、BCHと1種類のSLPトークンをすべて送金先アドレスへ移す。

pub mod backend;
pub mod cashaddr;
pub mod cli;
pub mod config;
pub mod error;
pub mod fee;
pub mod server;
pub mod slp;
pub mod sweep;
pub mod transaction;
pub mod types;

pub use config::SweepPolicy;
pub use error::{SweepError, SweepResult};
pub use fee::FeeModel;
pub use sweep::{SweepEngine, validate_request};
pub use types::{Balance, ClassifiedOutput, SweepOutcome, SweepRequest, UnspentOutput};
