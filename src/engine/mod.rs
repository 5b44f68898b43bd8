// 8.0: clearing engine. coordinates deposits, trades, funding, liquidations and
// exits over one staged ledger. deterministic, no external I/O: time and block
// height are set by the caller.

mod config;
mod core;
mod exits;
mod funding;
mod liquidations;
mod markets;
mod nonces;
mod pricing;
mod results;
mod trades;
mod transfers;

pub use config::EngineConfig;
pub use core::Engine;
pub use liquidations::DeleverageRequest;
pub use results::{
    EngineError, ErrorKind, ExitWithdrawalResult, LiquidationResult, TradeResult, WithdrawalResult,
};
