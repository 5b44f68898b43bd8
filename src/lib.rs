// perps-clearing: clearing core for a perpetual futures exchange.
// matching happens elsewhere. this crate settles what the dispatcher submits:
// signed orders, liquidations, deposits, withdrawals and exits, all in pips.
// all computation is deterministic with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: Pip, Wallet, Nonce, BlockNumber, Timestamp
//   2.x  units.rs: asset units <-> pips
//   3.x  nonce.rs: per-wallet nonce invalidation
//   4.x  ledger.rs: balances, positions, pending deposits, staged overlay
//   5.x  funding.rs: funding multipliers and settlement
//   6.x  market.rs: market registry, lifecycle, risk overrides
//   6.1x margin.rs: account value and tiered margin requirements
//   7.x  liquidation.rs: bankruptcy, exit and fund closure valuations
//   8.x  engine/: operations: markets, prices, funding, transfers, trades,
//        liquidations, exits, nonces
//   9.x  signature.rs: keccak payloads, secp256k1 signatures, delegated keys
//   9.1  order.rs: signed orders, trades, fill tracking
//   9.2  custody.rs: signed withdrawals and transfers
//   9.3  price_feed.rs: signed index prices and freshness
//   10.x exit.rs: wallet exit state
//   11.x events.rs: state transition events for audit
//   12.x config.rs: exchange settings and privileged wallets

// core clearing modules
pub mod engine;
pub mod events;
pub mod funding;
pub mod ledger;
pub mod liquidation;
pub mod margin;
pub mod market;
pub mod nonce;
pub mod types;
pub mod units;

// request and wallet state modules
pub mod exit;
pub mod order;
pub mod signature;

// integration modules
pub mod config;
pub mod custody;
pub mod price_feed;

// re exports for convenience
pub use engine::*;
pub use events::*;
pub use funding::*;
pub use ledger::*;
pub use liquidation::*;
pub use margin::*;
pub use market::*;
pub use nonce::*;
pub use types::*;
pub use units::*;
pub use config::{ConfigError, ExchangeConfig, PrivilegedWallets, Role};
pub use custody::{ProcessedRequests, SignedTransfer, SignedWithdrawal, Transfer, Withdrawal};
pub use exit::{ExitError, WalletExit, WalletExits};
pub use order::{Order, OrderError, OrderFillTracker, OrderType, SignedOrder, Trade};
pub use price_feed::{validate_index_price, FreshnessWindow, IndexPrice, PriceFeedError};
pub use signature::{
    keccak256, verify_authorization, verify_signature, Authorization, DelegatedKeyAuthorization,
    SignatureError, WalletKey, WalletSignature,
};
