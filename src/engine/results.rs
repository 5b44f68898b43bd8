// 8.0.2: result types and errors for engine operations.
// every error maps to one stable ErrorKind. callers match on the kind, the
// display string is only for humans.

use crate::config::{ConfigError, Role};
use crate::events::LiquidationKind;
use crate::exit::ExitError;
use crate::funding::FundingError;
use crate::ledger::LedgerError;
use crate::liquidation::{LiquidationError, ValuationBasis};
use crate::margin::MarginError;
use crate::market::MarketError;
use crate::nonce::NonceError;
use crate::order::OrderError;
use crate::price_feed::PriceFeedError;
use crate::signature::SignatureError;
use crate::types::{ArithmeticError, BlockNumber, Pip, Timestamp, Wallet};
use crate::units::ConversionError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeResult {
    pub buy_wallet: Wallet,
    pub sell_wallet: Wallet,
    pub base_quantity: Pip,
    pub quote_quantity: Pip,
    pub fee_income: Pip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationResult {
    pub kind: LiquidationKind,
    pub basis: ValuationBasis,
    pub liquidating_wallet: Wallet,
    pub counterparty: Option<Wallet>,
    pub base_symbol: String,
    pub base_quantity: Pip,
    pub quote_quantity: Pip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WithdrawalResult {
    pub wallet: Wallet,
    pub quantity: Pip,
    pub gas_fee: Pip,
    pub asset_units: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitWithdrawalResult {
    pub wallet: Wallet,
    pub quantity: Pip,
    pub asset_units: u128,
    pub basis: Option<ValuationBasis>,
    pub positions_closed: usize,
    // Negative quote absorbed by the exit fund
    pub residue: Pip,
}

/// Stable machine-checkable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Authorization,
    StateConflict,
    Arithmetic,
    Margin,
    Timing,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Caller {caller} is not the {required:?}")]
    Unauthorized { caller: Wallet, required: Role },

    #[error("{role:?} already set to {wallet}")]
    RoleUnchanged { role: Role, wallet: Wallet },

    #[error("Wallet {wallet} already holds {held_by:?}")]
    RoleConflict { wallet: Wallet, held_by: Role },

    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(Pip),

    #[error("Gas fee {fee} outside [0, {maximum}]")]
    InvalidGasFee { fee: Pip, maximum: Pip },

    #[error("Request already processed")]
    DuplicateRequest,

    #[error("Wallet {0} has exited")]
    WalletExited(Wallet),

    #[error("Wallet {0} has not exited")]
    WalletNotExited(Wallet),

    #[error("Exit fund cannot exit")]
    ExitFundCannotExit,

    #[error("Insurance fund cannot exit")]
    InsuranceFundCannotExit,

    #[error("Exit fund cannot trade")]
    ExitFundCannotTrade,

    #[error("Wallet {0} cannot trade with itself")]
    SelfTrade(Wallet),

    #[error("Invalid transfer destination {0}")]
    InvalidTransferDestination(Wallet),

    #[error("Reduce-only order would increase position for {wallet}")]
    ReduceOnlyViolation { wallet: Wallet },

    #[error("Position {size} for {wallet} outside [{minimum}, {maximum}]")]
    PositionSizeOutOfRange {
        wallet: Wallet,
        size: Pip,
        minimum: Pip,
        maximum: Pip,
    },

    #[error("Initial margin not met for {wallet}: value {account_value}, requirement {requirement}")]
    InitialMarginNotMet {
        wallet: Wallet,
        account_value: Pip,
        requirement: Pip,
    },

    #[error("Maintenance margin not met for {wallet}: value {account_value}, requirement {requirement}")]
    MaintenanceMarginNotMet {
        wallet: Wallet,
        account_value: Pip,
        requirement: Pip,
    },

    #[error("Wallet {0} meets maintenance margin")]
    MaintenanceMarginMet(Wallet),

    #[error("Wallet {wallet} has no open position in {base_symbol}")]
    NoOpenPosition { wallet: Wallet, base_symbol: String },

    #[error("Expected {expected} quote quantities, got {provided}")]
    QuoteQuantityCount { expected: usize, provided: usize },

    #[error("Cannot liquidate the exit fund")]
    CannotLiquidateExitFund,

    #[error("Cannot liquidate the insurance fund")]
    CannotLiquidateInsuranceFund,

    #[error("Exit fund cannot be the counterparty")]
    ExitFundAsCounterparty,

    #[error("Insurance fund cannot be the counterparty")]
    InsuranceFundAsCounterparty,

    #[error("Wallet {0} cannot liquidate itself")]
    SelfLiquidation(Wallet),

    #[error("Insurance fund can acquire the positions of {0}")]
    InsuranceFundCanAcquire(Wallet),

    #[error("Counterparty {counterparty} cannot absorb {quantity} of {base_symbol}")]
    CounterpartyCannotAbsorb {
        counterparty: Wallet,
        base_symbol: String,
        quantity: Pip,
    },

    #[error("Exit fund has no open positions")]
    ExitFundHasNoPositions,

    #[error("Exit fund still has open positions")]
    ExitFundHasOpenPositions,

    #[error("Not in system recovery")]
    NotInSystemRecovery,

    #[error("Market {0} is still active")]
    MarketStillActive(String),

    #[error("Funding period not elapsed: next at {next:?}, now {now:?}")]
    FundingPeriodNotElapsed { next: Timestamp, now: Timestamp },

    #[error("Block {block} is before current block {current}")]
    BlockInPast { block: BlockNumber, current: BlockNumber },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("Margin error: {0}")]
    Margin(#[from] MarginError),

    #[error("Funding error: {0}")]
    Funding(#[from] FundingError),

    #[error("Liquidation error: {0}")]
    Liquidation(#[from] LiquidationError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    #[error("Price feed error: {0}")]
    PriceFeed(#[from] PriceFeedError),

    #[error("Exit error: {0}")]
    Exit(#[from] ExitError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        use EngineError::*;
        match self {
            Unauthorized { .. } => ErrorKind::Authorization,
            RoleUnchanged { .. } | RoleConflict { .. } => ErrorKind::Validation,
            InvalidQuantity(_) | InvalidGasFee { .. } | QuoteQuantityCount { .. } => ErrorKind::Validation,
            DuplicateRequest | WalletExited(_) | WalletNotExited(_) => ErrorKind::StateConflict,
            ExitFundCannotExit | InsuranceFundCannotExit | ExitFundCannotTrade => ErrorKind::Validation,
            SelfTrade(_) | InvalidTransferDestination(_) | ReduceOnlyViolation { .. } => ErrorKind::Validation,
            PositionSizeOutOfRange { .. } | NoOpenPosition { .. } => ErrorKind::Validation,
            InitialMarginNotMet { .. } | MaintenanceMarginNotMet { .. } | MaintenanceMarginMet(_) => {
                ErrorKind::Margin
            }
            CannotLiquidateExitFund
            | CannotLiquidateInsuranceFund
            | ExitFundAsCounterparty
            | InsuranceFundAsCounterparty
            | SelfLiquidation(_)
            | CounterpartyCannotAbsorb { .. } => ErrorKind::Validation,
            InsuranceFundCanAcquire(_) => ErrorKind::Margin,
            ExitFundHasNoPositions | ExitFundHasOpenPositions | NotInSystemRecovery | MarketStillActive(_) => ErrorKind::StateConflict,
            FundingPeriodNotElapsed { .. } | BlockInPast { .. } => ErrorKind::Timing,
            Config(_) => ErrorKind::Validation,
            Arithmetic(_) => ErrorKind::Arithmetic,
            Conversion(ConversionError::Overflow) => ErrorKind::Arithmetic,
            Conversion(ConversionError::DecimalsOutOfRange(_)) => ErrorKind::Validation,
            Nonce(error) => match error {
                NonceError::WrongNonceVersion(_) => ErrorKind::Validation,
                NonceError::NonceTimestampTooHigh { .. } => ErrorKind::Timing,
                NonceError::NonceTimestampInvalidated { .. } => ErrorKind::StateConflict,
                NonceError::PriorInvalidationNotFinalized { .. } => ErrorKind::Timing,
            },
            Ledger(error) => match error {
                LedgerError::ExceedsPending { .. } | LedgerError::NonPositiveQuantity(_) => {
                    ErrorKind::Validation
                }
                LedgerError::BelowFloor { .. } => ErrorKind::Margin,
                LedgerError::Arithmetic(_) => ErrorKind::Arithmetic,
            },
            Market(error) => market_kind(error),
            Margin(error) => match error {
                MarginError::OraclePriceUnavailable(_) => ErrorKind::Validation,
                MarginError::Market(error) => market_kind(error),
                MarginError::Arithmetic(_) => ErrorKind::Arithmetic,
            },
            Funding(error) => match error {
                FundingError::Arithmetic(_) => ErrorKind::Arithmetic,
                _ => ErrorKind::Validation,
            },
            Liquidation(error) => match error {
                LiquidationError::NegativeQuoteAfterExit { .. } => ErrorKind::Margin,
                LiquidationError::Arithmetic(_) => ErrorKind::Arithmetic,
                _ => ErrorKind::Validation,
            },
            Order(error) => match error {
                OrderError::OrderOverfilled { .. } => ErrorKind::StateConflict,
                OrderError::Arithmetic(_) => ErrorKind::Arithmetic,
                _ => ErrorKind::Validation,
            },
            Signature(_) => ErrorKind::Authorization,
            PriceFeed(error) => match error {
                PriceFeedError::UntrustedSigner(_) | PriceFeedError::Signature(_) => ErrorKind::Authorization,
                PriceFeedError::NonPositivePrice(_) => ErrorKind::Validation,
                PriceFeedError::OutdatedPrice { .. }
                | PriceFeedError::StalePrice { .. }
                | PriceFeedError::FuturePrice { .. } => ErrorKind::Timing,
            },
            Exit(error) => match error {
                ExitError::ExitNotFinalized { .. } => ErrorKind::Timing,
                _ => ErrorKind::StateConflict,
            },
        }
    }
}

fn market_kind(error: &MarketError) -> ErrorKind {
    match error {
        MarketError::MarketAlreadyExists(_)
        | MarketError::MarketAlreadyActive(_)
        | MarketError::MarketNotActive(_) => ErrorKind::StateConflict,
        _ => ErrorKind::Validation,
    }
}
