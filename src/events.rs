// 11.0: every committed state change produces an event. the log is the observer
// interface for settlement notifications and audit. the EventPayload enum lists
// every event type.

use crate::config::Role;
use crate::liquidation::{DeleverageMode, ValuationBasis};
use crate::types::{BlockNumber, OrderSide, Pip, Timestamp, Wallet};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub block: BlockNumber,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, block: BlockNumber, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            block,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    // Market events
    MarketAdded(MarketAddedEvent),
    MarketActivated { base_symbol: String },
    MarketDeactivated { base_symbol: String, index_price: Pip },
    MarketOverridesSet { base_symbol: String, wallet: Option<Wallet> },

    // Price events
    IndexPriceUpdated(IndexPriceUpdatedEvent),
    FundingRatePublished(FundingRatePublishedEvent),

    // Balance events
    DepositRecorded(DepositRecordedEvent),
    DepositApplied(DepositAppliedEvent),
    Withdrawn(WithdrawnEvent),
    Transferred(TransferredEvent),
    FundingApplied(FundingAppliedEvent),

    // Trade events
    TradeSettled(TradeSettledEvent),
    NonceInvalidated(NonceInvalidatedEvent),

    // Risk events
    PositionLiquidated(PositionLiquidatedEvent),

    // Exit events
    WalletExited { wallet: Wallet, effective_block: BlockNumber },
    WalletExitWithdrawn { wallet: Wallet, quantity: Pip },
    WalletExitCleared { wallet: Wallet },

    // Governance events
    RoleRotated(RoleRotatedEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketAddedEvent {
    pub base_symbol: String,
    pub initial_index_price: Pip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPriceUpdatedEvent {
    pub base_symbol: String,
    pub price: Pip,
    pub timestamp: Timestamp,
    pub signer: Wallet,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingRatePublishedEvent {
    pub base_symbol: String,
    pub period: u64,
    pub rate: Pip,
    pub multiplier: Pip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRecordedEvent {
    pub wallet: Wallet,
    pub asset_units: u128,
    pub quantity: Pip,
    pub pending: Pip,
    pub migrated: Option<Pip>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAppliedEvent {
    pub wallet: Wallet,
    pub quantity: Pip,
    pub new_balance: Pip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawnEvent {
    pub wallet: Wallet,
    pub quantity: Pip,
    pub gas_fee: Pip,
    // Amount the transfer collaborator should send, in native units
    pub asset_units: u128,
    pub new_balance: Pip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferredEvent {
    pub source: Wallet,
    pub destination: Wallet,
    pub quantity: Pip,
    pub gas_fee: Pip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingAppliedEvent {
    pub wallet: Wallet,
    pub base_symbol: String,
    pub periods: u64,
    pub payment: Pip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeSettledEvent {
    pub base_symbol: String,
    pub buy_wallet: Wallet,
    pub sell_wallet: Wallet,
    pub base_quantity: Pip,
    pub quote_quantity: Pip,
    pub price: Pip,
    pub maker_side: OrderSide,
    pub maker_fee: Pip,
    pub taker_fee: Pip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceInvalidatedEvent {
    pub wallet: Wallet,
    pub timestamp_ms: u64,
    pub effective_block: BlockNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiquidationKind {
    Deleverage(DeleverageMode),
    WalletInMaintenance,
    WalletExit,
    DeactivatedMarket,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    pub kind: LiquidationKind,
    pub basis: ValuationBasis,
    pub liquidating_wallet: Wallet,
    pub counterparty: Option<Wallet>,
    pub base_symbol: String,
    // Signed change to the liquidating wallet's position
    pub base_quantity: Pip,
    // Signed quote credited to the liquidating wallet
    pub quote_quantity: Pip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRotatedEvent {
    pub role: Role,
    pub previous: Wallet,
    pub current: Wallet,
}
