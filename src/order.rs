//! Signed orders and operator trade instructions.
//!
//! Matching happens off the ledger. The operator submits two signed orders
//! and a trade that claims to fill them; everything here checks that claim
//! against what each wallet actually signed.

use crate::signature::{Authorization, PayloadEncoder, ORDER_TAG};
use crate::types::{ArithmeticError, Nonce, OrderSide, Pip, Wallet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Executes at any price.
    Market,
    /// Never executes at a price worse than `limit_price`.
    Limit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Order quantity must be positive, got {0}")]
    InvalidQuantity(Pip),

    #[error("Limit order requires a positive limit price")]
    MissingLimitPrice,

    #[error("Market order cannot carry a limit price")]
    UnexpectedLimitPrice,

    #[error("Order is for market {order}, trade is for {trade}")]
    MarketMismatch { order: String, trade: String },

    #[error("Buy and sell orders required, got {buy:?} and {sell:?}")]
    SideMismatch { buy: OrderSide, sell: OrderSide },

    #[error("Trade price {price} worse than {side:?} limit {limit}")]
    PriceWorseThanLimit {
        side: OrderSide,
        limit: Pip,
        price: Pip,
    },

    #[error("Trade quantities must be positive")]
    InvalidTradeQuantity,

    #[error("Quote quantity {provided} does not match base * price = {expected}")]
    QuoteQuantityMismatch { expected: Pip, provided: Pip },

    #[error("Taker fee cannot be negative, got {0}")]
    NegativeTakerFee(Pip),

    #[error("Maker rebate {rebate} exceeds taker fee {taker_fee}")]
    RebateExceedsTakerFee { rebate: Pip, taker_fee: Pip },

    #[error("Fee {fee} exceeds maximum {maximum}")]
    FeeTooHigh { fee: Pip, maximum: Pip },

    #[error("Order {order} overfilled: {filled} of {quantity}")]
    OrderOverfilled {
        order: String,
        filled: Pip,
        quantity: Pip,
    },

    #[error("Arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),
}

/// Order as signed by the wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub wallet: Wallet,
    pub market: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Pip,
    pub limit_price: Option<Pip>,
    pub nonce: Nonce,
    pub reduce_only: bool,
}

impl Order {
    pub fn market(wallet: Wallet, market: &str, side: OrderSide, quantity: Pip, nonce: Nonce) -> Self {
        Self {
            wallet,
            market: market.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            limit_price: None,
            nonce,
            reduce_only: false,
        }
    }

    pub fn limit(
        wallet: Wallet,
        market: &str,
        side: OrderSide,
        quantity: Pip,
        limit_price: Pip,
        nonce: Nonce,
    ) -> Self {
        Self {
            wallet,
            market: market.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity,
            limit_price: Some(limit_price),
            nonce,
            reduce_only: false,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }

    pub fn hash(&self) -> [u8; 32] {
        PayloadEncoder::new(ORDER_TAG)
            .wallet(&self.wallet)
            .str(&self.market)
            .u8(match self.side {
                OrderSide::Buy => 0,
                OrderSide::Sell => 1,
            })
            .u8(match self.order_type {
                OrderType::Market => 0,
                OrderType::Limit => 1,
            })
            .pip(self.quantity)
            .pip(self.limit_price.unwrap_or(Pip::ZERO))
            .nonce(&self.nonce)
            .bool(self.reduce_only)
            .finish()
    }

    pub fn validate(&self) -> Result<(), OrderError> {
        if !self.quantity.is_positive() {
            return Err(OrderError::InvalidQuantity(self.quantity));
        }
        match (self.order_type, self.limit_price) {
            (OrderType::Limit, Some(price)) if price.is_positive() => Ok(()),
            (OrderType::Limit, _) => Err(OrderError::MissingLimitPrice),
            (OrderType::Market, Some(_)) => Err(OrderError::UnexpectedLimitPrice),
            (OrderType::Market, None) => Ok(()),
        }
    }

    // buyers accept up to their limit, sellers down to it
    pub fn accepts_price(&self, price: Pip) -> Result<(), OrderError> {
        let Some(limit) = self.limit_price else {
            return Ok(());
        };
        let acceptable = match self.side {
            OrderSide::Buy => price <= limit,
            OrderSide::Sell => price >= limit,
        };
        if !acceptable {
            return Err(OrderError::PriceWorseThanLimit {
                side: self.side,
                limit,
                price,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedOrder {
    pub order: Order,
    pub authorization: Authorization,
}

/// Operator-attested fill of one buy and one sell order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub base_symbol: String,
    pub base_quantity: Pip,
    pub quote_quantity: Pip,
    pub price: Pip,
    /// Negative values are rebates.
    pub maker_fee: Pip,
    pub taker_fee: Pip,
    pub maker_side: OrderSide,
}

impl Trade {
    pub fn validate(&self, max_fee_rate: Pip) -> Result<(), OrderError> {
        if !self.base_quantity.is_positive()
            || !self.quote_quantity.is_positive()
            || !self.price.is_positive()
        {
            return Err(OrderError::InvalidTradeQuantity);
        }
        let expected = self.base_quantity.multiply(self.price)?;
        if expected != self.quote_quantity {
            return Err(OrderError::QuoteQuantityMismatch {
                expected,
                provided: self.quote_quantity,
            });
        }

        if self.taker_fee.is_negative() {
            return Err(OrderError::NegativeTakerFee(self.taker_fee));
        }
        if self.maker_fee.is_negative() {
            let rebate = self.maker_fee.abs()?;
            if rebate > self.taker_fee {
                return Err(OrderError::RebateExceedsTakerFee {
                    rebate,
                    taker_fee: self.taker_fee,
                });
            }
        }

        let maximum = self.quote_quantity.multiply(max_fee_rate)?;
        for fee in [self.maker_fee, self.taker_fee] {
            if fee > maximum {
                return Err(OrderError::FeeTooHigh { fee, maximum });
            }
        }
        Ok(())
    }

    /// Net fee income for the fee wallet.
    pub fn fee_wallet_income(&self) -> Result<Pip, ArithmeticError> {
        self.maker_fee.checked_add(self.taker_fee)
    }

    pub fn fee_for(&self, side: OrderSide) -> Pip {
        if side == self.maker_side {
            self.maker_fee
        } else {
            self.taker_fee
        }
    }

    /// Signed (base, quote) change for the wallet on `side`, fees included.
    pub fn deltas_for(&self, side: OrderSide) -> Result<(Pip, Pip), ArithmeticError> {
        let fee = self.fee_for(side);
        match side {
            OrderSide::Buy => Ok((
                self.base_quantity,
                self.quote_quantity.checked_add(fee)?.checked_neg()?,
            )),
            OrderSide::Sell => Ok((
                self.base_quantity.checked_neg()?,
                self.quote_quantity.checked_sub(fee)?,
            )),
        }
    }
}

/// Cumulative fills per order hash.
#[derive(Debug, Clone, Default)]
pub struct OrderFillTracker {
    filled: HashMap<[u8; 32], Pip>,
}

impl OrderFillTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filled(&self, order_hash: &[u8; 32]) -> Pip {
        self.filled.get(order_hash).copied().unwrap_or(Pip::ZERO)
    }

    /// Quantity filled after adding `fill`, without recording it.
    pub fn check_fill(&self, order_hash: &[u8; 32], order_quantity: Pip, fill: Pip) -> Result<Pip, OrderError> {
        let filled = self.filled(order_hash).checked_add(fill)?;
        if filled > order_quantity {
            return Err(OrderError::OrderOverfilled {
                order: hex::encode(order_hash),
                filled,
                quantity: order_quantity,
            });
        }
        Ok(filled)
    }

    pub fn record_fill(&mut self, order_hash: [u8; 32], filled: Pip) {
        self.filled.insert(order_hash, filled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pips(whole: i64) -> Pip {
        Pip::from_whole(whole).unwrap()
    }

    fn nonce() -> Nonce {
        Nonce::from_timestamp_ms(1_700_000_000_000, &[1; 6])
    }

    fn trade() -> Trade {
        Trade {
            base_symbol: "ETH".to_string(),
            base_quantity: pips(10),
            quote_quantity: pips(20_000),
            price: pips(2000),
            maker_fee: pips(-2),
            taker_fee: pips(10),
            maker_side: OrderSide::Sell,
        }
    }

    #[test]
    fn order_validation() {
        let wallet = Wallet([1; 20]);
        assert!(Order::market(wallet, "ETH", OrderSide::Buy, pips(1), nonce()).validate().is_ok());
        assert_eq!(
            Order::market(wallet, "ETH", OrderSide::Buy, Pip::ZERO, nonce()).validate(),
            Err(OrderError::InvalidQuantity(Pip::ZERO))
        );
        assert_eq!(
            Order::limit(wallet, "ETH", OrderSide::Buy, pips(1), Pip::ZERO, nonce()).validate(),
            Err(OrderError::MissingLimitPrice)
        );
    }

    #[test]
    fn limit_prices() {
        let wallet = Wallet([1; 20]);
        let buy = Order::limit(wallet, "ETH", OrderSide::Buy, pips(1), pips(2000), nonce());
        assert!(buy.accepts_price(pips(1999)).is_ok());
        assert!(buy.accepts_price(pips(2001)).is_err());

        let sell = Order::limit(wallet, "ETH", OrderSide::Sell, pips(1), pips(2000), nonce());
        assert!(sell.accepts_price(pips(2001)).is_ok());
        assert!(sell.accepts_price(pips(1999)).is_err());
    }

    #[test]
    fn hash_covers_every_field() {
        let wallet = Wallet([1; 20]);
        let order = Order::market(wallet, "ETH", OrderSide::Buy, pips(1), nonce());
        assert_ne!(order.hash(), order.clone().reduce_only().hash());
        let mut other = order.clone();
        other.side = OrderSide::Sell;
        assert_ne!(order.hash(), other.hash());
    }

    #[test]
    fn trade_checks() {
        let max_fee = Pip::from_raw(2_000_000); // 2%
        assert!(trade().validate(max_fee).is_ok());

        let mut bad = trade();
        bad.quote_quantity = pips(19_999);
        assert!(matches!(bad.validate(max_fee), Err(OrderError::QuoteQuantityMismatch { .. })));

        let mut bad = trade();
        bad.maker_fee = pips(-11);
        assert!(matches!(bad.validate(max_fee), Err(OrderError::RebateExceedsTakerFee { .. })));

        let mut bad = trade();
        bad.taker_fee = pips(401);
        assert!(matches!(bad.validate(max_fee), Err(OrderError::FeeTooHigh { .. })));
    }

    #[test]
    fn deltas_include_fees() {
        let trade = trade();
        // buyer is taker
        assert_eq!(trade.deltas_for(OrderSide::Buy).unwrap(), (pips(10), pips(-20_010)));
        // seller is maker and earns the rebate
        assert_eq!(trade.deltas_for(OrderSide::Sell).unwrap(), (pips(-10), pips(20_002)));
        assert_eq!(trade.fee_wallet_income().unwrap(), pips(8));
    }

    #[test]
    fn overfill_rejected() {
        let mut tracker = OrderFillTracker::new();
        let hash = [7u8; 32];
        let filled = tracker.check_fill(&hash, pips(10), pips(6)).unwrap();
        tracker.record_fill(hash, filled);
        assert!(matches!(
            tracker.check_fill(&hash, pips(10), pips(5)),
            Err(OrderError::OrderOverfilled { .. })
        ));
        assert_eq!(tracker.check_fill(&hash, pips(10), pips(4)).unwrap(), pips(10));
    }
}
