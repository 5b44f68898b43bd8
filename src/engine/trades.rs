//! Trade settlement.
//!
//! The dispatcher submits a matched buy and sell order with the trade it
//! attests to. Everything is checked before the ledger moves: order shape,
//! nonces, signatures, limits and fills first, then the staged balances for
//! position size and margin.

use super::core::Engine;
use super::results::{EngineError, TradeResult};
use crate::config::Role;
use crate::events::{EventPayload, TradeSettledEvent};
use crate::ledger::StagedLedger;
use crate::order::{Order, OrderError, SignedOrder, Trade};
use crate::signature::verify_authorization;
use crate::types::{OrderSide, Pip, Wallet};
use tracing::info;

impl Engine {
    pub fn execute_trade(
        &mut self,
        caller: &Wallet,
        buy: &SignedOrder,
        sell: &SignedOrder,
        trade: &Trade,
    ) -> Result<TradeResult, EngineError> {
        self.require_role(caller, Role::Dispatcher)?;
        trade.validate(self.config.max_fee_rate)?;
        self.check_order_pair(&buy.order, &sell.order, trade)?;

        let buy_wallet = buy.order.wallet;
        let sell_wallet = sell.order.wallet;
        if buy_wallet == sell_wallet {
            return Err(EngineError::SelfTrade(buy_wallet));
        }
        if buy_wallet == self.config.wallets.exit_fund || sell_wallet == self.config.wallets.exit_fund {
            return Err(EngineError::ExitFundCannotTrade);
        }
        self.ensure_not_exited(&buy_wallet)?;
        self.ensure_not_exited(&sell_wallet)?;

        let market = self.markets.active_market(&trade.base_symbol)?;
        let funding_period = market.funding.len();

        // 8.4.1: signatures, limits and fills
        let buy_hash = buy.order.hash();
        let sell_hash = sell.order.hash();
        for (signed, hash) in [(buy, &buy_hash), (sell, &sell_hash)] {
            let order = &signed.order;
            self.nonces.validate_nonce(&order.wallet, &order.nonce)?;
            verify_authorization(
                &order.wallet,
                hash,
                &order.nonce,
                &signed.authorization,
                self.config.delegate_key_expiration_period_ms,
            )?;
            order.accepts_price(trade.price)?;
        }
        let buy_filled = self.fills.check_fill(&buy_hash, buy.order.quantity, trade.base_quantity)?;
        let sell_filled = self
            .fills
            .check_fill(&sell_hash, sell.order.quantity, trade.base_quantity)?;

        // 8.4.2: stage balances
        let base = trade.base_symbol.as_str();
        let quote = self.config.quote_asset_symbol.as_str();
        let mut staged = self.ledger.staged();
        let mut funding = self.stage_funding(&mut staged, &buy_wallet)?;
        funding.extend(self.stage_funding(&mut staged, &sell_wallet)?);

        for order in [&buy.order, &sell.order] {
            let before = staged.get(&order.wallet, base).balance;
            let (base_delta, quote_delta) = trade.deltas_for(order.side)?;
            let after = staged
                .apply_fill(order.wallet, base, quote, base_delta, quote_delta, funding_period)?
                .balance;
            if is_increase(before, after)? {
                if order.reduce_only {
                    return Err(EngineError::ReduceOnlyViolation { wallet: order.wallet });
                }
                self.check_position_size(&order.wallet, base, after)?;
            }
        }
        let fee_income = trade.fee_wallet_income()?;
        staged.adjust(self.config.wallets.fee_wallet, quote, fee_income)?;

        // 8.4.3: margin is only enforced on wallets that took on risk
        for order in [&buy.order, &sell.order] {
            self.check_post_trade_margin(&staged, order, base)?;
        }

        let changes = staged.into_changes();
        self.ledger.commit(changes);
        self.fills.record_fill(buy_hash, buy_filled);
        self.fills.record_fill(sell_hash, sell_filled);
        self.emit_funding(funding);

        info!(
            market = %trade.base_symbol,
            buyer = %buy_wallet,
            seller = %sell_wallet,
            quantity = %trade.base_quantity,
            price = %trade.price,
            "trade settled"
        );
        self.emit_event(EventPayload::TradeSettled(TradeSettledEvent {
            base_symbol: trade.base_symbol.clone(),
            buy_wallet,
            sell_wallet,
            base_quantity: trade.base_quantity,
            quote_quantity: trade.quote_quantity,
            price: trade.price,
            maker_side: trade.maker_side,
            maker_fee: trade.maker_fee,
            taker_fee: trade.taker_fee,
        }));

        Ok(TradeResult {
            buy_wallet,
            sell_wallet,
            base_quantity: trade.base_quantity,
            quote_quantity: trade.quote_quantity,
            fee_income,
        })
    }

    fn check_order_pair(&self, buy: &Order, sell: &Order, trade: &Trade) -> Result<(), EngineError> {
        buy.validate()?;
        sell.validate()?;
        if buy.side != OrderSide::Buy || sell.side != OrderSide::Sell {
            return Err(OrderError::SideMismatch {
                buy: buy.side,
                sell: sell.side,
            }
            .into());
        }
        for order in [buy, sell] {
            if order.market != trade.base_symbol {
                return Err(OrderError::MarketMismatch {
                    order: order.market.clone(),
                    trade: trade.base_symbol.clone(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn check_position_size(&self, wallet: &Wallet, base_symbol: &str, position: Pip) -> Result<(), EngineError> {
        let fields = self.markets.fields_for(base_symbol, wallet)?;
        let size = position.abs()?;
        if size < fields.minimum_position_size || size > fields.maximum_position_size {
            return Err(EngineError::PositionSizeOutOfRange {
                wallet: *wallet,
                size,
                minimum: fields.minimum_position_size,
                maximum: fields.maximum_position_size,
            });
        }
        Ok(())
    }

    fn check_post_trade_margin(
        &self,
        staged: &StagedLedger<'_>,
        order: &Order,
        base_symbol: &str,
    ) -> Result<(), EngineError> {
        let before = self.ledger.balance(&order.wallet, base_symbol).balance;
        let after = staged.get(&order.wallet, base_symbol).balance;
        if is_increase(before, after)? {
            self.ensure_initial_margin(staged, &order.wallet)?;
        }
        Ok(())
    }
}

/// True when the position grew or flipped sides.
pub(crate) fn is_increase(before: Pip, after: Pip) -> Result<bool, EngineError> {
    let flipped = !before.is_zero() && !after.is_zero() && before.signum() != after.signum();
    Ok(flipped || after.abs()? > before.abs()?)
}
