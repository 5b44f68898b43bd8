//! Funding rate publication and settlement.

use super::core::Engine;
use super::results::EngineError;
use crate::config::Role;
use crate::events::{EventPayload, FundingAppliedEvent, FundingRatePublishedEvent};
use crate::funding::{funding_multiplier, funding_payment, validate_funding_rate};
use crate::ledger::StagedLedger;
use crate::types::{Pip, Wallet};
use tracing::info;

impl Engine {
    /// Publish one period's rate for `base_symbol`. Returns the period index.
    pub fn publish_funding_rate(
        &mut self,
        caller: &Wallet,
        base_symbol: &str,
        rate: Pip,
    ) -> Result<u64, EngineError> {
        self.require_role(caller, Role::Dispatcher)?;
        validate_funding_rate(rate, self.config.max_funding_rate)?;

        let now = self.current_time;
        let period_ms = self.config.funding_period_ms;
        let market = self.markets.active_market(base_symbol)?;
        if let Some(last) = market.last_funding_timestamp {
            let next = last.plus_millis(period_ms);
            if now < next {
                return Err(EngineError::FundingPeriodNotElapsed { next, now });
            }
        }
        let multiplier = funding_multiplier(rate, market.last_index_price)?;

        let market = self.markets.market_mut(base_symbol)?;
        let period = market.funding.append(multiplier);
        market.last_funding_timestamp = Some(now);

        info!(market = %base_symbol, period, rate = %rate, multiplier = %multiplier, "funding rate published");
        self.emit_event(EventPayload::FundingRatePublished(FundingRatePublishedEvent {
            base_symbol: base_symbol.to_string(),
            period,
            rate,
            multiplier,
        }));
        Ok(period)
    }

    /// Settle every outstanding funding period for `wallet`. Anyone may call it.
    pub fn apply_wallet_funding(&mut self, wallet: &Wallet) -> Result<Pip, EngineError> {
        let mut staged = self.ledger.staged();
        let applied = self.stage_funding(&mut staged, wallet)?;
        let total = Pip::checked_sum(applied.iter().map(|event| event.payment))?;

        let changes = staged.into_changes();
        self.ledger.commit(changes);
        self.emit_funding(applied);
        Ok(total)
    }

    // 8.2: settles [next_funding_period, len) per open position into the quote balance
    pub(super) fn stage_funding(
        &self,
        staged: &mut StagedLedger<'_>,
        wallet: &Wallet,
    ) -> Result<Vec<FundingAppliedEvent>, EngineError> {
        let quote = self.config.quote_asset_symbol.as_str();
        let mut applied = Vec::new();

        for market in self.markets.markets() {
            let symbol = market.base_asset_symbol.as_str();
            let mut position = staged.get(wallet, symbol);
            let latest = market.funding.len();
            if position.is_flat() || position.next_funding_period >= latest {
                continue;
            }

            let periods = latest - position.next_funding_period;
            let sum = market.funding.sum_range(position.next_funding_period, latest)?;
            let payment = funding_payment(position.balance, sum)?;

            position.next_funding_period = latest;
            staged.set(*wallet, symbol, position);
            // paid through the quote balance, cost basis keeps the traded value
            staged.adjust(*wallet, quote, payment)?;

            applied.push(FundingAppliedEvent {
                wallet: *wallet,
                base_symbol: symbol.to_string(),
                periods,
                payment,
            });
        }
        Ok(applied)
    }

    pub(super) fn emit_funding(&mut self, applied: Vec<FundingAppliedEvent>) {
        for event in applied {
            info!(
                wallet = %event.wallet,
                market = %event.base_symbol,
                periods = event.periods,
                payment = %event.payment,
                "funding applied"
            );
            self.emit_event(EventPayload::FundingApplied(event));
        }
    }
}
