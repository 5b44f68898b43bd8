//! Index price publication.

use super::core::Engine;
use super::results::EngineError;
use crate::config::Role;
use crate::events::{EventPayload, IndexPriceUpdatedEvent};
use crate::price_feed::{validate_index_price, FreshnessWindow, IndexPrice};
use crate::types::{Timestamp, Wallet};
use std::collections::HashMap;
use tracing::info;

impl Engine {
    /// Publish a batch of signed index prices. All are validated before any is applied.
    pub fn publish_index_prices(
        &mut self,
        caller: &Wallet,
        prices: &[IndexPrice],
    ) -> Result<(), EngineError> {
        self.require_role(caller, Role::Dispatcher)?;
        let window = FreshnessWindow {
            max_age_ms: self.config.max_index_price_age_ms,
            max_future_ms: self.config.max_index_price_future_ms,
        };

        // later prices in the batch must be newer than earlier ones for the same market
        let mut latest: HashMap<&str, Timestamp> = HashMap::new();
        let mut signers = Vec::with_capacity(prices.len());
        for price in prices {
            let market = self.markets.active_market(&price.base_symbol)?;
            let last = latest
                .get(price.base_symbol.as_str())
                .copied()
                .unwrap_or(market.last_index_price_timestamp);
            let signer = validate_index_price(
                price,
                &self.config.index_price_signers,
                last,
                self.current_time,
                window,
            )?;
            latest.insert(price.base_symbol.as_str(), price.timestamp);
            signers.push(signer);
        }

        for (price, signer) in prices.iter().zip(signers) {
            let market = self.markets.market_mut(&price.base_symbol)?;
            market.last_index_price = price.price;
            market.last_index_price_timestamp = price.timestamp;

            info!(market = %price.base_symbol, price = %price.price, signer = %signer, "index price updated");
            self.emit_event(EventPayload::IndexPriceUpdated(IndexPriceUpdatedEvent {
                base_symbol: price.base_symbol.clone(),
                price: price.price,
                timestamp: price.timestamp,
                signer,
            }));
        }
        Ok(())
    }
}
