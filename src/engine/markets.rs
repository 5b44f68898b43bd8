//! Market lifecycle and risk parameters.

use super::core::Engine;
use super::results::EngineError;
use crate::config::Role;
use crate::events::{EventPayload, MarketAddedEvent};
use crate::market::OverridableMarketFields;
use crate::types::{Pip, Wallet};
use tracing::info;

impl Engine {
    /// Register a market. It starts inactive until the dispatcher activates it.
    pub fn add_market(
        &mut self,
        caller: &Wallet,
        base_symbol: &str,
        fields: OverridableMarketFields,
        initial_index_price: Pip,
    ) -> Result<(), EngineError> {
        self.require_role(caller, Role::Governance)?;
        self.markets
            .add_market(base_symbol, fields, initial_index_price, self.current_time)?;

        info!(market = %base_symbol, price = %initial_index_price, "market added");
        self.emit_event(EventPayload::MarketAdded(MarketAddedEvent {
            base_symbol: base_symbol.to_string(),
            initial_index_price,
        }));
        Ok(())
    }

    pub fn activate_market(&mut self, caller: &Wallet, base_symbol: &str) -> Result<(), EngineError> {
        self.require_role(caller, Role::Dispatcher)?;
        self.markets.activate_market(base_symbol)?;

        info!(market = %base_symbol, "market activated");
        self.emit_event(EventPayload::MarketActivated {
            base_symbol: base_symbol.to_string(),
        });
        Ok(())
    }

    /// Freeze the market at its last index price. Returns the frozen price.
    pub fn deactivate_market(&mut self, caller: &Wallet, base_symbol: &str) -> Result<Pip, EngineError> {
        self.require_role(caller, Role::Dispatcher)?;
        let index_price = self.markets.deactivate_market(base_symbol)?;

        info!(market = %base_symbol, price = %index_price, "market deactivated");
        self.emit_event(EventPayload::MarketDeactivated {
            base_symbol: base_symbol.to_string(),
            index_price,
        });
        Ok(index_price)
    }

    /// `wallet == None` replaces the market defaults, otherwise sets a per-wallet override.
    pub fn set_market_overrides(
        &mut self,
        caller: &Wallet,
        base_symbol: &str,
        wallet: Option<Wallet>,
        fields: OverridableMarketFields,
    ) -> Result<(), EngineError> {
        self.require_role(caller, Role::Governance)?;
        self.markets.set_market_overrides(base_symbol, wallet, fields)?;

        info!(market = %base_symbol, wallet = ?wallet, "market overrides set");
        self.emit_event(EventPayload::MarketOverridesSet {
            base_symbol: base_symbol.to_string(),
            wallet,
        });
        Ok(())
    }
}
