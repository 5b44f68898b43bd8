//! Market catalog and lifecycle.
//!
//! A market is identified by its base asset symbol. It starts inactive,
//! toggles between active and inactive, and freezes its index price on
//! deactivation so open positions can be wound down at a fixed value.

use crate::funding::FundingHistory;
use crate::types::{Pip, Timestamp, Wallet, PIP_SCALE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    /// Accepting trades and index prices
    Active,
    /// Registered but closed; positions may only be wound down
    Inactive,
}

/// Risk parameters that governance may override per market or per wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverridableMarketFields {
    pub initial_margin_fraction: Pip,
    pub maintenance_margin_fraction: Pip,
    pub incremental_initial_margin_fraction: Pip,
    pub baseline_position_size: Pip,
    pub incremental_position_size: Pip,
    pub maximum_position_size: Pip,
    pub minimum_position_size: Pip,
}

impl OverridableMarketFields {
    /// 5% initial, 3% maintenance, +1% every 10 units past 100.
    pub fn standard() -> Self {
        Self {
            initial_margin_fraction: Pip::from_raw(5_000_000),
            maintenance_margin_fraction: Pip::from_raw(3_000_000),
            incremental_initial_margin_fraction: Pip::from_raw(1_000_000),
            baseline_position_size: Pip::from_raw(100 * PIP_SCALE),
            incremental_position_size: Pip::from_raw(10 * PIP_SCALE),
            maximum_position_size: Pip::from_raw(10_000 * PIP_SCALE),
            minimum_position_size: Pip::from_raw(PIP_SCALE / 100),
        }
    }

    pub fn validate(&self, bounds: &MarketFieldBounds) -> Result<(), MarketError> {
        check_range(
            "initial_margin_fraction",
            self.initial_margin_fraction,
            bounds.min_initial_margin_fraction,
            bounds.max_fraction,
        )?;
        check_range(
            "maintenance_margin_fraction",
            self.maintenance_margin_fraction,
            bounds.min_maintenance_margin_fraction,
            bounds.max_fraction,
        )?;
        check_range(
            "incremental_initial_margin_fraction",
            self.incremental_initial_margin_fraction,
            bounds.min_incremental_initial_margin_fraction,
            bounds.max_fraction,
        )?;
        if self.maintenance_margin_fraction > self.initial_margin_fraction {
            return Err(MarketError::MaintenanceAboveInitial {
                maintenance: self.maintenance_margin_fraction,
                initial: self.initial_margin_fraction,
            });
        }

        check_range(
            "baseline_position_size",
            self.baseline_position_size,
            Pip::ZERO,
            bounds.max_position_size,
        )?;
        check_range(
            "incremental_position_size",
            self.incremental_position_size,
            Pip::from_raw(1),
            bounds.max_position_size,
        )?;
        check_range(
            "maximum_position_size",
            self.maximum_position_size,
            Pip::ZERO,
            bounds.max_position_size,
        )?;
        check_range(
            "minimum_position_size",
            self.minimum_position_size,
            Pip::ZERO,
            self.maximum_position_size,
        )?;
        Ok(())
    }
}

fn check_range(field: &'static str, value: Pip, minimum: Pip, maximum: Pip) -> Result<(), MarketError> {
    if value < minimum {
        return Err(MarketError::FieldBelowMinimum {
            field,
            value,
            minimum,
        });
    }
    if value > maximum {
        return Err(MarketError::FieldAboveMaximum {
            field,
            value,
            maximum,
        });
    }
    Ok(())
}

/// Protocol-wide floors and ceilings for overridable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketFieldBounds {
    pub min_initial_margin_fraction: Pip,
    pub min_maintenance_margin_fraction: Pip,
    pub min_incremental_initial_margin_fraction: Pip,
    pub max_fraction: Pip,
    pub max_position_size: Pip,
}

impl Default for MarketFieldBounds {
    fn default() -> Self {
        Self {
            min_initial_margin_fraction: Pip::from_raw(500_000), // 0.5%
            min_maintenance_margin_fraction: Pip::from_raw(300_000), // 0.3%
            min_incremental_initial_margin_fraction: Pip::from_raw(100_000), // 0.1%
            max_fraction: Pip::ONE,
            max_position_size: Pip::from_raw(1_000_000_000 * PIP_SCALE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    #[error("Market {0} not found")]
    MarketNotFound(String),

    #[error("Market {0} already exists")]
    MarketAlreadyExists(String),

    #[error("Market {0} is not active")]
    MarketNotActive(String),

    #[error("Market {0} is already active")]
    MarketAlreadyActive(String),

    #[error("Base symbol {0} cannot equal the quote symbol")]
    BaseSymbolIsQuote(String),

    #[error("Invalid base symbol {0:?}")]
    InvalidSymbol(String),

    #[error("Market limit of {0} reached")]
    MarketLimitReached(usize),

    #[error("{field} {value} below minimum {minimum}")]
    FieldBelowMinimum {
        field: &'static str,
        value: Pip,
        minimum: Pip,
    },

    #[error("{field} {value} above maximum {maximum}")]
    FieldAboveMaximum {
        field: &'static str,
        value: Pip,
        maximum: Pip,
    },

    #[error("Maintenance fraction {maintenance} exceeds initial fraction {initial}")]
    MaintenanceAboveInitial { maintenance: Pip, initial: Pip },

    #[error("Index price must be positive, got {0}")]
    InvalidIndexPrice(Pip),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub base_asset_symbol: String,
    pub status: MarketStatus,
    pub last_index_price: Pip,
    pub last_index_price_timestamp: Timestamp,
    /// Frozen when the market is deactivated.
    pub index_price_at_deactivation: Option<Pip>,
    pub fields: OverridableMarketFields,
    pub funding: FundingHistory,
    pub last_funding_timestamp: Option<Timestamp>,
}

impl Market {
    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }

    /// Price used for valuation. Inactive markets report their frozen price.
    pub fn index_price(&self) -> Pip {
        match (self.status, self.index_price_at_deactivation) {
            (MarketStatus::Inactive, Some(frozen)) => frozen,
            _ => self.last_index_price,
        }
    }
}

/// Ordered catalog of markets plus per-wallet risk overrides.
#[derive(Debug, Clone)]
pub struct MarketRegistry {
    quote_symbol: String,
    max_markets: usize,
    bounds: MarketFieldBounds,
    markets: Vec<Market>,
    index: HashMap<String, usize>,
    overrides: HashMap<(Wallet, String), OverridableMarketFields>,
}

impl MarketRegistry {
    pub fn new(quote_symbol: &str, max_markets: usize, bounds: MarketFieldBounds) -> Self {
        Self {
            quote_symbol: quote_symbol.to_string(),
            max_markets,
            bounds,
            markets: Vec::new(),
            index: HashMap::new(),
            overrides: HashMap::new(),
        }
    }

    pub fn quote_symbol(&self) -> &str {
        &self.quote_symbol
    }

    pub fn bounds(&self) -> &MarketFieldBounds {
        &self.bounds
    }

    pub fn len(&self) -> usize {
        self.markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }

    pub fn markets(&self) -> impl Iterator<Item = &Market> {
        self.markets.iter()
    }

    pub fn market(&self, symbol: &str) -> Result<&Market, MarketError> {
        self.index
            .get(symbol)
            .and_then(|&i| self.markets.get(i))
            .ok_or_else(|| MarketError::MarketNotFound(symbol.to_string()))
    }

    pub fn market_mut(&mut self, symbol: &str) -> Result<&mut Market, MarketError> {
        let position = *self
            .index
            .get(symbol)
            .ok_or_else(|| MarketError::MarketNotFound(symbol.to_string()))?;
        self.markets
            .get_mut(position)
            .ok_or_else(|| MarketError::MarketNotFound(symbol.to_string()))
    }

    pub fn active_market(&self, symbol: &str) -> Result<&Market, MarketError> {
        let market = self.market(symbol)?;
        if !market.is_active() {
            return Err(MarketError::MarketNotActive(symbol.to_string()));
        }
        Ok(market)
    }

    // 6.1: new markets start inactive
    pub fn add_market(
        &mut self,
        base_symbol: &str,
        fields: OverridableMarketFields,
        initial_index_price: Pip,
        timestamp: Timestamp,
    ) -> Result<&Market, MarketError> {
        if base_symbol.is_empty() || base_symbol.chars().any(char::is_whitespace) {
            return Err(MarketError::InvalidSymbol(base_symbol.to_string()));
        }
        if base_symbol == self.quote_symbol {
            return Err(MarketError::BaseSymbolIsQuote(base_symbol.to_string()));
        }
        if self.index.contains_key(base_symbol) {
            return Err(MarketError::MarketAlreadyExists(base_symbol.to_string()));
        }
        if self.markets.len() >= self.max_markets {
            return Err(MarketError::MarketLimitReached(self.max_markets));
        }
        if !initial_index_price.is_positive() {
            return Err(MarketError::InvalidIndexPrice(initial_index_price));
        }
        fields.validate(&self.bounds)?;

        let position = self.markets.len();
        self.markets.push(Market {
            base_asset_symbol: base_symbol.to_string(),
            status: MarketStatus::Inactive,
            last_index_price: initial_index_price,
            last_index_price_timestamp: timestamp,
            index_price_at_deactivation: None,
            fields,
            funding: FundingHistory::new(),
            last_funding_timestamp: None,
        });
        self.index.insert(base_symbol.to_string(), position);
        self.market(base_symbol)
    }

    pub fn activate_market(&mut self, symbol: &str) -> Result<(), MarketError> {
        let market = self.market_mut(symbol)?;
        if market.is_active() {
            return Err(MarketError::MarketAlreadyActive(symbol.to_string()));
        }
        market.status = MarketStatus::Active;
        market.index_price_at_deactivation = None;
        Ok(())
    }

    // 6.2: freeze the last index price for wind-down
    pub fn deactivate_market(&mut self, symbol: &str) -> Result<Pip, MarketError> {
        let market = self.market_mut(symbol)?;
        if !market.is_active() {
            return Err(MarketError::MarketNotActive(symbol.to_string()));
        }
        market.status = MarketStatus::Inactive;
        market.index_price_at_deactivation = Some(market.last_index_price);
        Ok(market.last_index_price)
    }

    /// `wallet == None` replaces the market defaults.
    pub fn set_market_overrides(
        &mut self,
        symbol: &str,
        wallet: Option<Wallet>,
        fields: OverridableMarketFields,
    ) -> Result<(), MarketError> {
        fields.validate(&self.bounds)?;
        match wallet {
            None => self.market_mut(symbol)?.fields = fields,
            Some(wallet) => {
                self.market(symbol)?;
                self.overrides.insert((wallet, symbol.to_string()), fields);
            }
        }
        Ok(())
    }

    pub fn clear_wallet_overrides(&mut self, symbol: &str, wallet: Wallet) -> bool {
        self.overrides.remove(&(wallet, symbol.to_string())).is_some()
    }

    /// Effective risk fields for `wallet` in `symbol`.
    pub fn fields_for(
        &self,
        symbol: &str,
        wallet: &Wallet,
    ) -> Result<OverridableMarketFields, MarketError> {
        let market = self.market(symbol)?;
        Ok(self
            .overrides
            .get(&(*wallet, symbol.to_string()))
            .copied()
            .unwrap_or(market.fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> MarketRegistry {
        MarketRegistry::new("USD", 2, MarketFieldBounds::default())
    }

    fn price() -> Pip {
        Pip::from_whole(2000).unwrap()
    }

    #[test]
    fn lifecycle() {
        let mut markets = registry();
        let market = markets
            .add_market("ETH", OverridableMarketFields::standard(), price(), Timestamp(0))
            .unwrap();
        assert_eq!(market.status, MarketStatus::Inactive);

        markets.activate_market("ETH").unwrap();
        assert!(markets.active_market("ETH").is_ok());

        markets.market_mut("ETH").unwrap().last_index_price = Pip::from_whole(2100).unwrap();
        let frozen = markets.deactivate_market("ETH").unwrap();
        assert_eq!(frozen, Pip::from_whole(2100).unwrap());

        // later updates do not move the wind-down price
        markets.market_mut("ETH").unwrap().last_index_price = Pip::from_whole(1).unwrap();
        assert_eq!(markets.market("ETH").unwrap().index_price(), frozen);
        assert!(matches!(
            markets.active_market("ETH"),
            Err(MarketError::MarketNotActive(_))
        ));
    }

    #[test]
    fn rejects_quote_duplicate_and_cap() {
        let mut markets = registry();
        let fields = OverridableMarketFields::standard();
        assert!(matches!(
            markets.add_market("USD", fields, price(), Timestamp(0)),
            Err(MarketError::BaseSymbolIsQuote(_))
        ));
        markets.add_market("ETH", fields, price(), Timestamp(0)).unwrap();
        assert!(matches!(
            markets.add_market("ETH", fields, price(), Timestamp(0)),
            Err(MarketError::MarketAlreadyExists(_))
        ));
        markets.add_market("BTC", fields, price(), Timestamp(0)).unwrap();
        assert!(matches!(
            markets.add_market("SOL", fields, price(), Timestamp(0)),
            Err(MarketError::MarketLimitReached(2))
        ));
    }

    #[test]
    fn field_validation() {
        let bounds = MarketFieldBounds::default();

        let mut fields = OverridableMarketFields::standard();
        fields.maintenance_margin_fraction = Pip::from_raw(6_000_000);
        assert!(matches!(
            fields.validate(&bounds),
            Err(MarketError::MaintenanceAboveInitial { .. })
        ));

        let mut fields = OverridableMarketFields::standard();
        fields.initial_margin_fraction = Pip::from_raw(1);
        assert!(matches!(
            fields.validate(&bounds),
            Err(MarketError::FieldBelowMinimum { field: "initial_margin_fraction", .. })
        ));

        let mut fields = OverridableMarketFields::standard();
        fields.incremental_position_size = Pip::ZERO;
        assert!(fields.validate(&bounds).is_err());

        let mut fields = OverridableMarketFields::standard();
        fields.minimum_position_size = Pip::from_whole(20_000).unwrap();
        assert!(matches!(
            fields.validate(&bounds),
            Err(MarketError::FieldAboveMaximum { field: "minimum_position_size", .. })
        ));
    }

    #[test]
    fn wallet_overrides() {
        let mut markets = registry();
        markets
            .add_market("ETH", OverridableMarketFields::standard(), price(), Timestamp(0))
            .unwrap();
        let whale = Wallet([7; 20]);

        let mut tight = OverridableMarketFields::standard();
        tight.initial_margin_fraction = Pip::from_raw(10_000_000);
        markets.set_market_overrides("ETH", Some(whale), tight).unwrap();

        assert_eq!(markets.fields_for("ETH", &whale).unwrap(), tight);
        assert_eq!(
            markets.fields_for("ETH", &Wallet([8; 20])).unwrap(),
            OverridableMarketFields::standard()
        );
        assert!(markets.clear_wallet_overrides("ETH", whale));
        assert_eq!(
            markets.fields_for("ETH", &whale).unwrap(),
            OverridableMarketFields::standard()
        );
    }
}
