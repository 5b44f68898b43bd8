//! Account value and margin requirements.
//!
//! Total account value is the quote balance plus every open position marked
//! at the chosen price source. Requirements use a tiered fraction: the base
//! fraction up to the baseline size, then one incremental step per started
//! chunk of `incremental_position_size` beyond it. Larger positions get
//! less leverage.
//!
//! Every product is widened before it is narrowed back into pips, so
//! overflow surfaces as an error instead of wrapping.

use crate::ledger::BalanceView;
use crate::market::{Market, MarketError, MarketRegistry, OverridableMarketFields};
use crate::types::{narrow, ArithmeticError, Pip, Wallet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarginError {
    #[error("No oracle price for {0}")]
    OraclePriceUnavailable(String),

    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("Arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),
}

/// Fallback price feed, independent of published index prices.
pub trait OraclePriceSource: fmt::Debug {
    fn price_for(&self, base_symbol: &str) -> Result<Pip, MarginError>;
}

#[derive(Debug, Clone, Default)]
pub struct FixedOraclePrices {
    prices: HashMap<String, Pip>,
}

impl FixedOraclePrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price(mut self, base_symbol: &str, price: Pip) -> Self {
        self.prices.insert(base_symbol.to_string(), price);
        self
    }

    pub fn set_price(&mut self, base_symbol: &str, price: Pip) {
        self.prices.insert(base_symbol.to_string(), price);
    }
}

impl OraclePriceSource for FixedOraclePrices {
    fn price_for(&self, base_symbol: &str) -> Result<Pip, MarginError> {
        self.prices
            .get(base_symbol)
            .copied()
            .ok_or_else(|| MarginError::OraclePriceUnavailable(base_symbol.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub enum PriceSource<'a> {
    Index,
    Oracle(&'a dyn OraclePriceSource),
}

impl PriceSource<'_> {
    pub fn price_of(&self, market: &Market) -> Result<Pip, MarginError> {
        match self {
            PriceSource::Index => Ok(market.index_price()),
            PriceSource::Oracle(source) => source.price_for(&market.base_asset_symbol),
        }
    }
}

// 6.1.1: base + incremental * ceil(max(0, |q| - baseline) / step)
pub fn margin_fraction(
    base_fraction: Pip,
    fields: &OverridableMarketFields,
    quantity: Pip,
) -> Result<Pip, ArithmeticError> {
    let size = quantity.abs()?;
    if size <= fields.baseline_position_size {
        return Ok(base_fraction);
    }
    let step = fields.incremental_position_size.raw() as i128;
    if step <= 0 {
        return Err(ArithmeticError::DivisionByZero);
    }
    let excess = size.raw() as i128 - fields.baseline_position_size.raw() as i128;
    let steps = (excess + step - 1) / step;
    let increment = (fields.incremental_initial_margin_fraction.raw() as i128)
        .checked_mul(steps)
        .ok_or(ArithmeticError::PipOverflow)?;
    narrow(base_fraction.raw() as i128 + increment)
}

pub fn initial_margin_fraction(
    fields: &OverridableMarketFields,
    quantity: Pip,
) -> Result<Pip, ArithmeticError> {
    margin_fraction(fields.initial_margin_fraction, fields, quantity)
}

pub fn maintenance_margin_fraction(
    fields: &OverridableMarketFields,
    quantity: Pip,
) -> Result<Pip, ArithmeticError> {
    margin_fraction(fields.maintenance_margin_fraction, fields, quantity)
}

/// |quantity| * price * fraction.
pub fn margin_requirement(quantity: Pip, price: Pip, fraction: Pip) -> Result<Pip, ArithmeticError> {
    quantity.abs()?.multiply(price)?.multiply(fraction)
}

/// An open position marked at one price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub base_symbol: String,
    pub quantity: Pip,
    pub cost_basis: Pip,
    pub price: Pip,
    pub fields: OverridableMarketFields,
}

impl PositionSnapshot {
    pub fn value(&self) -> Result<Pip, ArithmeticError> {
        self.quantity.multiply(self.price)
    }

    pub fn initial_requirement(&self) -> Result<Pip, ArithmeticError> {
        let fraction = initial_margin_fraction(&self.fields, self.quantity)?;
        margin_requirement(self.quantity, self.price, fraction)
    }

    pub fn maintenance_requirement(&self) -> Result<Pip, ArithmeticError> {
        let fraction = maintenance_margin_fraction(&self.fields, self.quantity)?;
        margin_requirement(self.quantity, self.price, fraction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginSummary {
    pub total_account_value: Pip,
    pub initial_requirement: Pip,
    pub maintenance_requirement: Pip,
}

impl MarginSummary {
    pub fn meets_initial(&self) -> bool {
        self.total_account_value >= self.initial_requirement
    }

    pub fn meets_maintenance(&self) -> bool {
        self.total_account_value >= self.maintenance_requirement
    }
}

/// Read-only margin view over a registry and any balance view.
pub struct MarginCalculator<'a> {
    markets: &'a MarketRegistry,
    balances: &'a dyn BalanceView,
}

impl<'a> MarginCalculator<'a> {
    pub fn new(markets: &'a MarketRegistry, balances: &'a dyn BalanceView) -> Self {
        Self { markets, balances }
    }

    pub fn quote_balance(&self, wallet: &Wallet) -> Pip {
        self.balances
            .balance_of(wallet, self.markets.quote_symbol())
            .balance
    }

    pub fn position(
        &self,
        wallet: &Wallet,
        market: &Market,
        source: PriceSource<'_>,
    ) -> Result<Option<PositionSnapshot>, MarginError> {
        let row = self.balances.balance_of(wallet, &market.base_asset_symbol);
        if row.is_flat() {
            return Ok(None);
        }
        Ok(Some(PositionSnapshot {
            base_symbol: market.base_asset_symbol.clone(),
            quantity: row.balance,
            cost_basis: row.cost_basis,
            price: source.price_of(market)?,
            fields: self.markets.fields_for(&market.base_asset_symbol, wallet)?,
        }))
    }

    // 6.1.2: every market with a nonzero position, active or winding down
    pub fn open_positions(
        &self,
        wallet: &Wallet,
        source: PriceSource<'_>,
    ) -> Result<Vec<PositionSnapshot>, MarginError> {
        let mut positions = Vec::new();
        for market in self.markets.markets() {
            if let Some(position) = self.position(wallet, market, source)? {
                positions.push(position);
            }
        }
        Ok(positions)
    }

    pub fn total_account_value(
        &self,
        wallet: &Wallet,
        source: PriceSource<'_>,
    ) -> Result<Pip, MarginError> {
        let positions = self.open_positions(wallet, source)?;
        Ok(account_value(self.quote_balance(wallet), &positions)?)
    }

    pub fn initial_margin_requirement(
        &self,
        wallet: &Wallet,
        source: PriceSource<'_>,
    ) -> Result<Pip, MarginError> {
        let positions = self.open_positions(wallet, source)?;
        Ok(Pip::checked_sum(
            positions
                .iter()
                .map(PositionSnapshot::initial_requirement)
                .collect::<Result<Vec<_>, _>>()?,
        )?)
    }

    pub fn maintenance_margin_requirement(
        &self,
        wallet: &Wallet,
        source: PriceSource<'_>,
    ) -> Result<Pip, MarginError> {
        let positions = self.open_positions(wallet, source)?;
        Ok(Pip::checked_sum(
            positions
                .iter()
                .map(PositionSnapshot::maintenance_requirement)
                .collect::<Result<Vec<_>, _>>()?,
        )?)
    }

    pub fn summary(&self, wallet: &Wallet, source: PriceSource<'_>) -> Result<MarginSummary, MarginError> {
        let positions = self.open_positions(wallet, source)?;
        summarize(self.quote_balance(wallet), &positions)
    }

    pub fn is_initial_margin_met(
        &self,
        wallet: &Wallet,
        source: PriceSource<'_>,
    ) -> Result<bool, MarginError> {
        Ok(self.summary(wallet, source)?.meets_initial())
    }

    pub fn is_maintenance_margin_met(
        &self,
        wallet: &Wallet,
        source: PriceSource<'_>,
    ) -> Result<bool, MarginError> {
        Ok(self.summary(wallet, source)?.meets_maintenance())
    }
}

pub fn account_value(quote_balance: Pip, positions: &[PositionSnapshot]) -> Result<Pip, ArithmeticError> {
    positions
        .iter()
        .try_fold(quote_balance, |total, position| total.checked_add(position.value()?))
}

pub fn summarize(quote_balance: Pip, positions: &[PositionSnapshot]) -> Result<MarginSummary, MarginError> {
    let mut initial = Pip::ZERO;
    let mut maintenance = Pip::ZERO;
    for position in positions {
        initial = initial.checked_add(position.initial_requirement()?)?;
        maintenance = maintenance.checked_add(position.maintenance_requirement()?)?;
    }
    Ok(MarginSummary {
        total_account_value: account_value(quote_balance, positions)?,
        initial_requirement: initial,
        maintenance_requirement: maintenance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::BalanceLedger;
    use crate::market::MarketFieldBounds;
    use crate::types::Timestamp;

    fn pips(whole: i64) -> Pip {
        Pip::from_whole(whole).unwrap()
    }

    fn fields() -> OverridableMarketFields {
        OverridableMarketFields::standard()
    }

    #[test]
    fn no_increment_at_baseline() {
        let f = fields();
        assert_eq!(
            initial_margin_fraction(&f, f.baseline_position_size).unwrap(),
            f.initial_margin_fraction
        );
        assert_eq!(
            initial_margin_fraction(&f, f.baseline_position_size.checked_neg().unwrap()).unwrap(),
            f.initial_margin_fraction
        );
    }

    #[test]
    fn one_increment_per_started_chunk() {
        let f = fields();
        let one_step = f
            .initial_margin_fraction
            .checked_add(f.incremental_initial_margin_fraction)
            .unwrap();

        let at_one_chunk = f.baseline_position_size.checked_add(f.incremental_position_size).unwrap();
        assert_eq!(initial_margin_fraction(&f, at_one_chunk).unwrap(), one_step);

        // a single pip past baseline already starts the first chunk
        let just_past = f.baseline_position_size.checked_add(Pip::from_raw(1)).unwrap();
        assert_eq!(initial_margin_fraction(&f, just_past).unwrap(), one_step);

        let next = at_one_chunk.checked_add(Pip::from_raw(1)).unwrap();
        assert_eq!(
            initial_margin_fraction(&f, next).unwrap(),
            one_step.checked_add(f.incremental_initial_margin_fraction).unwrap()
        );
    }

    #[test]
    fn requirement_overflow_is_an_error() {
        assert_eq!(
            margin_requirement(Pip::MAX, pips(2), Pip::ONE),
            Err(ArithmeticError::PipOverflow)
        );
    }

    #[test]
    fn account_value_by_price_source() {
        let mut markets = MarketRegistry::new("USD", 10, MarketFieldBounds::default());
        markets
            .add_market("ETH", fields(), pips(2000), Timestamp(0))
            .unwrap();
        let wallet = Wallet([3; 20]);

        let mut ledger = BalanceLedger::new();
        ledger.credit(wallet, "USD", pips(-18_000)).unwrap();
        ledger.credit(wallet, "ETH", pips(10)).unwrap();

        let calc = MarginCalculator::new(&markets, &ledger);
        assert_eq!(
            calc.total_account_value(&wallet, PriceSource::Index).unwrap(),
            pips(2_000)
        );
        // 10 * 2000 * 5%
        assert_eq!(
            calc.initial_margin_requirement(&wallet, PriceSource::Index).unwrap(),
            pips(1_000)
        );
        assert!(calc.is_initial_margin_met(&wallet, PriceSource::Index).unwrap());

        let oracle = FixedOraclePrices::new().with_price("ETH", pips(1850));
        let summary = calc.summary(&wallet, PriceSource::Oracle(&oracle)).unwrap();
        assert_eq!(summary.total_account_value, pips(500));
        assert_eq!(summary.maintenance_requirement, Pip::from_raw(555 * 100_000_000));
        assert!(!summary.meets_maintenance());

        let empty = FixedOraclePrices::new();
        assert!(matches!(
            calc.summary(&wallet, PriceSource::Oracle(&empty)),
            Err(MarginError::OraclePriceUnavailable(_))
        ));
    }
}
