//! Liquidation execution.
//!
//! Deleveraging moves part or all of one position to a counterparty that
//! already holds the opposite side. Wallet-level liquidations move every
//! position to the insurance fund at once. Deactivated markets settle at
//! their frozen price with no counterparty. The dispatcher supplies quote
//! quantities; the engine recomputes them and rejects anything outside the
//! configured tolerance.

use super::core::Engine;
use super::results::{EngineError, LiquidationResult};
use crate::config::Role;
use crate::events::{EventPayload, FundingAppliedEvent, LiquidationKind, PositionLiquidatedEvent};
use crate::ledger::{BalanceChanges, StagedLedger};
use crate::liquidation::{
    bankruptcy_quotes, exit_quotes, fund_closure_quotes, negative_residue, pro_rata_quote,
    validate_quote_quantity, DeleverageMode, ValuationBasis,
};
use crate::margin::{PositionSnapshot, PriceSource};
use crate::types::{Pip, Wallet};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// One deleverage instruction from the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleverageRequest {
    pub base_symbol: String,
    pub liquidating_wallet: Wallet,
    pub counterparty: Wallet,
    /// Positive base quantity taken off the liquidating wallet's position.
    pub liquidation_base_quantity: Pip,
    /// Signed quote credited to the liquidating wallet.
    pub liquidation_quote_quantity: Pip,
}

// Full-position valuation of one market inside a wallet's book
struct Valuation {
    basis: ValuationBasis,
    position: Pip,
    full_quote: Pip,
}

impl Engine {
    pub fn deleverage(
        &mut self,
        caller: &Wallet,
        mode: DeleverageMode,
        request: &DeleverageRequest,
    ) -> Result<LiquidationResult, EngineError> {
        self.require_role(caller, Role::Dispatcher)?;
        let liquidating = request.liquidating_wallet;
        let counterparty = request.counterparty;
        self.check_deleverage_parties(mode, &liquidating, &counterparty)?;

        let market = self.markets.active_market(&request.base_symbol)?;
        let funding_period = market.funding.len();
        let base = request.base_symbol.as_str();
        let quote = self.config.quote_asset_symbol.as_str();

        let mut staged = self.ledger.staged();
        let mut funding = self.stage_funding(&mut staged, &liquidating)?;
        funding.extend(self.stage_funding(&mut staged, &counterparty)?);

        // 8.5.1: mode preconditions
        if mode == DeleverageMode::InMaintenanceAcquisition {
            if self.ensure_maintenance_margin(&staged, &liquidating).is_ok() {
                return Err(EngineError::MaintenanceMarginMet(liquidating));
            }
            let insurance_fund = self.config.wallets.insurance_fund;
            funding.extend(self.stage_funding(&mut staged, &insurance_fund)?);
            if self.insurance_fund_can_acquire(&staged, &liquidating)? {
                return Err(EngineError::InsuranceFundCanAcquire(liquidating));
            }
        }

        let valuation = self.value_position(&staged, mode, &liquidating, base)?;
        let expected = pro_rata_quote(
            valuation.full_quote,
            valuation.position,
            request.liquidation_base_quantity,
        )?;
        validate_quote_quantity(
            expected,
            request.liquidation_quote_quantity,
            self.config.liquidation_quote_tolerance,
        )?;

        let held = staged.get(&counterparty, base).balance;
        if held.signum() != -valuation.position.signum() || held.abs()? < request.liquidation_base_quantity {
            return Err(EngineError::CounterpartyCannotAbsorb {
                counterparty,
                base_symbol: request.base_symbol.clone(),
                quantity: request.liquidation_base_quantity,
            });
        }

        // 8.5.2: move the position and the quote
        let base_delta = if valuation.position.is_positive() {
            request.liquidation_base_quantity.checked_neg()?
        } else {
            request.liquidation_base_quantity
        };
        let quote_delta = request.liquidation_quote_quantity;
        staged.apply_fill(liquidating, base, quote, base_delta, quote_delta, funding_period)?;
        staged.apply_fill(
            counterparty,
            base,
            quote,
            base_delta.checked_neg()?,
            quote_delta.checked_neg()?,
            funding_period,
        )?;

        if mode == DeleverageMode::ExitAcquisition {
            self.absorb_exit_residue(
                &mut staged,
                &liquidating,
                self.config.wallets.exit_fund,
                self.config.exit_quote_tolerance,
            )?;
        }
        self.ensure_maintenance_margin(&staged, &counterparty)?;

        let changes = staged.into_changes();
        self.ledger.commit(changes);
        self.emit_funding(funding);
        self.refresh_exit_fund_state();

        let result = LiquidationResult {
            kind: LiquidationKind::Deleverage(mode),
            basis: valuation.basis,
            liquidating_wallet: liquidating,
            counterparty: Some(counterparty),
            base_symbol: request.base_symbol.clone(),
            base_quantity: base_delta,
            quote_quantity: quote_delta,
        };
        self.emit_liquidation(&result);
        Ok(result)
    }

    /// The insurance fund takes every position of a wallet below maintenance at bankruptcy value.
    pub fn liquidate_wallet_in_maintenance(
        &mut self,
        caller: &Wallet,
        wallet: &Wallet,
        quote_quantities: &[Pip],
    ) -> Result<Vec<LiquidationResult>, EngineError> {
        self.require_role(caller, Role::Dispatcher)?;
        self.check_liquidated_wallet(wallet)?;
        self.ensure_not_exited(wallet)?;

        let insurance_fund = self.config.wallets.insurance_fund;
        let quote = self.config.quote_asset_symbol.as_str();
        let mut staged = self.ledger.staged();
        let mut funding = self.stage_funding(&mut staged, wallet)?;
        funding.extend(self.stage_funding(&mut staged, &insurance_fund)?);
        if self.ensure_maintenance_margin(&staged, wallet).is_ok() {
            return Err(EngineError::MaintenanceMarginMet(*wallet));
        }

        let calculator = self.calculator(&staged);
        let positions = calculator.open_positions(wallet, PriceSource::Index)?;
        let expected = bankruptcy_quotes(calculator.quote_balance(wallet), &positions)?;
        let results = self.transfer_positions_to_insurance_fund(
            &mut staged,
            wallet,
            LiquidationKind::WalletInMaintenance,
            ValuationBasis::Bankruptcy,
            &positions,
            &expected,
            quote_quantities,
        )?;

        // whatever quote is left, positive or negative, belongs to the fund
        let remaining = staged.get(wallet, quote).balance;
        staged.adjust(*wallet, quote, remaining.checked_neg()?)?;
        staged.adjust(insurance_fund, quote, remaining)?;
        self.ensure_initial_margin(&staged, &insurance_fund)?;

        let changes = staged.into_changes();
        self.commit_wallet_liquidation(changes, funding, &results);
        Ok(results)
    }

    /// The insurance fund takes every position of an exited wallet at exit value.
    pub fn liquidate_wallet_exit(
        &mut self,
        caller: &Wallet,
        wallet: &Wallet,
        quote_quantities: &[Pip],
    ) -> Result<Vec<LiquidationResult>, EngineError> {
        self.require_role(caller, Role::Dispatcher)?;
        self.check_liquidated_wallet(wallet)?;
        if !self.exits.is_exited(wallet) {
            return Err(EngineError::WalletNotExited(*wallet));
        }

        let insurance_fund = self.config.wallets.insurance_fund;
        let mut staged = self.ledger.staged();
        let mut funding = self.stage_funding(&mut staged, wallet)?;
        funding.extend(self.stage_funding(&mut staged, &insurance_fund)?);

        let calculator = self.calculator(&staged);
        let positions = calculator.open_positions(wallet, PriceSource::Index)?;
        let (basis, expected) = exit_quotes(calculator.quote_balance(wallet), &positions)?;
        let results = self.transfer_positions_to_insurance_fund(
            &mut staged,
            wallet,
            LiquidationKind::WalletExit,
            basis,
            &positions,
            &expected,
            quote_quantities,
        )?;

        self.absorb_exit_residue(&mut staged, wallet, insurance_fund, self.config.exit_quote_tolerance)?;
        self.ensure_initial_margin(&staged, &insurance_fund)?;

        let changes = staged.into_changes();
        self.commit_wallet_liquidation(changes, funding, &results);
        Ok(results)
    }

    /// Close a position in a deactivated market at the frozen index price.
    pub fn liquidate_position_in_deactivated_market(
        &mut self,
        caller: &Wallet,
        base_symbol: &str,
        wallet: &Wallet,
        quote_quantity: Pip,
    ) -> Result<LiquidationResult, EngineError> {
        self.require_role(caller, Role::Dispatcher)?;
        let market = self.markets.market(base_symbol)?;
        if market.is_active() {
            return Err(EngineError::MarketStillActive(base_symbol.to_string()));
        }
        let price = market.index_price();
        let funding_period = market.funding.len();
        let quote = self.config.quote_asset_symbol.as_str();

        let mut staged = self.ledger.staged();
        let funding = self.stage_funding(&mut staged, wallet)?;
        let position = staged.get(wallet, base_symbol).balance;
        if position.is_zero() {
            return Err(EngineError::NoOpenPosition {
                wallet: *wallet,
                base_symbol: base_symbol.to_string(),
            });
        }
        let expected = position.multiply(price)?;
        validate_quote_quantity(expected, quote_quantity, self.config.liquidation_quote_tolerance)?;

        let base_delta = position.checked_neg()?;
        staged.apply_fill(*wallet, base_symbol, quote, base_delta, quote_quantity, funding_period)?;

        let changes = staged.into_changes();
        self.ledger.commit(changes);
        self.emit_funding(funding);
        self.refresh_exit_fund_state();

        let result = LiquidationResult {
            kind: LiquidationKind::DeactivatedMarket,
            basis: ValuationBasis::DeactivationPrice,
            liquidating_wallet: *wallet,
            counterparty: None,
            base_symbol: base_symbol.to_string(),
            base_quantity: base_delta,
            quote_quantity,
        };
        self.emit_liquidation(&result);
        Ok(result)
    }

    // 8.5.3: which parties each mode allows
    fn check_deleverage_parties(
        &self,
        mode: DeleverageMode,
        liquidating: &Wallet,
        counterparty: &Wallet,
    ) -> Result<(), EngineError> {
        let wallets = &self.config.wallets;
        match mode {
            DeleverageMode::InMaintenanceAcquisition => {
                self.check_liquidated_wallet(liquidating)?;
                self.ensure_not_exited(liquidating)?;
            }
            DeleverageMode::ExitAcquisition => {
                self.check_liquidated_wallet(liquidating)?;
                if !self.exits.is_exited(liquidating) {
                    return Err(EngineError::WalletNotExited(*liquidating));
                }
            }
            DeleverageMode::InsuranceFundClosure => {
                if *liquidating != wallets.insurance_fund {
                    return Err(EngineError::Unauthorized {
                        caller: *liquidating,
                        required: Role::InsuranceFund,
                    });
                }
            }
            DeleverageMode::ExitFundClosure => {
                if *liquidating != wallets.exit_fund {
                    return Err(EngineError::Unauthorized {
                        caller: *liquidating,
                        required: Role::ExitFund,
                    });
                }
                if self.exit_fund_position_opened_at.is_none() {
                    return Err(EngineError::ExitFundHasNoPositions);
                }
            }
        }

        if counterparty == liquidating {
            return Err(EngineError::SelfLiquidation(*liquidating));
        }
        if *counterparty == wallets.exit_fund {
            return Err(EngineError::ExitFundAsCounterparty);
        }
        if *counterparty == wallets.insurance_fund {
            return Err(EngineError::InsuranceFundAsCounterparty);
        }
        self.ensure_not_exited(counterparty)
    }

    fn check_liquidated_wallet(&self, wallet: &Wallet) -> Result<(), EngineError> {
        if *wallet == self.config.wallets.exit_fund {
            return Err(EngineError::CannotLiquidateExitFund);
        }
        if *wallet == self.config.wallets.insurance_fund {
            return Err(EngineError::CannotLiquidateInsuranceFund);
        }
        Ok(())
    }

    fn value_position(
        &self,
        staged: &StagedLedger<'_>,
        mode: DeleverageMode,
        wallet: &Wallet,
        base_symbol: &str,
    ) -> Result<Valuation, EngineError> {
        let calculator = self.calculator(staged);
        let positions = calculator.open_positions(wallet, PriceSource::Index)?;
        let quote_balance = calculator.quote_balance(wallet);
        let (basis, quotes) = match mode {
            DeleverageMode::InMaintenanceAcquisition => (
                ValuationBasis::Bankruptcy,
                bankruptcy_quotes(quote_balance, &positions)?,
            ),
            DeleverageMode::ExitAcquisition => exit_quotes(quote_balance, &positions)?,
            DeleverageMode::InsuranceFundClosure | DeleverageMode::ExitFundClosure => {
                fund_closure_quotes(quote_balance, &positions)?
            }
        };

        positions
            .iter()
            .zip(quotes)
            .find(|(position, _)| position.base_symbol == base_symbol)
            .map(|(position, full_quote)| Valuation {
                basis,
                position: position.quantity,
                full_quote,
            })
            .ok_or_else(|| EngineError::NoOpenPosition {
                wallet: *wallet,
                base_symbol: base_symbol.to_string(),
            })
    }

    // Would the insurance fund stay above initial margin after taking every
    // position at bankruptcy value? If so it must be offered them first.
    fn insurance_fund_can_acquire(
        &self,
        staged: &StagedLedger<'_>,
        wallet: &Wallet,
    ) -> Result<bool, EngineError> {
        let insurance_fund = self.config.wallets.insurance_fund;
        let quote = self.config.quote_asset_symbol.as_str();
        let calculator = self.calculator(staged);
        let positions = calculator.open_positions(wallet, PriceSource::Index)?;
        let quotes = bankruptcy_quotes(calculator.quote_balance(wallet), &positions)?;

        let mut simulated = staged.clone();
        for (position, full_quote) in positions.iter().zip(quotes) {
            let period = self.markets.market(&position.base_symbol)?.funding.len();
            simulated.apply_fill(
                insurance_fund,
                &position.base_symbol,
                quote,
                position.quantity,
                full_quote.checked_neg()?,
                period,
            )?;
        }
        Ok(self.ensure_initial_margin(&simulated, &insurance_fund).is_ok())
    }

    #[allow(clippy::too_many_arguments)]
    fn transfer_positions_to_insurance_fund(
        &self,
        staged: &mut StagedLedger<'_>,
        wallet: &Wallet,
        kind: LiquidationKind,
        basis: ValuationBasis,
        positions: &[PositionSnapshot],
        expected: &[Pip],
        provided: &[Pip],
    ) -> Result<Vec<LiquidationResult>, EngineError> {
        if provided.len() != positions.len() {
            return Err(EngineError::QuoteQuantityCount {
                expected: positions.len(),
                provided: provided.len(),
            });
        }
        let insurance_fund = self.config.wallets.insurance_fund;
        let quote = self.config.quote_asset_symbol.as_str();

        let mut results = Vec::with_capacity(positions.len());
        for ((position, expected), provided) in positions.iter().zip(expected).zip(provided) {
            validate_quote_quantity(*expected, *provided, self.config.liquidation_quote_tolerance)?;
            let period = self.markets.market(&position.base_symbol)?.funding.len();
            let base_delta = position.quantity.checked_neg()?;
            staged.apply_fill(*wallet, &position.base_symbol, quote, base_delta, *provided, period)?;
            staged.apply_fill(
                insurance_fund,
                &position.base_symbol,
                quote,
                position.quantity,
                provided.checked_neg()?,
                period,
            )?;
            results.push(LiquidationResult {
                kind,
                basis,
                liquidating_wallet: *wallet,
                counterparty: Some(insurance_fund),
                base_symbol: position.base_symbol.clone(),
                base_quantity: base_delta,
                quote_quantity: *provided,
            });
        }
        Ok(results)
    }

    // 8.5.4: an exited wallet with no positions left may not hold negative quote
    pub(super) fn absorb_exit_residue(
        &self,
        staged: &mut StagedLedger<'_>,
        wallet: &Wallet,
        absorber: Wallet,
        tolerance: Pip,
    ) -> Result<Pip, EngineError> {
        if self.has_open_positions(&*staged, wallet) {
            return Ok(Pip::ZERO);
        }
        let quote = self.config.quote_asset_symbol.as_str();
        let residue = negative_residue(staged.get(wallet, quote).balance, tolerance)?;
        if !residue.is_zero() {
            staged.adjust(*wallet, quote, residue)?;
            staged.adjust(absorber, quote, residue.checked_neg()?)?;
            warn!(wallet = %wallet, absorber = %absorber, residue = %residue, "negative exit residue absorbed");
        }
        Ok(residue)
    }

    pub(super) fn refresh_exit_fund_state(&mut self) {
        let exit_fund = self.config.wallets.exit_fund;
        let open = self.has_open_positions(&self.ledger, &exit_fund);
        match (open, self.exit_fund_position_opened_at) {
            (true, None) => {
                self.exit_fund_position_opened_at = Some(self.current_block);
                info!(block = %self.current_block, "exit fund opened positions");
            }
            (false, Some(_)) => {
                self.exit_fund_position_opened_at = None;
                info!("exit fund flat");
            }
            _ => {}
        }
    }

    fn commit_wallet_liquidation(
        &mut self,
        changes: BalanceChanges,
        funding: Vec<FundingAppliedEvent>,
        results: &[LiquidationResult],
    ) {
        self.ledger.commit(changes);
        self.emit_funding(funding);
        self.refresh_exit_fund_state();
        for result in results {
            self.emit_liquidation(result);
        }
    }

    pub(super) fn emit_liquidation(&mut self, result: &LiquidationResult) {
        info!(
            kind = ?result.kind,
            wallet = %result.liquidating_wallet,
            market = %result.base_symbol,
            quantity = %result.base_quantity,
            quote = %result.quote_quantity,
            "position liquidated"
        );
        self.emit_event(EventPayload::PositionLiquidated(PositionLiquidatedEvent {
            kind: result.kind,
            basis: result.basis,
            liquidating_wallet: result.liquidating_wallet,
            counterparty: result.counterparty,
            base_symbol: result.base_symbol.clone(),
            base_quantity: result.base_quantity,
            quote_quantity: result.quote_quantity,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeConfig, PrivilegedWallets};
    use crate::engine::EngineConfig;
    use crate::market::OverridableMarketFields;

    const DISPATCHER: Wallet = Wallet([1; 20]);
    const INSURANCE: Wallet = Wallet([3; 20]);
    const EXIT_FUND: Wallet = Wallet([4; 20]);
    const GOVERNANCE: Wallet = Wallet([5; 20]);
    const ALICE: Wallet = Wallet([0xa1; 20]);
    const BOB: Wallet = Wallet([0xb0; 20]);

    fn pips(whole: i64) -> Pip {
        Pip::from_whole(whole).unwrap()
    }

    fn setup_engine() -> Engine {
        let wallets = PrivilegedWallets {
            dispatcher: DISPATCHER,
            fee_wallet: Wallet([2; 20]),
            insurance_fund: INSURANCE,
            exit_fund: EXIT_FUND,
            governance: GOVERNANCE,
        };
        let mut engine =
            Engine::new(ExchangeConfig::testnet("USD", 8, wallets), EngineConfig::default()).unwrap();
        engine
            .add_market(&GOVERNANCE, "ETH", OverridableMarketFields::standard(), pips(2000))
            .unwrap();
        engine.activate_market(&DISPATCHER, "ETH").unwrap();
        engine
    }

    // Alice long 10 ETH at 2000 with `collateral`, Bob the short side
    fn open_positions(engine: &mut Engine, collateral: i64) {
        let mut staged = engine.ledger.staged();
        staged.adjust(ALICE, "USD", pips(collateral)).unwrap();
        staged.adjust(BOB, "USD", pips(10_000)).unwrap();
        staged.apply_fill(ALICE, "ETH", "USD", pips(10), pips(-20_000), 0).unwrap();
        staged.apply_fill(BOB, "ETH", "USD", pips(-10), pips(20_000), 0).unwrap();
        let changes = staged.into_changes();
        engine.ledger.commit(changes);
    }

    fn set_price(engine: &mut Engine, price: i64) {
        engine.markets.market_mut("ETH").unwrap().last_index_price = pips(price);
    }

    fn request(quantity: i64, quote: Pip) -> DeleverageRequest {
        DeleverageRequest {
            base_symbol: "ETH".to_string(),
            liquidating_wallet: ALICE,
            counterparty: BOB,
            liquidation_base_quantity: pips(quantity),
            liquidation_quote_quantity: quote,
        }
    }

    #[test]
    fn exit_acquisition_requires_exit() {
        let mut engine = setup_engine();
        open_positions(&mut engine, 1_000);
        let err = engine
            .deleverage(&DISPATCHER, DeleverageMode::ExitAcquisition, &request(1, pips(2000)))
            .unwrap_err();
        assert_eq!(err, EngineError::WalletNotExited(ALICE));
    }

    #[test]
    fn funds_are_excluded_by_name() {
        let mut engine = setup_engine();
        let mut req = request(1, pips(2000));

        req.liquidating_wallet = EXIT_FUND;
        let err = engine
            .deleverage(&DISPATCHER, DeleverageMode::InMaintenanceAcquisition, &req)
            .unwrap_err();
        assert_eq!(err, EngineError::CannotLiquidateExitFund);

        req.liquidating_wallet = INSURANCE;
        let err = engine
            .deleverage(&DISPATCHER, DeleverageMode::ExitAcquisition, &req)
            .unwrap_err();
        assert_eq!(err, EngineError::CannotLiquidateInsuranceFund);

        req.liquidating_wallet = ALICE;
        req.counterparty = INSURANCE;
        let err = engine
            .deleverage(&DISPATCHER, DeleverageMode::InMaintenanceAcquisition, &req)
            .unwrap_err();
        assert_eq!(err, EngineError::InsuranceFundAsCounterparty);

        req.counterparty = EXIT_FUND;
        let err = engine
            .deleverage(&DISPATCHER, DeleverageMode::InMaintenanceAcquisition, &req)
            .unwrap_err();
        assert_eq!(err, EngineError::ExitFundAsCounterparty);

        req.liquidating_wallet = INSURANCE;
        req.counterparty = INSURANCE;
        let err = engine
            .deleverage(&DISPATCHER, DeleverageMode::InsuranceFundClosure, &req)
            .unwrap_err();
        assert_eq!(err, EngineError::SelfLiquidation(INSURANCE));

        req.liquidating_wallet = EXIT_FUND;
        req.counterparty = BOB;
        let err = engine
            .deleverage(&DISPATCHER, DeleverageMode::ExitFundClosure, &req)
            .unwrap_err();
        assert_eq!(err, EngineError::ExitFundHasNoPositions);
    }

    #[test]
    fn healthy_wallet_cannot_be_deleveraged() {
        let mut engine = setup_engine();
        open_positions(&mut engine, 5_000);
        let err = engine
            .deleverage(&DISPATCHER, DeleverageMode::InMaintenanceAcquisition, &request(1, pips(2000)))
            .unwrap_err();
        assert_eq!(err, EngineError::MaintenanceMarginMet(ALICE));
    }

    #[test]
    fn in_maintenance_deleverage_at_bankruptcy_value() {
        let mut engine = setup_engine();
        // quote -19000 + 10 * 1950 = 500 against maintenance 585
        open_positions(&mut engine, 1_000);
        set_price(&mut engine, 1950);

        // full bankruptcy quote: 19500 - 585 * 500 / 585 = 19000, so 1900 per unit
        let err = engine
            .deleverage(&DISPATCHER, DeleverageMode::InMaintenanceAcquisition, &request(1, pips(1950)))
            .unwrap_err();
        assert!(matches!(err, EngineError::Liquidation(_)));

        let result = engine
            .deleverage(&DISPATCHER, DeleverageMode::InMaintenanceAcquisition, &request(1, pips(1900)))
            .unwrap();
        assert_eq!(result.base_quantity, pips(-1));
        assert_eq!(result.basis, ValuationBasis::Bankruptcy);
        assert_eq!(engine.position(&ALICE, "ETH").balance, pips(9));
        assert_eq!(engine.position(&BOB, "ETH").balance, pips(-9));
        assert_eq!(engine.quote_balance(&ALICE), pips(-17_100));
        assert_eq!(engine.quote_balance(&BOB), pips(28_100));
    }

    #[test]
    fn counterparty_must_hold_opposite_side() {
        let mut engine = setup_engine();
        open_positions(&mut engine, 1_000);
        set_price(&mut engine, 1950);
        let mut req = request(11, pips(20_900));
        let err = engine
            .deleverage(&DISPATCHER, DeleverageMode::InMaintenanceAcquisition, &req)
            .unwrap_err();
        assert!(matches!(err, EngineError::Liquidation(_)));

        req = request(1, pips(1900));
        req.counterparty = Wallet([0xcc; 20]);
        let err = engine
            .deleverage(&DISPATCHER, DeleverageMode::InMaintenanceAcquisition, &req)
            .unwrap_err();
        assert!(matches!(err, EngineError::CounterpartyCannotAbsorb { .. }));
    }

    #[test]
    fn wallet_in_maintenance_moves_everything_to_insurance_fund() {
        let mut engine = setup_engine();
        open_positions(&mut engine, 1_000);
        engine.ledger.credit(INSURANCE, "USD", pips(100_000)).unwrap();
        set_price(&mut engine, 1950);

        let err = engine
            .liquidate_wallet_in_maintenance(&DISPATCHER, &ALICE, &[])
            .unwrap_err();
        assert!(matches!(err, EngineError::QuoteQuantityCount { expected: 1, provided: 0 }));

        let results = engine
            .liquidate_wallet_in_maintenance(&DISPATCHER, &ALICE, &[pips(19_000)])
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(engine.position(&ALICE, "ETH").is_flat());
        assert_eq!(engine.quote_balance(&ALICE), Pip::ZERO);
        assert_eq!(engine.position(&INSURANCE, "ETH").balance, pips(10));
        assert_eq!(engine.quote_balance(&INSURANCE), pips(81_000));
    }

    #[test]
    fn deactivated_market_settles_at_frozen_price() {
        let mut engine = setup_engine();
        open_positions(&mut engine, 1_000);
        set_price(&mut engine, 2100);

        let err = engine
            .liquidate_position_in_deactivated_market(&DISPATCHER, "ETH", &ALICE, pips(21_000))
            .unwrap_err();
        assert_eq!(err, EngineError::MarketStillActive("ETH".to_string()));

        engine.deactivate_market(&DISPATCHER, "ETH").unwrap();
        set_price(&mut engine, 1000);
        let result = engine
            .liquidate_position_in_deactivated_market(&DISPATCHER, "ETH", &ALICE, pips(21_000))
            .unwrap();
        assert_eq!(result.basis, ValuationBasis::DeactivationPrice);
        assert_eq!(engine.quote_balance(&ALICE), pips(2_000));
        assert!(engine.position(&ALICE, "ETH").is_flat());
    }
}
