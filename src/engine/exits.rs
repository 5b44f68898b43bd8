// 8.6 engine/exits.rs: wallet exits.
// 8.6.1 an exited wallet cannot trade or receive transfers. once the exit is final
// its positions move to the exit fund at exit value and the remaining quote is paid out.
// 8.6.2 system recovery: the exit fund holds positions and is underwater. governance
// may then force exits through with the exit fund absorbing any shortfall.

use super::core::Engine;
use super::results::{EngineError, ExitWithdrawalResult, LiquidationResult};
use crate::config::Role;
use crate::events::{EventPayload, LiquidationKind};
use crate::exit::WalletExit;
use crate::liquidation::exit_quotes;
use crate::margin::PriceSource;
use crate::types::{Pip, Wallet};
use crate::units::pips_to_asset_units;
use tracing::info;

impl Engine {
    pub fn exit_wallet(&mut self, wallet: &Wallet) -> Result<WalletExit, EngineError> {
        if *wallet == self.config.wallets.exit_fund {
            return Err(EngineError::ExitFundCannotExit);
        }
        if *wallet == self.config.wallets.insurance_fund {
            return Err(EngineError::InsuranceFundCannotExit);
        }
        let exit = self.exits.exit(
            *wallet,
            self.current_block,
            self.config.chain_propagation_period_blocks,
        )?;

        info!(wallet = %wallet, effective_block = %exit.effective_block, "wallet exited");
        self.emit_event(EventPayload::WalletExited {
            wallet: *wallet,
            effective_block: exit.effective_block,
        });
        Ok(exit)
    }

    /// Close out a finalized exit. Calling it again after the payout returns zero.
    pub fn withdraw_exit(&mut self, wallet: &Wallet) -> Result<ExitWithdrawalResult, EngineError> {
        let tolerance = self.config.exit_quote_tolerance;
        self.settle_exit(wallet, tolerance)
    }

    /// Governance override for system recovery. The exit fund absorbs any negative quote.
    pub fn withdraw_exit_admin(
        &mut self,
        caller: &Wallet,
        wallet: &Wallet,
    ) -> Result<ExitWithdrawalResult, EngineError> {
        self.require_role(caller, Role::Governance)?;
        if !self.is_system_recovery()? {
            return Err(EngineError::NotInSystemRecovery);
        }
        self.settle_exit(wallet, Pip::MAX)
    }

    pub fn clear_wallet_exit(&mut self, wallet: &Wallet) -> Result<(), EngineError> {
        self.exits.clear(wallet, self.current_block)?;

        info!(wallet = %wallet, "wallet exit cleared");
        self.emit_event(EventPayload::WalletExitCleared { wallet: *wallet });
        Ok(())
    }

    /// Exit fund holds positions and its account value at index prices is negative.
    pub fn is_system_recovery(&self) -> Result<bool, EngineError> {
        let exit_fund = self.config.wallets.exit_fund;
        if !self.has_open_positions(&self.ledger, &exit_fund) {
            return Ok(false);
        }
        let summary = self.margin_summary(&exit_fund, PriceSource::Index)?;
        Ok(summary.total_account_value.is_negative())
    }

    fn settle_exit(&mut self, wallet: &Wallet, tolerance: Pip) -> Result<ExitWithdrawalResult, EngineError> {
        self.exits.finalized(wallet, self.current_block)?;
        let exit_fund = self.config.wallets.exit_fund;
        let quote = self.config.quote_asset_symbol.as_str();

        let mut staged = self.ledger.staged();
        let mut funding = self.stage_funding(&mut staged, wallet)?;
        funding.extend(self.stage_funding(&mut staged, &exit_fund)?);

        // 8.6.3: positions go to the exit fund at exit value
        let calculator = self.calculator(&staged);
        let positions = calculator.open_positions(wallet, PriceSource::Index)?;
        let (basis, quotes) = exit_quotes(calculator.quote_balance(wallet), &positions)?;
        let mut closed = Vec::with_capacity(positions.len());
        for (position, exit_quote) in positions.iter().zip(quotes) {
            let period = self.markets.market(&position.base_symbol)?.funding.len();
            let base_delta = position.quantity.checked_neg()?;
            staged.apply_fill(*wallet, &position.base_symbol, quote, base_delta, exit_quote, period)?;
            staged.apply_fill(
                exit_fund,
                &position.base_symbol,
                quote,
                position.quantity,
                exit_quote.checked_neg()?,
                period,
            )?;
            closed.push(LiquidationResult {
                kind: LiquidationKind::WalletExit,
                basis,
                liquidating_wallet: *wallet,
                counterparty: Some(exit_fund),
                base_symbol: position.base_symbol.clone(),
                base_quantity: base_delta,
                quote_quantity: exit_quote,
            });
        }

        let residue = self.absorb_exit_residue(&mut staged, wallet, exit_fund, tolerance)?;
        let payout = staged.get(wallet, quote).balance.max(Pip::ZERO);
        if payout.is_positive() {
            staged.adjust(*wallet, quote, payout.checked_neg()?)?;
        }
        let asset_units = pips_to_asset_units(payout.to_unsigned()?, self.config.quote_asset_decimals)?;

        let changes = staged.into_changes();
        self.ledger.commit(changes);
        self.emit_funding(funding);
        self.refresh_exit_fund_state();
        for result in &closed {
            self.emit_liquidation(result);
        }
        if payout.is_positive() || !closed.is_empty() {
            info!(wallet = %wallet, quantity = %payout, residue = %residue, "exit withdrawn");
            self.emit_event(EventPayload::WalletExitWithdrawn {
                wallet: *wallet,
                quantity: payout,
            });
        }

        Ok(ExitWithdrawalResult {
            wallet: *wallet,
            quantity: payout,
            asset_units,
            basis: (!closed.is_empty()).then_some(basis),
            positions_closed: closed.len(),
            residue,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExchangeConfig, PrivilegedWallets};
    use crate::engine::EngineConfig;
    use crate::exit::ExitError;
    use crate::liquidation::ValuationBasis;
    use crate::market::OverridableMarketFields;

    const DISPATCHER: Wallet = Wallet([1; 20]);
    const INSURANCE: Wallet = Wallet([3; 20]);
    const EXIT_FUND: Wallet = Wallet([4; 20]);
    const GOVERNANCE: Wallet = Wallet([5; 20]);
    const ALICE: Wallet = Wallet([0xa1; 20]);

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

    fn long_alice(engine: &mut Engine, collateral: i64) {
        let mut staged = engine.ledger.staged();
        staged.adjust(ALICE, "USD", pips(collateral)).unwrap();
        staged.apply_fill(ALICE, "ETH", "USD", pips(1), pips(-2_000), 0).unwrap();
        let changes = staged.into_changes();
        engine.ledger.commit(changes);
    }

    #[test]
    fn funds_cannot_exit() {
        let mut engine = setup_engine();
        assert_eq!(engine.exit_wallet(&EXIT_FUND), Err(EngineError::ExitFundCannotExit));
        assert_eq!(engine.exit_wallet(&INSURANCE), Err(EngineError::InsuranceFundCannotExit));
    }

    #[test]
    fn exit_waits_for_finality_and_pays_once() {
        let mut engine = setup_engine();
        long_alice(&mut engine, 3_000);
        engine.exit_wallet(&ALICE).unwrap();
        assert!(matches!(
            engine.exit_wallet(&ALICE),
            Err(EngineError::Exit(ExitError::WalletAlreadyExited(_)))
        ));
        assert!(matches!(
            engine.withdraw_exit(&ALICE),
            Err(EngineError::Exit(ExitError::ExitNotFinalized { .. }))
        ));

        engine.advance_blocks(10);
        // price rose to 2100 but the cost basis of 2000 is worse for the wallet
        engine.markets.market_mut("ETH").unwrap().last_index_price = pips(2100);
        let first = engine.withdraw_exit(&ALICE).unwrap();
        assert_eq!(first.basis, Some(ValuationBasis::Exit));
        assert_eq!(first.quantity, pips(3_000));
        assert_eq!(first.asset_units, 300_000_000_000);
        assert_eq!(engine.position(&EXIT_FUND, "ETH").balance, pips(1));
        assert!(engine.exit_fund_position_opened_at().is_some());

        let second = engine.withdraw_exit(&ALICE).unwrap();
        assert_eq!(second.quantity, Pip::ZERO);
        assert_eq!(second.positions_closed, 0);
    }

    #[test]
    fn exited_wallet_can_be_cleared_after_finality() {
        let mut engine = setup_engine();
        engine.exit_wallet(&ALICE).unwrap();
        assert!(engine.clear_wallet_exit(&ALICE).is_err());
        engine.advance_blocks(10);
        engine.clear_wallet_exit(&ALICE).unwrap();
        assert!(!engine.exits().is_exited(&ALICE));
    }

    #[test]
    fn admin_withdrawal_requires_system_recovery() {
        let mut engine = setup_engine();
        engine.exit_wallet(&ALICE).unwrap();
        engine.advance_blocks(10);
        assert_eq!(
            engine.withdraw_exit_admin(&GOVERNANCE, &ALICE),
            Err(EngineError::NotInSystemRecovery)
        );
        assert!(matches!(
            engine.withdraw_exit_admin(&DISPATCHER, &ALICE),
            Err(EngineError::Unauthorized { .. })
        ));
    }
}
