// 4.0: balance ledger. signed balances per (wallet, asset) plus pending deposits.
// quote asset rows hold collateral. base asset rows hold a position: signed quantity
// plus the signed quote cost basis of that quantity.
// engine operations never touch the ledger directly. they stage changes in a
// StagedLedger overlay and commit once every check has passed.

use crate::types::{ArithmeticError, Pip, Wallet};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Quantity {requested} exceeds pending deposits {pending}")]
    ExceedsPending { requested: Pip, pending: Pip },

    #[error("Balance for {wallet} in {asset} would fall to {balance}, below floor {floor}")]
    BelowFloor {
        wallet: Wallet,
        asset: String,
        balance: Pip,
        floor: Pip,
    },

    #[error("Quantity must be positive, got {0}")]
    NonPositiveQuantity(Pip),

    #[error("Arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),
}

// 4.1: one ledger row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub balance: Pip,
    pub cost_basis: Pip,
    /// First funding period this position has not paid yet.
    pub next_funding_period: u64,
}

impl Balance {
    pub fn is_flat(&self) -> bool {
        self.balance.is_zero()
    }

    /// Moves the position by `base_delta` whose signed quote value is `quote_value`.
    /// Reductions release cost basis pro rata; a flip restarts it at the fill value.
    pub fn apply_position_change(
        &mut self,
        base_delta: Pip,
        quote_value: Pip,
    ) -> Result<(), ArithmeticError> {
        if base_delta.is_zero() {
            return Ok(());
        }
        let current = self.balance;
        let updated = current.checked_add(base_delta)?;

        if current.is_zero() || current.signum() == base_delta.signum() {
            self.cost_basis = self.cost_basis.checked_add(quote_value)?;
        } else if updated.is_zero() {
            self.cost_basis = Pip::ZERO;
        } else if updated.signum() == current.signum() {
            let released = self
                .cost_basis
                .mul_div(base_delta.abs()?, current.abs()?)?;
            self.cost_basis = self.cost_basis.checked_sub(released)?;
        } else {
            self.cost_basis = quote_value.mul_div(updated.abs()?, base_delta.abs()?)?;
        }

        self.balance = updated;
        Ok(())
    }
}

/// Read access shared by the committed ledger and staged overlays.
pub trait BalanceView {
    fn balance_of(&self, wallet: &Wallet, asset: &str) -> Balance;
}

/// Legacy balance source consulted once, on a wallet's first deposit.
pub trait BalanceMigrationSource: fmt::Debug {
    fn migrated_balance(&self, wallet: &Wallet) -> Option<Pip>;
}

#[derive(Debug, Clone, Default)]
pub struct LegacyBalances {
    balances: HashMap<Wallet, Pip>,
}

impl LegacyBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(mut self, wallet: Wallet, balance: Pip) -> Self {
        self.balances.insert(wallet, balance);
        self
    }
}

impl BalanceMigrationSource for LegacyBalances {
    fn migrated_balance(&self, wallet: &Wallet) -> Option<Pip> {
        self.balances.get(wallet).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositRecord {
    pub migrated: Option<Pip>,
    pub pending: Pip,
}

type BalanceKey = (Wallet, String);

/// Rows written by a staged operation, ready to commit.
pub type BalanceChanges = HashMap<BalanceKey, Balance>;

#[derive(Debug, Clone, Default)]
pub struct BalanceLedger {
    balances: HashMap<BalanceKey, Balance>,
    pending_deposits: HashMap<Wallet, Pip>,
    deposited_wallets: HashSet<Wallet>,
}

impl BalanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, wallet: &Wallet, asset: &str) -> Balance {
        self.balances
            .get(&(*wallet, asset.to_string()))
            .copied()
            .unwrap_or_default()
    }

    pub fn pending_deposit(&self, wallet: &Wallet) -> Pip {
        self.pending_deposits.get(wallet).copied().unwrap_or(Pip::ZERO)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Wallet, &str, &Balance)> {
        self.balances
            .iter()
            .map(|((wallet, asset), balance)| (wallet, asset.as_str(), balance))
    }

    pub fn credit(&mut self, wallet: Wallet, asset: &str, pips: Pip) -> Result<Pip, LedgerError> {
        let row = self.balances.entry((wallet, asset.to_string())).or_default();
        row.balance = row.balance.checked_add(pips)?;
        Ok(row.balance)
    }

    /// Negative results are margin debt and allowed unless `floor` says otherwise.
    pub fn debit(
        &mut self,
        wallet: Wallet,
        asset: &str,
        pips: Pip,
        floor: Option<Pip>,
    ) -> Result<Pip, LedgerError> {
        let key = (wallet, asset.to_string());
        let current = self.balances.get(&key).copied().unwrap_or_default();
        let updated = current.balance.checked_sub(pips)?;
        if let Some(floor) = floor {
            if updated < floor {
                return Err(LedgerError::BelowFloor {
                    wallet,
                    asset: asset.to_string(),
                    balance: updated,
                    floor,
                });
            }
        }
        self.balances.entry(key).or_default().balance = updated;
        Ok(updated)
    }

    // 4.2: migration runs on the first deposit only, then the deposit goes to pending
    pub fn record_pending_deposit(
        &mut self,
        wallet: Wallet,
        quote_asset: &str,
        pips: Pip,
        migration: Option<&dyn BalanceMigrationSource>,
    ) -> Result<DepositRecord, LedgerError> {
        if !pips.is_positive() {
            return Err(LedgerError::NonPositiveQuantity(pips));
        }
        let pending = self.pending_deposit(&wallet).checked_add(pips)?;

        let mut migrated = None;
        if !self.deposited_wallets.contains(&wallet) {
            if let Some(amount) = migration.and_then(|source| source.migrated_balance(&wallet)) {
                if !amount.is_zero() {
                    self.credit(wallet, quote_asset, amount)?;
                    migrated = Some(amount);
                }
            }
            self.deposited_wallets.insert(wallet);
        }

        self.pending_deposits.insert(wallet, pending);
        Ok(DepositRecord { migrated, pending })
    }

    pub fn apply_pending_deposit(
        &mut self,
        wallet: Wallet,
        quote_asset: &str,
        pips: Pip,
    ) -> Result<Pip, LedgerError> {
        if !pips.is_positive() {
            return Err(LedgerError::NonPositiveQuantity(pips));
        }
        let pending = self.pending_deposit(&wallet);
        if pips > pending {
            return Err(LedgerError::ExceedsPending {
                requested: pips,
                pending,
            });
        }
        let balance = self.credit(wallet, quote_asset, pips)?;
        self.pending_deposits
            .insert(wallet, pending.checked_sub(pips)?);
        Ok(balance)
    }

    pub fn staged(&self) -> StagedLedger<'_> {
        StagedLedger::new(self)
    }

    pub fn commit(&mut self, changes: BalanceChanges) {
        self.balances.extend(changes);
    }
}

impl BalanceView for BalanceLedger {
    fn balance_of(&self, wallet: &Wallet, asset: &str) -> Balance {
        self.balance(wallet, asset)
    }
}

// 4.3: copy-on-write overlay. reads fall through to the committed ledger.
#[derive(Debug, Clone)]
pub struct StagedLedger<'a> {
    base: &'a BalanceLedger,
    changes: BalanceChanges,
}

impl<'a> StagedLedger<'a> {
    pub fn new(base: &'a BalanceLedger) -> Self {
        Self {
            base,
            changes: HashMap::new(),
        }
    }

    pub fn get(&self, wallet: &Wallet, asset: &str) -> Balance {
        self.changes
            .get(&(*wallet, asset.to_string()))
            .copied()
            .unwrap_or_else(|| self.base.balance(wallet, asset))
    }

    pub fn set(&mut self, wallet: Wallet, asset: &str, balance: Balance) {
        self.changes.insert((wallet, asset.to_string()), balance);
    }

    pub fn adjust(&mut self, wallet: Wallet, asset: &str, delta: Pip) -> Result<Pip, LedgerError> {
        let mut row = self.get(&wallet, asset);
        row.balance = row.balance.checked_add(delta)?;
        self.set(wallet, asset, row);
        Ok(row.balance)
    }

    /// Quote moves by `quote_delta`, the position by `base_delta`.
    /// A position opened from flat starts owing funding at `funding_period`.
    pub fn apply_fill(
        &mut self,
        wallet: Wallet,
        base_asset: &str,
        quote_asset: &str,
        base_delta: Pip,
        quote_delta: Pip,
        funding_period: u64,
    ) -> Result<Balance, LedgerError> {
        let mut position = self.get(&wallet, base_asset);
        if position.is_flat() {
            position.next_funding_period = funding_period;
        }
        position.apply_position_change(base_delta, quote_delta.checked_neg()?)?;
        self.set(wallet, base_asset, position);
        self.adjust(wallet, quote_asset, quote_delta)?;
        Ok(position)
    }

    pub fn into_changes(self) -> BalanceChanges {
        self.changes
    }
}

impl BalanceView for StagedLedger<'_> {
    fn balance_of(&self, wallet: &Wallet, asset: &str) -> Balance {
        self.get(wallet, asset)
    }
}
