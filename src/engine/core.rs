// 8.0 engine/core.rs: the clearing engine. owns the ledger, the market registry,
// nonce and exit state, and the audit log.
// 8.1 every mutating operation stages balance changes, checks them, then commits.

use super::config::EngineConfig;
use super::results::EngineError;
use crate::config::{ConfigError, ExchangeConfig, Role};
use crate::custody::ProcessedRequests;
use crate::events::{Event, EventId, EventPayload, RoleRotatedEvent};
use crate::exit::WalletExits;
use crate::ledger::{Balance, BalanceLedger, BalanceMigrationSource, BalanceView, StagedLedger};
use crate::margin::{MarginCalculator, MarginSummary, PriceSource};
use crate::market::MarketRegistry;
use crate::nonce::NonceGuard;
use crate::order::OrderFillTracker;
use crate::types::{BlockNumber, Pip, Timestamp, Wallet};
use tracing::{debug, info};

/** 8.1: main engine struct. all state lives here */
#[derive(Debug)]
pub struct Engine {
    pub(super) config: ExchangeConfig,
    pub(super) engine_config: EngineConfig,
    pub(super) markets: MarketRegistry,
    pub(super) ledger: BalanceLedger,
    pub(super) nonces: NonceGuard,
    pub(super) exits: WalletExits,
    pub(super) fills: OrderFillTracker,
    pub(super) processed: ProcessedRequests,
    pub(super) migration: Option<Box<dyn BalanceMigrationSource>>,
    // Block at which the exit fund last went from flat to holding positions
    pub(super) exit_fund_position_opened_at: Option<BlockNumber>,
    pub(super) events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) current_time: Timestamp,
    pub(super) current_block: BlockNumber,
}

impl Engine {
    pub fn new(config: ExchangeConfig, engine_config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        engine_config.validate()?;
        let markets = MarketRegistry::new(
            &config.quote_asset_symbol,
            config.max_number_of_markets,
            config.market_bounds,
        );
        info!(
            quote = %config.quote_asset_symbol,
            decimals = config.quote_asset_decimals,
            "engine started"
        );
        Ok(Self {
            config,
            engine_config,
            markets,
            ledger: BalanceLedger::new(),
            nonces: NonceGuard::new(),
            exits: WalletExits::new(),
            fills: OrderFillTracker::new(),
            processed: ProcessedRequests::new(),
            migration: None,
            exit_fund_position_opened_at: None,
            events: Vec::new(),
            next_event_id: 1,
            current_time: Timestamp::from_millis(0),
            current_block: BlockNumber(0),
        })
    }

    /// Legacy balances consulted on each wallet's first deposit.
    pub fn with_migration_source(mut self, source: Box<dyn BalanceMigrationSource>) -> Self {
        self.migration = Some(source);
        self
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_time(&mut self, millis: u64) {
        self.current_time = self.current_time.plus_millis(millis);
    }

    pub fn block(&self) -> BlockNumber {
        self.current_block
    }

    pub fn set_block(&mut self, block: BlockNumber) -> Result<(), EngineError> {
        if block < self.current_block {
            return Err(EngineError::BlockInPast {
                block,
                current: self.current_block,
            });
        }
        self.current_block = block;
        Ok(())
    }

    pub fn advance_blocks(&mut self, blocks: u64) {
        self.current_block = self.current_block.plus(blocks);
    }

    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    pub fn markets(&self) -> &MarketRegistry {
        &self.markets
    }

    pub fn ledger(&self) -> &BalanceLedger {
        &self.ledger
    }

    pub fn exits(&self) -> &WalletExits {
        &self.exits
    }

    pub fn nonces(&self) -> &NonceGuard {
        &self.nonces
    }

    pub fn quote_symbol(&self) -> &str {
        &self.config.quote_asset_symbol
    }

    pub fn quote_balance(&self, wallet: &Wallet) -> Pip {
        self.ledger.balance(wallet, &self.config.quote_asset_symbol).balance
    }

    pub fn position(&self, wallet: &Wallet, base_symbol: &str) -> Balance {
        self.ledger.balance(wallet, base_symbol)
    }

    pub fn pending_deposit(&self, wallet: &Wallet) -> Pip {
        self.ledger.pending_deposit(wallet)
    }

    pub fn exit_fund_position_opened_at(&self) -> Option<BlockNumber> {
        self.exit_fund_position_opened_at
    }

    /// Margin view with outstanding funding settled first, as the next operation would see it.
    pub fn margin_summary(
        &self,
        wallet: &Wallet,
        source: PriceSource<'_>,
    ) -> Result<MarginSummary, EngineError> {
        let mut staged = self.ledger.staged();
        self.stage_funding(&mut staged, wallet)?;
        Ok(MarginCalculator::new(&self.markets, &staged).summary(wallet, source)?)
    }

    pub fn recent_events(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    // 8.1.1: role checks

    pub fn role(&self, role: Role) -> Wallet {
        self.config.wallets.get(role)
    }

    pub(super) fn require_role(&self, caller: &Wallet, role: Role) -> Result<(), EngineError> {
        if *caller != self.config.wallets.get(role) {
            return Err(EngineError::Unauthorized {
                caller: *caller,
                required: role,
            });
        }
        Ok(())
    }

    pub fn set_dispatcher(&mut self, caller: &Wallet, wallet: Wallet) -> Result<(), EngineError> {
        self.rotate_role(caller, Role::Dispatcher, wallet)
    }

    pub fn set_fee_wallet(&mut self, caller: &Wallet, wallet: Wallet) -> Result<(), EngineError> {
        self.rotate_role(caller, Role::FeeWallet, wallet)
    }

    pub fn set_insurance_fund(&mut self, caller: &Wallet, wallet: Wallet) -> Result<(), EngineError> {
        self.rotate_role(caller, Role::InsuranceFund, wallet)
    }

    pub fn set_exit_fund(&mut self, caller: &Wallet, wallet: Wallet) -> Result<(), EngineError> {
        self.rotate_role(caller, Role::ExitFund, wallet)
    }

    fn rotate_role(&mut self, caller: &Wallet, role: Role, wallet: Wallet) -> Result<(), EngineError> {
        self.require_role(caller, Role::Governance)?;
        let previous = self.config.wallets.get(role);
        if previous == wallet {
            return Err(EngineError::RoleUnchanged { role, wallet });
        }
        if let Some(held_by) = self.config.wallets.role_of(&wallet) {
            return Err(EngineError::RoleConflict { wallet, held_by });
        }
        if wallet.is_zero() {
            return Err(ConfigError::InvalidWallets {
                reason: format!("{role:?} cannot be the zero wallet"),
            }
            .into());
        }
        // positions would be stranded on the old wallet
        if role == Role::ExitFund && self.exit_fund_position_opened_at.is_some() {
            return Err(EngineError::ExitFundHasOpenPositions);
        }

        self.config.wallets.set(role, wallet);
        info!(role = ?role, previous = %previous, current = %wallet, "role rotated");
        self.emit_event(EventPayload::RoleRotated(RoleRotatedEvent {
            role,
            previous,
            current: wallet,
        }));
        Ok(())
    }

    // 8.1.2: shared checks over a staged ledger

    pub(super) fn calculator<'a>(&'a self, view: &'a dyn BalanceView) -> MarginCalculator<'a> {
        MarginCalculator::new(&self.markets, view)
    }

    pub(super) fn ensure_initial_margin(
        &self,
        staged: &StagedLedger<'_>,
        wallet: &Wallet,
    ) -> Result<(), EngineError> {
        let summary = self.calculator(staged).summary(wallet, PriceSource::Index)?;
        if !summary.meets_initial() {
            return Err(EngineError::InitialMarginNotMet {
                wallet: *wallet,
                account_value: summary.total_account_value,
                requirement: summary.initial_requirement,
            });
        }
        Ok(())
    }

    pub(super) fn ensure_maintenance_margin(
        &self,
        staged: &StagedLedger<'_>,
        wallet: &Wallet,
    ) -> Result<(), EngineError> {
        let summary = self.calculator(staged).summary(wallet, PriceSource::Index)?;
        if !summary.meets_maintenance() {
            return Err(EngineError::MaintenanceMarginNotMet {
                wallet: *wallet,
                account_value: summary.total_account_value,
                requirement: summary.maintenance_requirement,
            });
        }
        Ok(())
    }

    pub(super) fn ensure_not_exited(&self, wallet: &Wallet) -> Result<(), EngineError> {
        if self.exits.is_exited(wallet) {
            return Err(EngineError::WalletExited(*wallet));
        }
        Ok(())
    }

    pub(super) fn has_open_positions(&self, view: &dyn BalanceView, wallet: &Wallet) -> bool {
        self.markets
            .markets()
            .any(|market| !view.balance_of(wallet, &market.base_asset_symbol).is_flat())
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(
            EventId(self.next_event_id),
            self.current_block,
            self.current_time,
            payload,
        );
        self.next_event_id += 1;
        debug!(id = event.id.0, payload = ?event.payload, "event");

        self.events.push(event);

        if self.events.len() > self.engine_config.max_events {
            let drain_count = self.events.len() - self.engine_config.max_events;
            self.events.drain(0..drain_count);
        }
    }
}
