// 8.3 engine/transfers.rs: deposits, withdrawals and wallet-to-wallet transfers.
// 8.3.1 deposits land in pending first. the dispatcher applies them once the
// asset transfer is confirmed.
// 8.3.2 withdrawals and transfers are signed requests, replay-checked by hash.

use super::core::Engine;
use super::results::{EngineError, WithdrawalResult};
use crate::config::Role;
use crate::custody::{SignedTransfer, SignedWithdrawal};
use crate::events::{
    DepositAppliedEvent, DepositRecordedEvent, EventPayload, FundingAppliedEvent, TransferredEvent,
    WithdrawnEvent,
};
use crate::ledger::BalanceChanges;
use crate::signature::{verify_authorization, verify_signature, SignatureError};
use crate::types::{Pip, Wallet};
use crate::units::{asset_units_to_pips, pips_to_asset_units};
use tracing::{info, warn};

struct StagedWithdrawal {
    changes: BalanceChanges,
    funding: Vec<FundingAppliedEvent>,
    asset_units: u128,
    new_balance: Pip,
}

impl Engine {
    // 8.3.1: record a confirmed on-chain deposit of `asset_units` as pending
    pub fn deposit(&mut self, wallet: &Wallet, asset_units: u128) -> Result<Pip, EngineError> {
        self.ensure_not_exited(wallet)?;
        let raw = asset_units_to_pips(asset_units, self.config.quote_asset_decimals)?;
        let quantity = Pip::from_unsigned(raw)?;
        if quantity.is_zero() {
            return Err(EngineError::InvalidQuantity(quantity));
        }

        let record = self.ledger.record_pending_deposit(
            *wallet,
            &self.config.quote_asset_symbol,
            quantity,
            self.migration.as_deref(),
        )?;

        info!(wallet = %wallet, quantity = %quantity, pending = %record.pending, "deposit recorded");
        self.emit_event(EventPayload::DepositRecorded(DepositRecordedEvent {
            wallet: *wallet,
            asset_units,
            quantity,
            pending: record.pending,
            migrated: record.migrated,
        }));
        Ok(record.pending)
    }

    pub fn apply_pending_deposit(
        &mut self,
        caller: &Wallet,
        wallet: &Wallet,
        quantity: Pip,
    ) -> Result<Pip, EngineError> {
        self.require_role(caller, Role::Dispatcher)?;
        let new_balance =
            self.ledger
                .apply_pending_deposit(*wallet, &self.config.quote_asset_symbol, quantity)?;

        info!(wallet = %wallet, quantity = %quantity, balance = %new_balance, "deposit applied");
        self.emit_event(EventPayload::DepositApplied(DepositAppliedEvent {
            wallet: *wallet,
            quantity,
            new_balance,
        }));
        Ok(new_balance)
    }

    // 8.3.2: the gas fee comes out of the withdrawn quantity
    pub fn withdraw(
        &mut self,
        caller: &Wallet,
        signed: &SignedWithdrawal,
    ) -> Result<WithdrawalResult, EngineError> {
        self.require_role(caller, Role::Dispatcher)?;
        let withdrawal = &signed.withdrawal;
        let hash = withdrawal.hash();

        let staged = match self.stage_withdrawal(signed, &hash) {
            Ok(staged) => staged,
            Err(err) => {
                warn!(
                    wallet = %withdrawal.wallet,
                    quantity = %withdrawal.quantity,
                    kind = ?err.kind(),
                    error = %err,
                    "withdrawal rejected"
                );
                return Err(err);
            }
        };

        self.ledger.commit(staged.changes);
        self.processed.insert(hash);
        self.emit_funding(staged.funding);

        info!(
            wallet = %withdrawal.wallet,
            quantity = %withdrawal.quantity,
            gas_fee = %withdrawal.gas_fee,
            "withdrawal applied"
        );
        self.emit_event(EventPayload::Withdrawn(WithdrawnEvent {
            wallet: withdrawal.wallet,
            quantity: withdrawal.quantity,
            gas_fee: withdrawal.gas_fee,
            asset_units: staged.asset_units,
            new_balance: staged.new_balance,
        }));
        Ok(WithdrawalResult {
            wallet: withdrawal.wallet,
            quantity: withdrawal.quantity,
            gas_fee: withdrawal.gas_fee,
            asset_units: staged.asset_units,
        })
    }

    fn stage_withdrawal(
        &self,
        signed: &SignedWithdrawal,
        hash: &[u8; 32],
    ) -> Result<StagedWithdrawal, EngineError> {
        let withdrawal = &signed.withdrawal;
        let wallet = withdrawal.wallet;
        self.check_request_fee(withdrawal.quantity, withdrawal.gas_fee)?;
        self.ensure_not_exited(&wallet)?;
        self.nonces.validate_nonce(&wallet, &withdrawal.nonce)?;
        if self.processed.contains(hash) {
            return Err(EngineError::DuplicateRequest);
        }
        if !verify_signature(hash, &signed.signature, &wallet) {
            return Err(SignatureError::InvalidSignature { expected: wallet }.into());
        }

        let quote = self.config.quote_asset_symbol.as_str();
        let mut staged = self.ledger.staged();
        let funding = self.stage_funding(&mut staged, &wallet)?;
        let new_balance = staged.adjust(wallet, quote, withdrawal.quantity.checked_neg()?)?;
        staged.adjust(self.config.wallets.fee_wallet, quote, withdrawal.gas_fee)?;
        self.ensure_initial_margin(&staged, &wallet)?;

        let net = withdrawal.quantity.checked_sub(withdrawal.gas_fee)?;
        let asset_units = pips_to_asset_units(net.to_unsigned()?, self.config.quote_asset_decimals)?;
        Ok(StagedWithdrawal {
            changes: staged.into_changes(),
            funding,
            asset_units,
            new_balance,
        })
    }

    // 8.3.3: the destination receives the quantity net of the gas fee
    pub fn transfer(&mut self, caller: &Wallet, signed: &SignedTransfer) -> Result<(), EngineError> {
        self.require_role(caller, Role::Dispatcher)?;
        let transfer = &signed.transfer;
        let (source, destination) = (transfer.source, transfer.destination);

        self.check_request_fee(transfer.quantity, transfer.gas_fee)?;
        if destination == source
            || destination.is_zero()
            || destination == self.config.wallets.exit_fund
        {
            return Err(EngineError::InvalidTransferDestination(destination));
        }
        self.ensure_not_exited(&source)?;
        self.ensure_not_exited(&destination)?;
        self.nonces.validate_nonce(&source, &transfer.nonce)?;

        let hash = transfer.hash();
        if self.processed.contains(&hash) {
            return Err(EngineError::DuplicateRequest);
        }
        verify_authorization(
            &source,
            &hash,
            &transfer.nonce,
            &signed.authorization,
            self.config.delegate_key_expiration_period_ms,
        )?;

        let quote = self.config.quote_asset_symbol.as_str();
        let mut staged = self.ledger.staged();
        let mut funding = self.stage_funding(&mut staged, &source)?;
        funding.extend(self.stage_funding(&mut staged, &destination)?);
        staged.adjust(source, quote, transfer.quantity.checked_neg()?)?;
        staged.adjust(destination, quote, transfer.quantity.checked_sub(transfer.gas_fee)?)?;
        staged.adjust(self.config.wallets.fee_wallet, quote, transfer.gas_fee)?;
        self.ensure_initial_margin(&staged, &source)?;

        let changes = staged.into_changes();
        self.ledger.commit(changes);
        self.processed.insert(hash);
        self.emit_funding(funding);

        info!(
            source = %source,
            destination = %destination,
            quantity = %transfer.quantity,
            "transfer applied"
        );
        self.emit_event(EventPayload::Transferred(TransferredEvent {
            source,
            destination,
            quantity: transfer.quantity,
            gas_fee: transfer.gas_fee,
        }));
        Ok(())
    }

    fn check_request_fee(&self, quantity: Pip, gas_fee: Pip) -> Result<(), EngineError> {
        if !quantity.is_positive() {
            return Err(EngineError::InvalidQuantity(quantity));
        }
        let maximum = quantity.multiply(self.config.max_fee_rate)?;
        if gas_fee.is_negative() || gas_fee > maximum {
            return Err(EngineError::InvalidGasFee {
                fee: gas_fee,
                maximum,
            });
        }
        Ok(())
    }
}
