//! Wallet-initiated nonce invalidation.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{EventPayload, NonceInvalidatedEvent};
use crate::nonce::NonceInvalidation;
use crate::types::{Nonce, Wallet};
use tracing::info;

impl Engine {
    /// Cancel every order and transfer of `wallet` stamped at or before `nonce`.
    pub fn invalidate_nonce(&mut self, wallet: &Wallet, nonce: &Nonce) -> Result<NonceInvalidation, EngineError> {
        let invalidation = self.nonces.invalidate(
            *wallet,
            nonce,
            self.current_time,
            self.current_block,
            self.config.chain_propagation_period_blocks,
        )?;

        info!(
            wallet = %wallet,
            timestamp_ms = invalidation.timestamp_ms,
            effective_block = %invalidation.effective_block,
            "nonce invalidated"
        );
        self.emit_event(EventPayload::NonceInvalidated(NonceInvalidatedEvent {
            wallet: *wallet,
            timestamp_ms: invalidation.timestamp_ms,
            effective_block: invalidation.effective_block,
        }));
        Ok(invalidation)
    }
}
