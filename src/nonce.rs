// 3.0: replay protection. each wallet can invalidate every nonce up to a timestamp.
// invalidations chain: the next one is only accepted once the previous one is final.

use crate::types::{BlockNumber, Nonce, Timestamp, Wallet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Clock-skew tolerance for nonce timestamps.
pub const MAX_NONCE_FUTURE_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceInvalidation {
    pub timestamp_ms: u64,
    pub effective_block: BlockNumber,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NonceError {
    #[error("Nonce {0} is not a time-ordered (v1) uuid")]
    WrongNonceVersion(Nonce),

    #[error("Nonce timestamp {timestamp_ms} beyond limit {limit_ms}")]
    NonceTimestampTooHigh { timestamp_ms: u64, limit_ms: u64 },

    #[error("Nonce timestamp {timestamp_ms} already invalidated through {invalidated_through_ms}")]
    NonceTimestampInvalidated {
        timestamp_ms: u64,
        invalidated_through_ms: u64,
    },

    #[error("Prior invalidation not final until block {effective_block} (current {current_block})")]
    PriorInvalidationNotFinalized {
        effective_block: BlockNumber,
        current_block: BlockNumber,
    },
}

pub(crate) fn nonce_timestamp(nonce: &Nonce) -> Result<u64, NonceError> {
    nonce
        .timestamp_ms()
        .ok_or(NonceError::WrongNonceVersion(*nonce))
}

#[derive(Debug, Clone, Default)]
pub struct NonceGuard {
    invalidations: HashMap<Wallet, NonceInvalidation>,
}

impl NonceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_invalidation(&self, wallet: &Wallet) -> Option<&NonceInvalidation> {
        self.invalidations.get(wallet)
    }

    // 3.1: all checks run before the record is touched
    pub fn invalidate(
        &mut self,
        wallet: Wallet,
        nonce: &Nonce,
        now: Timestamp,
        current_block: BlockNumber,
        propagation_delay_blocks: u64,
    ) -> Result<NonceInvalidation, NonceError> {
        let timestamp_ms = nonce_timestamp(nonce)?;

        let limit_ms = u64::try_from(now.as_millis())
            .unwrap_or(0)
            .saturating_add(MAX_NONCE_FUTURE_MS);
        if timestamp_ms > limit_ms {
            return Err(NonceError::NonceTimestampTooHigh {
                timestamp_ms,
                limit_ms,
            });
        }

        if let Some(previous) = self.invalidations.get(&wallet) {
            if timestamp_ms <= previous.timestamp_ms {
                return Err(NonceError::NonceTimestampInvalidated {
                    timestamp_ms,
                    invalidated_through_ms: previous.timestamp_ms,
                });
            }
            if current_block < previous.effective_block {
                return Err(NonceError::PriorInvalidationNotFinalized {
                    effective_block: previous.effective_block,
                    current_block,
                });
            }
        }

        let invalidation = NonceInvalidation {
            timestamp_ms,
            effective_block: current_block.plus(propagation_delay_blocks),
        };
        self.invalidations.insert(wallet, invalidation);
        Ok(invalidation)
    }

    /// Rejects anything that is not v1 or falls at or before the wallet's cutoff.
    pub fn validate_nonce(&self, wallet: &Wallet, nonce: &Nonce) -> Result<u64, NonceError> {
        let timestamp_ms = nonce_timestamp(nonce)?;
        if let Some(invalidation) = self.invalidations.get(wallet) {
            if timestamp_ms <= invalidation.timestamp_ms {
                return Err(NonceError::NonceTimestampInvalidated {
                    timestamp_ms,
                    invalidated_through_ms: invalidation.timestamp_ms,
                });
            }
        }
        Ok(timestamp_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const NODE: [u8; 6] = [9, 9, 9, 9, 9, 9];
    const NOW_MS: i64 = 1_700_000_000_000;

    fn wallet() -> Wallet {
        Wallet([1u8; 20])
    }

    fn nonce_at(ms: u64) -> Nonce {
        Nonce::from_timestamp_ms(ms, &NODE)
    }

    #[test]
    fn invalidation_sets_effective_block() {
        let mut guard = NonceGuard::new();
        let record = guard
            .invalidate(
                wallet(),
                &nonce_at(NOW_MS as u64),
                Timestamp::from_millis(NOW_MS),
                BlockNumber(100),
                10,
            )
            .unwrap();

        assert_eq!(record.timestamp_ms, NOW_MS as u64);
        assert_eq!(record.effective_block, BlockNumber(110));
    }

    #[test]
    fn same_timestamp_twice_fails() {
        let mut guard = NonceGuard::new();
        let nonce = nonce_at(NOW_MS as u64);
        let now = Timestamp::from_millis(NOW_MS);
        guard.invalidate(wallet(), &nonce, now, BlockNumber(1), 0).unwrap();

        let result = guard.invalidate(wallet(), &nonce, now, BlockNumber(50), 0);
        assert!(matches!(
            result,
            Err(NonceError::NonceTimestampInvalidated { .. })
        ));
    }

    #[test]
    fn second_invalidation_waits_for_finality() {
        let mut guard = NonceGuard::new();
        let now = Timestamp::from_millis(NOW_MS);
        guard
            .invalidate(wallet(), &nonce_at(NOW_MS as u64 - 1000), now, BlockNumber(1), 5)
            .unwrap();

        let early = guard.invalidate(wallet(), &nonce_at(NOW_MS as u64), now, BlockNumber(3), 5);
        assert!(matches!(
            early,
            Err(NonceError::PriorInvalidationNotFinalized { .. })
        ));

        let on_time = guard.invalidate(wallet(), &nonce_at(NOW_MS as u64), now, BlockNumber(6), 5);
        assert!(on_time.is_ok());
    }

    #[test]
    fn v4_nonce_rejected() {
        let mut guard = NonceGuard::new();
        let result = guard.invalidate(
            wallet(),
            &Nonce::new(Uuid::new_v4()),
            Timestamp::from_millis(NOW_MS),
            BlockNumber(1),
            0,
        );
        assert!(matches!(result, Err(NonceError::WrongNonceVersion(_))));
    }

    #[test]
    fn far_future_nonce_rejected() {
        let mut guard = NonceGuard::new();
        let two_days = 2 * MAX_NONCE_FUTURE_MS;
        let result = guard.invalidate(
            wallet(),
            &nonce_at(NOW_MS as u64 + two_days),
            Timestamp::from_millis(NOW_MS),
            BlockNumber(1),
            0,
        );
        assert!(matches!(result, Err(NonceError::NonceTimestampTooHigh { .. })));
    }

    #[test]
    fn validate_respects_cutoff() {
        let mut guard = NonceGuard::new();
        let now = Timestamp::from_millis(NOW_MS);
        guard
            .invalidate(wallet(), &nonce_at(NOW_MS as u64), now, BlockNumber(1), 0)
            .unwrap();

        assert!(guard.validate_nonce(&wallet(), &nonce_at(NOW_MS as u64 - 1)).is_err());
        assert!(guard.validate_nonce(&wallet(), &nonce_at(NOW_MS as u64)).is_err());
        assert_eq!(
            guard.validate_nonce(&wallet(), &nonce_at(NOW_MS as u64 + 1)),
            Ok(NOW_MS as u64 + 1)
        );
        // other wallets unaffected
        assert!(guard
            .validate_nonce(&Wallet([2u8; 20]), &nonce_at(NOW_MS as u64 - 1))
            .is_ok());
    }
}
