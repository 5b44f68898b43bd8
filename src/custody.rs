// 9.2 custody.rs: signed withdrawal and transfer requests.
// token movement itself happens outside the ledger. the engine records the pip
// change and reports the asset-unit amount for the transfer collaborator.

use crate::signature::{Authorization, PayloadEncoder, WalletSignature, TRANSFER_TAG, WITHDRAWAL_TAG};
use crate::types::{Nonce, Pip, Wallet};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// Withdrawal of quote collateral out of the exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub wallet: Wallet,
    pub nonce: Nonce,
    pub quantity: Pip,
    // Set by the dispatcher, outside the signed payload
    pub gas_fee: Pip,
}

impl Withdrawal {
    pub fn hash(&self) -> [u8; 32] {
        PayloadEncoder::new(WITHDRAWAL_TAG)
            .wallet(&self.wallet)
            .nonce(&self.nonce)
            .pip(self.quantity)
            .finish()
    }
}

// Withdrawals are only ever signed by the wallet itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedWithdrawal {
    pub withdrawal: Withdrawal,
    pub signature: WalletSignature,
}

// Quote transfer between two wallets on the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub source: Wallet,
    pub destination: Wallet,
    pub nonce: Nonce,
    pub quantity: Pip,
    pub gas_fee: Pip,
}

impl Transfer {
    pub fn hash(&self) -> [u8; 32] {
        PayloadEncoder::new(TRANSFER_TAG)
            .wallet(&self.source)
            .wallet(&self.destination)
            .nonce(&self.nonce)
            .pip(self.quantity)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransfer {
    pub transfer: Transfer,
    pub authorization: Authorization,
}

/// Hashes of withdrawals and transfers already applied.
#[derive(Debug, Clone, Default)]
pub struct ProcessedRequests {
    hashes: HashSet<[u8; 32]>,
}

impl ProcessedRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, hash: &[u8; 32]) -> bool {
        self.hashes.contains(hash)
    }

    pub fn insert(&mut self, hash: [u8; 32]) -> bool {
        self.hashes.insert(hash)
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nonce(ms: u64) -> Nonce {
        Nonce::from_timestamp_ms(ms, &[2; 6])
    }

    #[test]
    fn withdrawal_and_transfer_hashes_differ() {
        let wallet = Wallet([5; 20]);
        let withdrawal = Withdrawal {
            wallet,
            nonce: nonce(1),
            quantity: Pip::ONE,
            gas_fee: Pip::ZERO,
        };
        let transfer = Transfer {
            source: wallet,
            destination: wallet,
            nonce: nonce(1),
            quantity: Pip::ONE,
            gas_fee: Pip::ZERO,
        };
        assert_ne!(withdrawal.hash(), transfer.hash());

        let later = Withdrawal {
            nonce: nonce(2),
            ..withdrawal.clone()
        };
        assert_ne!(withdrawal.hash(), later.hash());
    }

    #[test]
    fn processed_requests_reject_duplicates() {
        let mut processed = ProcessedRequests::new();
        assert!(processed.insert([1; 32]));
        assert!(!processed.insert([1; 32]));
        assert!(processed.contains(&[1; 32]));
        assert_eq!(processed.len(), 1);
    }
}
