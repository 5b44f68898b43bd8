// 10.0: wallet exit state. a wallet that exits stops trading immediately and can
// pull its remaining value once the exit has propagated for the finality window.

use crate::types::{BlockNumber, Wallet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletExit {
    pub exited_at: BlockNumber,
    pub effective_block: BlockNumber,
}

impl WalletExit {
    pub fn is_finalized(&self, current_block: BlockNumber) -> bool {
        current_block >= self.effective_block
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExitError {
    #[error("Wallet {0} already exited")]
    WalletAlreadyExited(Wallet),

    #[error("Wallet {0} has not exited")]
    WalletNotExited(Wallet),

    #[error("Exit for {wallet} not final until block {effective_block} (current {current_block})")]
    ExitNotFinalized {
        wallet: Wallet,
        effective_block: BlockNumber,
        current_block: BlockNumber,
    },
}

#[derive(Debug, Clone, Default)]
pub struct WalletExits {
    exits: HashMap<Wallet, WalletExit>,
}

impl WalletExits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, wallet: &Wallet) -> Option<&WalletExit> {
        self.exits.get(wallet)
    }

    pub fn is_exited(&self, wallet: &Wallet) -> bool {
        self.exits.contains_key(wallet)
    }

    pub fn ensure_not_exited(&self, wallet: &Wallet) -> Result<(), ExitError> {
        if self.is_exited(wallet) {
            return Err(ExitError::WalletAlreadyExited(*wallet));
        }
        Ok(())
    }

    pub fn exit(
        &mut self,
        wallet: Wallet,
        current_block: BlockNumber,
        propagation_delay_blocks: u64,
    ) -> Result<WalletExit, ExitError> {
        self.ensure_not_exited(&wallet)?;
        let exit = WalletExit {
            exited_at: current_block,
            effective_block: current_block.plus(propagation_delay_blocks),
        };
        self.exits.insert(wallet, exit);
        Ok(exit)
    }

    pub fn finalized(&self, wallet: &Wallet, current_block: BlockNumber) -> Result<WalletExit, ExitError> {
        let exit = *self
            .exits
            .get(wallet)
            .ok_or(ExitError::WalletNotExited(*wallet))?;
        if !exit.is_finalized(current_block) {
            return Err(ExitError::ExitNotFinalized {
                wallet: *wallet,
                effective_block: exit.effective_block,
                current_block,
            });
        }
        Ok(exit)
    }

    pub fn clear(&mut self, wallet: &Wallet, current_block: BlockNumber) -> Result<WalletExit, ExitError> {
        let exit = self.finalized(wallet, current_block)?;
        self.exits.remove(wallet);
        Ok(exit)
    }
}
