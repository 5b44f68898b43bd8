// 12.0 config.rs: all exchange settings in one place. privileged wallets, finality
// windows, price freshness, fee and funding caps, residue tolerances.
// 12.1 PrivilegedWallets holds the singleton roles. rotation goes through the engine.

use serde::{Deserialize, Serialize};

use crate::market::MarketFieldBounds;
use crate::types::{Pip, Wallet, PIP_SCALE};
use crate::units::MAX_ASSET_DECIMALS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Dispatcher,
    FeeWallet,
    InsuranceFund,
    ExitFund,
    Governance,
}

// Singleton wallets, each holding exactly one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivilegedWallets {
    // Submits trades, liquidations and other operator requests
    pub dispatcher: Wallet,
    // Receives trade, withdrawal and transfer fees
    pub fee_wallet: Wallet,
    // Absorbs positions from ordinary liquidations
    pub insurance_fund: Wallet,
    // Absorbs positions from exited wallets
    pub exit_fund: Wallet,
    // Sole caller for risk parameters and role rotation
    pub governance: Wallet,
}

impl PrivilegedWallets {
    pub fn get(&self, role: Role) -> Wallet {
        match role {
            Role::Dispatcher => self.dispatcher,
            Role::FeeWallet => self.fee_wallet,
            Role::InsuranceFund => self.insurance_fund,
            Role::ExitFund => self.exit_fund,
            Role::Governance => self.governance,
        }
    }

    pub(crate) fn set(&mut self, role: Role, wallet: Wallet) {
        match role {
            Role::Dispatcher => self.dispatcher = wallet,
            Role::FeeWallet => self.fee_wallet = wallet,
            Role::InsuranceFund => self.insurance_fund = wallet,
            Role::ExitFund => self.exit_fund = wallet,
            Role::Governance => self.governance = wallet,
        }
    }

    pub fn all(&self) -> [(Role, Wallet); 5] {
        [
            (Role::Dispatcher, self.dispatcher),
            (Role::FeeWallet, self.fee_wallet),
            (Role::InsuranceFund, self.insurance_fund),
            (Role::ExitFund, self.exit_fund),
            (Role::Governance, self.governance),
        ]
    }

    pub fn role_of(&self, wallet: &Wallet) -> Option<Role> {
        self.all()
            .into_iter()
            .find(|(_, held)| held == wallet)
            .map(|(role, _)| role)
    }
}

/** 7.2: the complete exchange configuration */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    // Collateral asset; every market settles in it
    pub quote_asset_symbol: String,
    pub quote_asset_decimals: u8,
    pub wallets: PrivilegedWallets,
    // Blocks before nonce invalidations and exits become final
    pub chain_propagation_period_blocks: u64,
    // How long a delegated key stays valid after its grant nonce
    pub delegate_key_expiration_period_ms: u64,
    // Feed adapter keys allowed to sign index prices
    pub index_price_signers: Vec<Wallet>,
    pub max_index_price_age_ms: u64,
    pub max_index_price_future_ms: u64,
    // Minimum spacing between published funding rates
    pub funding_period_ms: u64,
    // Absolute cap on a single period's funding rate
    pub max_funding_rate: Pip,
    // Cap on any single fee, as a fraction of the quote quantity
    pub max_fee_rate: Pip,
    pub max_number_of_markets: usize,
    // Slack allowed between dispatcher and computed liquidation quotes
    pub liquidation_quote_tolerance: Pip,
    // Negative quote left after an exit that the exit fund absorbs
    pub exit_quote_tolerance: Pip,
    pub market_bounds: MarketFieldBounds,
}

impl ExchangeConfig {
    pub fn new(quote_asset_symbol: &str, quote_asset_decimals: u8, wallets: PrivilegedWallets) -> Self {
        Self {
            quote_asset_symbol: quote_asset_symbol.to_string(),
            quote_asset_decimals,
            wallets,
            chain_propagation_period_blocks: 5_760, // ~1 day at 15s blocks
            delegate_key_expiration_period_ms: 365 * 24 * 60 * 60 * 1000,
            index_price_signers: Vec::new(),
            max_index_price_age_ms: 5 * 60 * 1000,
            max_index_price_future_ms: 60 * 1000,
            funding_period_ms: 8 * 60 * 60 * 1000,
            max_funding_rate: Pip::from_raw(PIP_SCALE / 100), // 1%
            max_fee_rate: Pip::from_raw(PIP_SCALE / 50), // 2%
            max_number_of_markets: 64,
            liquidation_quote_tolerance: Pip::from_raw(1),
            exit_quote_tolerance: Pip::from_raw(100),
            market_bounds: MarketFieldBounds::default(),
        }
    }

    // Short windows so scenarios do not have to advance thousands of blocks
    pub fn testnet(quote_asset_symbol: &str, quote_asset_decimals: u8, wallets: PrivilegedWallets) -> Self {
        Self {
            chain_propagation_period_blocks: 10,
            funding_period_ms: 60 * 60 * 1000,
            max_number_of_markets: 16,
            ..Self::new(quote_asset_symbol, quote_asset_decimals, wallets)
        }
    }

    pub fn with_index_price_signer(mut self, signer: Wallet) -> Self {
        if !self.index_price_signers.contains(&signer) {
            self.index_price_signers.push(signer);
        }
        self
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quote_asset_symbol.trim().is_empty() {
            return Err(ConfigError::InvalidQuoteAsset {
                reason: "symbol is empty".to_string(),
            });
        }
        if self.quote_asset_decimals > MAX_ASSET_DECIMALS {
            return Err(ConfigError::InvalidQuoteAsset {
                reason: format!("{} decimals exceeds {}", self.quote_asset_decimals, MAX_ASSET_DECIMALS),
            });
        }

        // role checks
        let roles = self.wallets.all();
        for (i, (role, wallet)) in roles.iter().enumerate() {
            if wallet.is_zero() {
                return Err(ConfigError::InvalidWallets {
                    reason: format!("{role:?} is the zero wallet"),
                });
            }
            if let Some((other, _)) = roles[i + 1..].iter().find(|(_, held)| held == wallet) {
                return Err(ConfigError::InvalidWallets {
                    reason: format!("{role:?} and {other:?} share wallet {wallet}"),
                });
            }
        }

        // fee and funding caps
        if !self.max_fee_rate.is_positive() || self.max_fee_rate > Pip::ONE {
            return Err(ConfigError::InvalidFees {
                reason: format!("max fee rate {} outside (0, 1]", self.max_fee_rate),
            });
        }
        if self.max_funding_rate.is_negative() || self.max_funding_rate > Pip::ONE {
            return Err(ConfigError::InvalidFunding {
                reason: format!("max funding rate {} outside [0, 1]", self.max_funding_rate),
            });
        }
        if self.funding_period_ms == 0 {
            return Err(ConfigError::InvalidFunding {
                reason: "funding period must be positive".to_string(),
            });
        }

        if self.max_number_of_markets == 0 {
            return Err(ConfigError::InvalidMarkets {
                reason: "market cap must be positive".to_string(),
            });
        }
        let bounds = &self.market_bounds;
        if bounds.min_maintenance_margin_fraction > bounds.min_initial_margin_fraction
            || bounds.min_initial_margin_fraction > bounds.max_fraction
            || !bounds.max_position_size.is_positive()
        {
            return Err(ConfigError::InvalidMarkets {
                reason: "market field bounds are inconsistent".to_string(),
            });
        }

        if self.liquidation_quote_tolerance.is_negative() || self.exit_quote_tolerance.is_negative() {
            return Err(ConfigError::InvalidTolerance);
        }
        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid quote asset: {reason}")]
    InvalidQuoteAsset { reason: String },

    #[error("Invalid privileged wallets: {reason}")]
    InvalidWallets { reason: String },

    #[error("Invalid fees: {reason}")]
    InvalidFees { reason: String },

    #[error("Invalid funding: {reason}")]
    InvalidFunding { reason: String },

    #[error("Invalid markets: {reason}")]
    InvalidMarkets { reason: String },

    #[error("Tolerances cannot be negative")]
    InvalidTolerance,

    #[error("Event log must retain at least one event")]
    InvalidEventLog,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallets() -> PrivilegedWallets {
        PrivilegedWallets {
            dispatcher: Wallet([1; 20]),
            fee_wallet: Wallet([2; 20]),
            insurance_fund: Wallet([3; 20]),
            exit_fund: Wallet([4; 20]),
            governance: Wallet([5; 20]),
        }
    }

    #[test]
    fn test_default_config_valid() {
        assert!(ExchangeConfig::new("USD", 6, wallets()).validate().is_ok());
    }

    #[test]
    fn test_testnet_config_valid() {
        let config = ExchangeConfig::testnet("USD", 8, wallets());
        assert!(config.validate().is_ok());
        assert_eq!(config.chain_propagation_period_blocks, 10);
        assert_eq!(config.exit_quote_tolerance, Pip::from_raw(100));
    }

    #[test]
    fn test_shared_wallet_rejected() {
        let mut shared = wallets();
        shared.exit_fund = shared.insurance_fund;
        let result = ExchangeConfig::new("USD", 6, shared).validate();
        assert!(matches!(result, Err(ConfigError::InvalidWallets { .. })));
    }

    #[test]
    fn test_invalid_decimals_and_fees() {
        let mut config = ExchangeConfig::new("USD", 33, wallets());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidQuoteAsset { .. })));

        config.quote_asset_decimals = 6;
        config.max_fee_rate = Pip::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidFees { .. })));
    }

    #[test]
    fn test_role_lookup() {
        let wallets = wallets();
        assert_eq!(wallets.role_of(&Wallet([4; 20])), Some(Role::ExitFund));
        assert_eq!(wallets.role_of(&Wallet([9; 20])), None);
        assert_eq!(wallets.get(Role::Governance), Wallet([5; 20]));
    }

    #[test]
    fn test_config_serialization() {
        let config = ExchangeConfig::testnet("USD", 8, wallets()).with_index_price_signer(Wallet([7; 20]));
        let json = serde_json::to_string(&config).unwrap();
        let back: ExchangeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
