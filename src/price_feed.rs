// 9.3 price_feed.rs: signed index prices
//
// Index prices arrive from off-ledger feed adapters through the dispatcher.
// Each price is signed by the adapter key. The engine only checks the output
// contract: a whitelisted signer, a positive price, and a timestamp that is
// newer than the last one and inside the freshness window.

use crate::signature::{recover_signer, PayloadEncoder, SignatureError, WalletKey, WalletSignature, INDEX_PRICE_TAG};
use crate::types::{Pip, Timestamp, Wallet};
use serde::{Deserialize, Serialize};

/// A signed index price for one market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPrice {
    pub base_symbol: String,
    pub timestamp: Timestamp,
    pub price: Pip,
    pub signature: WalletSignature,
}

impl IndexPrice {
    pub fn hash(base_symbol: &str, timestamp: Timestamp, price: Pip) -> [u8; 32] {
        PayloadEncoder::new(INDEX_PRICE_TAG)
            .str(base_symbol)
            .u64(timestamp.as_millis().max(0) as u64)
            .pip(price)
            .finish()
    }

    pub fn sign(
        signer: &WalletKey,
        base_symbol: &str,
        timestamp: Timestamp,
        price: Pip,
    ) -> Result<Self, SignatureError> {
        let signature = signer.sign(&Self::hash(base_symbol, timestamp, price))?;
        Ok(Self {
            base_symbol: base_symbol.to_string(),
            timestamp,
            price,
            signature,
        })
    }

    pub fn signer(&self) -> Result<Wallet, SignatureError> {
        recover_signer(
            &Self::hash(&self.base_symbol, self.timestamp, self.price),
            &self.signature,
        )
    }
}

/// Freshness window applied to every published price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessWindow {
    /// Oldest acceptable price, relative to now
    pub max_age_ms: u64,
    /// How far ahead of now a price may be stamped
    pub max_future_ms: u64,
}

/// Errors that can occur when accepting an index price
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceFeedError {
    #[error("Index price signer {0} is not whitelisted")]
    UntrustedSigner(Wallet),

    #[error("Index price must be positive, got {0}")]
    NonPositivePrice(Pip),

    #[error("Index price at {timestamp:?} not newer than {last:?}")]
    OutdatedPrice { timestamp: Timestamp, last: Timestamp },

    #[error("Index price at {timestamp:?} older than {oldest:?}")]
    StalePrice { timestamp: Timestamp, oldest: Timestamp },

    #[error("Index price at {timestamp:?} beyond {latest:?}")]
    FuturePrice { timestamp: Timestamp, latest: Timestamp },

    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
}

/// Returns the recovered signer when `price` is acceptable.
pub fn validate_index_price(
    price: &IndexPrice,
    whitelist: &[Wallet],
    last_timestamp: Timestamp,
    now: Timestamp,
    window: FreshnessWindow,
) -> Result<Wallet, PriceFeedError> {
    let signer = price.signer()?;
    if !whitelist.contains(&signer) {
        return Err(PriceFeedError::UntrustedSigner(signer));
    }
    if !price.price.is_positive() {
        return Err(PriceFeedError::NonPositivePrice(price.price));
    }
    if price.timestamp <= last_timestamp {
        return Err(PriceFeedError::OutdatedPrice {
            timestamp: price.timestamp,
            last: last_timestamp,
        });
    }

    let oldest = Timestamp::from_millis(now.as_millis().saturating_sub(window.max_age_ms as i64));
    if price.timestamp < oldest {
        return Err(PriceFeedError::StalePrice {
            timestamp: price.timestamp,
            oldest,
        });
    }
    let latest = now.plus_millis(window.max_future_ms);
    if price.timestamp > latest {
        return Err(PriceFeedError::FuturePrice {
            timestamp: price.timestamp,
            latest,
        });
    }
    Ok(signer)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: FreshnessWindow = FreshnessWindow {
        max_age_ms: 60_000,
        max_future_ms: 5_000,
    };

    fn adapter() -> WalletKey {
        WalletKey::from_seed("adapter").unwrap()
    }

    fn price_at(ms: i64) -> IndexPrice {
        IndexPrice::sign(&adapter(), "ETH", Timestamp(ms), Pip::from_whole(2000).unwrap()).unwrap()
    }

    #[test]
    fn accepts_fresh_whitelisted_price() {
        let whitelist = [adapter().wallet()];
        let signer = validate_index_price(&price_at(100_000), &whitelist, Timestamp(0), Timestamp(100_000), WINDOW);
        assert_eq!(signer, Ok(adapter().wallet()));
    }

    #[test]
    fn rejects_unknown_signer() {
        let result = validate_index_price(&price_at(100_000), &[], Timestamp(0), Timestamp(100_000), WINDOW);
        assert!(matches!(result, Err(PriceFeedError::UntrustedSigner(_))));
    }

    #[test]
    fn rejects_stale_future_and_outdated() {
        let whitelist = [adapter().wallet()];
        let now = Timestamp(100_000);
        assert!(matches!(
            validate_index_price(&price_at(30_000), &whitelist, Timestamp(0), now, WINDOW),
            Err(PriceFeedError::StalePrice { .. })
        ));
        assert!(matches!(
            validate_index_price(&price_at(106_000), &whitelist, Timestamp(0), now, WINDOW),
            Err(PriceFeedError::FuturePrice { .. })
        ));
        assert!(matches!(
            validate_index_price(&price_at(90_000), &whitelist, Timestamp(90_000), now, WINDOW),
            Err(PriceFeedError::OutdatedPrice { .. })
        ));
    }

    #[test]
    fn tampered_price_recovers_a_different_signer() {
        let whitelist = [adapter().wallet()];
        let mut price = price_at(100_000);
        price.price = Pip::from_whole(1).unwrap();
        assert!(validate_index_price(&price, &whitelist, Timestamp(0), Timestamp(100_000), WINDOW).is_err());
    }
}
