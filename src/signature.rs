// 9.0: wallet signatures. secp256k1 over keccak256 payload hashes.
// every signed request type hashes a fixed field encoding prefixed with its own
// domain tag, so a signature for one request type never verifies as another.
// 9.0.1 delegated keys: the wallet signs (wallet, delegate, nonce) once and the
// delegate signs payloads until the expiration window closes.

use crate::types::{Nonce, Pip, Wallet};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::fmt;

pub const ORDER_TAG: &str = "perps-clearing/order/v1";
pub const TRANSFER_TAG: &str = "perps-clearing/transfer/v1";
pub const WITHDRAWAL_TAG: &str = "perps-clearing/withdrawal/v1";
pub const DELEGATED_KEY_TAG: &str = "perps-clearing/delegated-key/v1";
pub const INDEX_PRICE_TAG: &str = "perps-clearing/index-price/v1";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Malformed signature")]
    MalformedSignature,

    #[error("Signature does not recover to {expected}")]
    InvalidSignature { expected: Wallet },

    #[error("Delegated key authorization not signed by {wallet}")]
    InvalidDelegatedKeyAuthorization { wallet: Wallet },

    #[error("Delegated key {delegated_key} not valid at nonce timestamp {timestamp_ms}")]
    DelegatedKeyExpired {
        delegated_key: Wallet,
        timestamp_ms: u64,
    },

    #[error("Request must be signed directly by the wallet")]
    DelegatedKeyNotAllowed,

    #[error("Nonce {0} carries no timestamp")]
    UntimedNonce(Nonce),
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Fixed-width field encoder for request hashes.
#[derive(Debug, Clone)]
pub struct PayloadEncoder {
    bytes: Vec<u8>,
}

impl PayloadEncoder {
    pub fn new(tag: &str) -> Self {
        Self {
            bytes: keccak256(tag.as_bytes()).to_vec(),
        }
    }

    pub fn wallet(mut self, wallet: &Wallet) -> Self {
        self.bytes.extend_from_slice(wallet.as_bytes());
        self
    }

    pub fn nonce(mut self, nonce: &Nonce) -> Self {
        self.bytes.extend_from_slice(nonce.as_bytes());
        self
    }

    pub fn pip(mut self, value: Pip) -> Self {
        self.bytes.extend_from_slice(&value.raw().to_be_bytes());
        self
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.bytes.push(value);
        self
    }

    pub fn u64(mut self, value: u64) -> Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn bool(self, value: bool) -> Self {
        self.u8(u8::from(value))
    }

    // length-prefixed so adjacent strings cannot be re-split
    pub fn str(mut self, value: &str) -> Self {
        self.bytes
            .extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.bytes.extend_from_slice(value.as_bytes());
        self
    }

    pub fn finish(self) -> [u8; 32] {
        keccak256(&self.bytes)
    }
}

/// Compact ECDSA signature plus recovery id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    pub recovery_id: u8,
}

impl WalletSignature {
    pub fn to_hex(&self) -> String {
        let mut bytes = Vec::with_capacity(65);
        bytes.extend_from_slice(&self.r);
        bytes.extend_from_slice(&self.s);
        bytes.push(self.recovery_id);
        format!("0x{}", hex::encode(bytes))
    }

    pub fn from_hex(value: &str) -> Result<Self, SignatureError> {
        let raw = value.strip_prefix("0x").unwrap_or(value);
        let bytes = hex::decode(raw).map_err(|_| SignatureError::MalformedSignature)?;
        if bytes.len() != 65 {
            return Err(SignatureError::MalformedSignature);
        }
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        Ok(Self {
            r,
            s,
            recovery_id: bytes[64],
        })
    }
}

impl fmt::Debug for WalletSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletSignature({})", self.to_hex())
    }
}

pub fn wallet_for_key(key: &VerifyingKey) -> Wallet {
    let point = key.to_encoded_point(false);
    // skip the 0x04 prefix
    let hash = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&hash[12..32]);
    Wallet(address)
}

pub fn sign_hash(key: &SigningKey, hash: &[u8; 32]) -> Result<WalletSignature, SignatureError> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(hash)
        .map_err(|e| SignatureError::SigningFailed(e.to_string()))?;
    let bytes = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..64]);
    Ok(WalletSignature {
        r,
        s,
        recovery_id: recovery_id.to_byte(),
    })
}

pub fn recover_signer(hash: &[u8; 32], signature: &WalletSignature) -> Result<Wallet, SignatureError> {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&signature.r);
    bytes[32..].copy_from_slice(&signature.s);
    let parsed = Signature::from_slice(&bytes).map_err(|_| SignatureError::MalformedSignature)?;
    let recovery_id =
        RecoveryId::from_byte(signature.recovery_id).ok_or(SignatureError::MalformedSignature)?;
    let key = VerifyingKey::recover_from_prehash(hash, &parsed, recovery_id)
        .map_err(|_| SignatureError::MalformedSignature)?;
    Ok(wallet_for_key(&key))
}

pub fn verify_signature(hash: &[u8; 32], signature: &WalletSignature, expected: &Wallet) -> bool {
    matches!(recover_signer(hash, signature), Ok(signer) if signer == *expected)
}

/// A secp256k1 key with its derived wallet.
#[derive(Clone)]
pub struct WalletKey {
    key: SigningKey,
    wallet: Wallet,
}

impl WalletKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        let key = SigningKey::from_slice(bytes).map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        let wallet = wallet_for_key(key.verifying_key());
        Ok(Self { key, wallet })
    }

    /// Deterministic key for simulations and tests.
    pub fn from_seed(seed: &str) -> Result<Self, SignatureError> {
        Self::from_bytes(&keccak256(seed.as_bytes()))
    }

    pub fn wallet(&self) -> Wallet {
        self.wallet
    }

    pub fn sign(&self, hash: &[u8; 32]) -> Result<WalletSignature, SignatureError> {
        sign_hash(&self.key, hash)
    }
}

impl fmt::Debug for WalletKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletKey").field("wallet", &self.wallet).finish()
    }
}

// 9.0.1: wallet-signed grant for a delegate address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedKeyAuthorization {
    pub delegated_key: Wallet,
    pub nonce: Nonce,
    pub signature: WalletSignature,
}

impl DelegatedKeyAuthorization {
    pub fn hash(wallet: &Wallet, delegated_key: &Wallet, nonce: &Nonce) -> [u8; 32] {
        PayloadEncoder::new(DELEGATED_KEY_TAG)
            .wallet(wallet)
            .wallet(delegated_key)
            .nonce(nonce)
            .finish()
    }

    pub fn sign(owner: &WalletKey, delegated_key: Wallet, nonce: Nonce) -> Result<Self, SignatureError> {
        let hash = Self::hash(&owner.wallet(), &delegated_key, &nonce);
        Ok(Self {
            delegated_key,
            nonce,
            signature: owner.sign(&hash)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authorization {
    Direct {
        signature: WalletSignature,
    },
    Delegated {
        authorization: DelegatedKeyAuthorization,
        signature: WalletSignature,
    },
}

impl Authorization {
    pub fn is_direct(&self) -> bool {
        matches!(self, Authorization::Direct { .. })
    }
}

/// Checks `authorization` over `payload_hash` on behalf of `wallet`.
pub fn verify_authorization(
    wallet: &Wallet,
    payload_hash: &[u8; 32],
    payload_nonce: &Nonce,
    authorization: &Authorization,
    delegate_expiration_ms: u64,
) -> Result<(), SignatureError> {
    match authorization {
        Authorization::Direct { signature } => {
            if !verify_signature(payload_hash, signature, wallet) {
                return Err(SignatureError::InvalidSignature { expected: *wallet });
            }
        }
        Authorization::Delegated {
            authorization,
            signature,
        } => {
            let grant = DelegatedKeyAuthorization::hash(
                wallet,
                &authorization.delegated_key,
                &authorization.nonce,
            );
            if !verify_signature(&grant, &authorization.signature, wallet) {
                return Err(SignatureError::InvalidDelegatedKeyAuthorization { wallet: *wallet });
            }
            if !verify_signature(payload_hash, signature, &authorization.delegated_key) {
                return Err(SignatureError::InvalidSignature {
                    expected: authorization.delegated_key,
                });
            }

            let granted_at = authorization
                .nonce
                .timestamp_ms()
                .ok_or(SignatureError::UntimedNonce(authorization.nonce))?;
            let used_at = payload_nonce
                .timestamp_ms()
                .ok_or(SignatureError::UntimedNonce(*payload_nonce))?;
            if used_at < granted_at || used_at > granted_at.saturating_add(delegate_expiration_ms) {
                return Err(SignatureError::DelegatedKeyExpired {
                    delegated_key: authorization.delegated_key,
                    timestamp_ms: used_at,
                });
            }
        }
    }
    Ok(())
}
