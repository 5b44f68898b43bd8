// 1.0: all the primitives live here. nothing in the engine works without these types.
// pips, wallets, nonces, blocks, timestamps. each is a newtype so the compiler catches mixups.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::{ContextV1, Timestamp as UuidTimestamp, Uuid, Version};

/// One whole unit expressed in pips.
pub const PIP_SCALE: i64 = 100_000_000;
pub const PIP_DECIMALS: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ArithmeticError {
    #[error("Pip overflow")]
    PipOverflow,

    #[error("Pip underflow")]
    PipUnderflow,

    #[error("Division by zero")]
    DivisionByZero,
}

// narrows a widened intermediate back into the pip domain. never wraps.
pub(crate) fn narrow(value: i128) -> Result<Pip, ArithmeticError> {
    if value > i64::MAX as i128 {
        Err(ArithmeticError::PipOverflow)
    } else if value < i64::MIN as i128 {
        Err(ArithmeticError::PipUnderflow)
    } else {
        Ok(Pip(value as i64))
    }
}

// 1.1: signed fixed point at 1e-8. balances, prices, quantities and fractions all use this.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Pip(i64);

impl Pip {
    pub const ZERO: Pip = Pip(0);
    pub const ONE: Pip = Pip(PIP_SCALE);
    pub const MAX: Pip = Pip(i64::MAX);

    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i64 {
        self.0
    }

    pub fn from_whole(units: i64) -> Result<Self, ArithmeticError> {
        narrow(units as i128 * PIP_SCALE as i128)
    }

    pub fn from_unsigned(raw: u64) -> Result<Self, ArithmeticError> {
        i64::try_from(raw)
            .map(Self)
            .map_err(|_| ArithmeticError::PipOverflow)
    }

    pub fn to_unsigned(self) -> Result<u64, ArithmeticError> {
        u64::try_from(self.0).map_err(|_| ArithmeticError::PipUnderflow)
    }

    /// Truncates anything finer than a pip.
    pub fn from_decimal(value: Decimal) -> Result<Self, ArithmeticError> {
        let out_of_range = if value.is_sign_negative() {
            ArithmeticError::PipUnderflow
        } else {
            ArithmeticError::PipOverflow
        };
        let scaled = value
            .checked_mul(Decimal::from(PIP_SCALE))
            .ok_or(out_of_range)?;
        scaled.trunc().to_i64().map(Self).ok_or(out_of_range)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, PIP_DECIMALS)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn signum(self) -> i64 {
        self.0.signum()
    }

    pub fn abs(self) -> Result<Self, ArithmeticError> {
        self.0.checked_abs().map(Self).ok_or(ArithmeticError::PipOverflow)
    }

    pub fn checked_add(self, other: Pip) -> Result<Self, ArithmeticError> {
        narrow(self.0 as i128 + other.0 as i128)
    }

    pub fn checked_sub(self, other: Pip) -> Result<Self, ArithmeticError> {
        narrow(self.0 as i128 - other.0 as i128)
    }

    pub fn checked_neg(self) -> Result<Self, ArithmeticError> {
        narrow(-(self.0 as i128))
    }

    /// Fixed-point product, truncated toward zero.
    pub fn multiply(self, other: Pip) -> Result<Self, ArithmeticError> {
        narrow(self.0 as i128 * other.0 as i128 / PIP_SCALE as i128)
    }

    /// Fixed-point quotient, truncated toward zero.
    pub fn divide(self, other: Pip) -> Result<Self, ArithmeticError> {
        if other.is_zero() {
            return Err(ArithmeticError::DivisionByZero);
        }
        narrow(self.0 as i128 * PIP_SCALE as i128 / other.0 as i128)
    }

    // self * numerator / denominator without an intermediate narrowing step
    pub fn mul_div(self, numerator: Pip, denominator: Pip) -> Result<Self, ArithmeticError> {
        if denominator.is_zero() {
            return Err(ArithmeticError::DivisionByZero);
        }
        let product = (self.0 as i128)
            .checked_mul(numerator.0 as i128)
            .ok_or(ArithmeticError::PipOverflow)?;
        narrow(product / denominator.0 as i128)
    }

    pub fn checked_sum<I: IntoIterator<Item = Pip>>(values: I) -> Result<Self, ArithmeticError> {
        values
            .into_iter()
            .try_fold(Pip::ZERO, |acc, value| acc.checked_add(value))
    }
}

impl fmt::Display for Pip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal().normalize())
    }
}

// 1.2: 20-byte wallet address. derived from a secp256k1 key in signature.rs.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Wallet(pub [u8; 20]);

impl Wallet {
    pub const ZERO: Wallet = Wallet([0u8; 20]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Wallet({})", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    // signed base quantity change for the wallet on this side
    pub fn signed(&self, quantity: Pip) -> Result<Pip, ArithmeticError> {
        match self {
            OrderSide::Buy => Ok(quantity),
            OrderSide::Sell => quantity.checked_neg(),
        }
    }
}

// 1.3: time-ordered nonce. only version-1 uuids carry a usable timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(Uuid);

impl Nonce {
    pub fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Builds a version-1 nonce carrying `timestamp_ms`.
    pub fn from_timestamp_ms(timestamp_ms: u64, node_id: &[u8; 6]) -> Self {
        let context = ContextV1::new(0);
        let ts = UuidTimestamp::from_unix(
            &context,
            timestamp_ms / 1000,
            ((timestamp_ms % 1000) * 1_000_000) as u32,
        );
        Self(Uuid::new_v1(ts, node_id))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Milliseconds since the epoch, or `None` for anything but a v1 uuid.
    pub fn timestamp_ms(&self) -> Option<u64> {
        if self.0.get_version() != Some(Version::Mac) {
            return None;
        }
        let (seconds, nanos) = self.0.get_timestamp()?.to_unix();
        Some(seconds * 1000 + u64::from(nanos) / 1_000_000)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.4: block height. finality windows are expressed in blocks.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BlockNumber(pub u64);

impl BlockNumber {
    pub fn plus(&self, blocks: u64) -> Self {
        Self(self.0.saturating_add(blocks))
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// 1.5: millisecond timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn plus_millis(&self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms.min(i64::MAX as u64) as i64))
    }
}
