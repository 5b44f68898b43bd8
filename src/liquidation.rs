//! Liquidation valuations.
//!
//! Pure quote-quantity math shared by every liquidation and exit path. The
//! engine decides who trades with whom; this module decides at what value.
//!
//! - bankruptcy: each position absorbs a share of the account value in
//!   proportion to its maintenance requirement, so closing every position
//!   leaves the wallet at exactly zero quote.
//! - exit: the worse of index value and cost basis, falling back to
//!   bankruptcy when that would leave the wallet negative.
//! - fund closure: index value while the fund is solvent, bankruptcy after.

use crate::margin::{account_value, PositionSnapshot};
use crate::types::{ArithmeticError, Pip};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiquidationError {
    #[error("Quote quantity {provided} differs from expected {expected} by more than {tolerance}")]
    QuoteQuantityMismatch {
        expected: Pip,
        provided: Pip,
        tolerance: Pip,
    },

    #[error("Negative quote {residue} after exit exceeds tolerance {tolerance}")]
    NegativeQuoteAfterExit { residue: Pip, tolerance: Pip },

    #[error("Liquidation quantity {requested} exceeds position {position}")]
    QuantityExceedsPosition { requested: Pip, position: Pip },

    #[error("Liquidation quantity must be positive, got {0}")]
    NonPositiveQuantity(Pip),

    #[error("Arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),
}

/// The four counterparty modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleverageMode {
    InMaintenanceAcquisition,
    InsuranceFundClosure,
    ExitAcquisition,
    ExitFundClosure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValuationBasis {
    IndexPrice,
    Bankruptcy,
    Exit,
    DeactivationPrice,
}

// 7.1: q*p - w_i * tav / sum(w), weighted by maintenance requirement
pub fn bankruptcy_quote(
    position: &PositionSnapshot,
    weight: Pip,
    total_account_value: Pip,
    total_weight: Pip,
) -> Result<Pip, ArithmeticError> {
    let value = position.value()?;
    if total_weight.is_zero() {
        return Ok(value);
    }
    value.checked_sub(weight.mul_div(total_account_value, total_weight)?)
}

pub fn bankruptcy_quotes(
    quote_balance: Pip,
    positions: &[PositionSnapshot],
) -> Result<Vec<Pip>, ArithmeticError> {
    let total_account_value = account_value(quote_balance, positions)?;
    let mut weights = positions
        .iter()
        .map(PositionSnapshot::maintenance_requirement)
        .collect::<Result<Vec<_>, _>>()?;
    // dust positions can truncate their requirement to zero. weight by notional instead
    if weights.iter().all(|weight| weight.is_zero()) {
        weights = positions
            .iter()
            .map(|position| position.value()?.abs())
            .collect::<Result<Vec<_>, _>>()?;
    }
    let total_weight = Pip::checked_sum(weights.iter().copied())?;
    positions
        .iter()
        .zip(&weights)
        .map(|(position, weight)| bankruptcy_quote(position, *weight, total_account_value, total_weight))
        .collect()
}

// 7.2: worse of index value and cost basis, for longs and shorts alike
pub fn exit_quote(position: &PositionSnapshot) -> Result<Pip, ArithmeticError> {
    Ok(position.value()?.min(position.cost_basis))
}

/// Per-position exit quotes and the basis they were computed on.
pub fn exit_quotes(
    quote_balance: Pip,
    positions: &[PositionSnapshot],
) -> Result<(ValuationBasis, Vec<Pip>), ArithmeticError> {
    let quotes = positions
        .iter()
        .map(exit_quote)
        .collect::<Result<Vec<_>, _>>()?;
    let remaining = quotes
        .iter()
        .try_fold(quote_balance, |total, quote| total.checked_add(*quote))?;
    if remaining.is_negative() {
        return Ok((
            ValuationBasis::Bankruptcy,
            bankruptcy_quotes(quote_balance, positions)?,
        ));
    }
    Ok((ValuationBasis::Exit, quotes))
}

// 7.3: insurance or exit fund closing its own positions
pub fn fund_closure_quotes(
    quote_balance: Pip,
    positions: &[PositionSnapshot],
) -> Result<(ValuationBasis, Vec<Pip>), ArithmeticError> {
    if account_value(quote_balance, positions)?.is_negative() {
        return Ok((
            ValuationBasis::Bankruptcy,
            bankruptcy_quotes(quote_balance, positions)?,
        ));
    }
    let quotes = positions
        .iter()
        .map(PositionSnapshot::value)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((ValuationBasis::IndexPrice, quotes))
}

/// Scales a full-position quote to `quantity` of it. Signs follow the position.
pub fn pro_rata_quote(
    full_quote: Pip,
    position_quantity: Pip,
    quantity: Pip,
) -> Result<Pip, LiquidationError> {
    if !quantity.is_positive() {
        return Err(LiquidationError::NonPositiveQuantity(quantity));
    }
    let size = position_quantity.abs()?;
    if quantity > size {
        return Err(LiquidationError::QuantityExceedsPosition {
            requested: quantity,
            position: size,
        });
    }
    Ok(full_quote.mul_div(quantity, size)?)
}

pub fn validate_quote_quantity(
    expected: Pip,
    provided: Pip,
    tolerance: Pip,
) -> Result<(), LiquidationError> {
    let difference = expected.checked_sub(provided)?.abs()?;
    if difference > tolerance {
        return Err(LiquidationError::QuoteQuantityMismatch {
            expected,
            provided,
            tolerance,
        });
    }
    Ok(())
}

/// Residue the caller must absorb to bring `quote` back to zero.
/// Nonnegative quote needs none; small negatives are coerced.
pub fn negative_residue(quote: Pip, tolerance: Pip) -> Result<Pip, LiquidationError> {
    if !quote.is_negative() {
        return Ok(Pip::ZERO);
    }
    let residue = quote.abs()?;
    if residue > tolerance {
        return Err(LiquidationError::NegativeQuoteAfterExit {
            residue: quote,
            tolerance,
        });
    }
    Ok(residue)
}
