// 5.0: funding. the dispatcher publishes one rate per market per period.
// 5.1 stores rate * index price as the period multiplier in an append-only history.
// 5.2 settles a position over [next_period, len) with one prefix-sum lookup.

use crate::types::{narrow, ArithmeticError, Pip, PIP_SCALE};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FundingError {
    #[error("Funding rate {rate} outside [-{max}, {max}]")]
    RateOutOfRange { rate: Pip, max: Pip },

    #[error("Funding period range {from}..{to} outside history of {len}")]
    PeriodOutOfRange { from: u64, to: u64, len: u64 },

    #[error("Arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),
}

pub fn validate_funding_rate(rate: Pip, max_rate: Pip) -> Result<(), FundingError> {
    let magnitude = rate.abs()?;
    if magnitude > max_rate {
        return Err(FundingError::RateOutOfRange {
            rate,
            max: max_rate,
        });
    }
    Ok(())
}

// 5.1: quote paid per unit of long position for one period
pub fn funding_multiplier(rate: Pip, index_price: Pip) -> Result<Pip, ArithmeticError> {
    rate.multiply(index_price)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingHistory {
    multipliers: Vec<Pip>,
    // prefix[i] = sum of multipliers[..i]
    prefix: Vec<i128>,
}

impl FundingHistory {
    pub fn new() -> Self {
        Self {
            multipliers: Vec::new(),
            prefix: vec![0],
        }
    }

    pub fn len(&self) -> u64 {
        self.multipliers.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.multipliers.is_empty()
    }

    pub fn multiplier(&self, period: u64) -> Option<Pip> {
        self.multipliers.get(period as usize).copied()
    }

    pub fn last(&self) -> Option<Pip> {
        self.multipliers.last().copied()
    }

    pub fn append(&mut self, multiplier: Pip) -> u64 {
        let running = self.prefix.last().copied().unwrap_or(0);
        if self.prefix.is_empty() {
            self.prefix.push(0);
        }
        self.multipliers.push(multiplier);
        self.prefix.push(running + multiplier.raw() as i128);
        self.len() - 1
    }

    /// Sum of multipliers for periods `from..to`, in raw pips.
    pub fn sum_range(&self, from: u64, to: u64) -> Result<i128, FundingError> {
        if from > to || to > self.len() {
            return Err(FundingError::PeriodOutOfRange {
                from,
                to,
                len: self.len(),
            });
        }
        let end = self.prefix.get(to as usize).copied().unwrap_or(0);
        let start = self.prefix.get(from as usize).copied().unwrap_or(0);
        Ok(end - start)
    }
}

// 5.2: longs pay positive multipliers, shorts receive them
pub fn funding_payment(quantity: Pip, multiplier_sum: i128) -> Result<Pip, ArithmeticError> {
    let owed = (quantity.raw() as i128)
        .checked_mul(multiplier_sum)
        .ok_or(ArithmeticError::PipOverflow)?
        / PIP_SCALE as i128;
    narrow(-owed)
}
