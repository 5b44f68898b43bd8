// 2.0: conversion between native token units and pips.
// tokens carry anywhere from 0 to 32 decimals; pips always carry 8.
// pip-side conversion truncates. that loss is intentional and must stay exact.

use crate::types::PIP_DECIMALS;

pub const MAX_ASSET_DECIMALS: u8 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("Asset decimals {0} out of range (maximum {MAX_ASSET_DECIMALS})")]
    DecimalsOutOfRange(u8),

    #[error("Quantity overflows the pip range")]
    Overflow,
}

fn scale_factor(asset_decimals: u8) -> Result<(bool, u128), ConversionError> {
    if asset_decimals > MAX_ASSET_DECIMALS {
        return Err(ConversionError::DecimalsOutOfRange(asset_decimals));
    }
    let decimals = u32::from(asset_decimals);
    // (scale up into pips, factor)
    if decimals >= PIP_DECIMALS {
        Ok((false, 10u128.pow(decimals - PIP_DECIMALS)))
    } else {
        Ok((true, 10u128.pow(PIP_DECIMALS - decimals)))
    }
}

/// Native units to pips. Sub-pip remainders are dropped.
pub fn asset_units_to_pips(quantity: u128, asset_decimals: u8) -> Result<u64, ConversionError> {
    let (scale_up, factor) = scale_factor(asset_decimals)?;
    let pips = if scale_up {
        quantity.checked_mul(factor).ok_or(ConversionError::Overflow)?
    } else {
        quantity / factor
    };
    u64::try_from(pips).map_err(|_| ConversionError::Overflow)
}

/// Pips to native units.
pub fn pips_to_asset_units(pips: u64, asset_decimals: u8) -> Result<u128, ConversionError> {
    let (scale_up, factor) = scale_factor(asset_decimals)?;
    if scale_up {
        Ok(u128::from(pips) / factor)
    } else {
        u128::from(pips)
            .checked_mul(factor)
            .ok_or(ConversionError::Overflow)
    }
}
