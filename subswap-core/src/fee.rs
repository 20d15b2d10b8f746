use crate::Error;
use crate::ErrorContext;
use bitcoin::Amount;
use bitcoin::FeeRate;
use bitcoin::Weight;

/// The lowest fee rate we will pay: 253 sat/kwu, i.e. 1.012 sat/vB.
pub const FEE_RATE_FLOOR: FeeRate = FeeRate::from_sat_per_kwu(253);

pub const DEFAULT_CONF_TARGET: u32 = 6;

/// Bitcoin Core's estimator does not go beyond this many blocks.
pub const MAX_CONF_TARGET: u32 = 1008;

/// Estimates the fee rate needed to confirm within a number of blocks.
pub trait FeeEstimator: Send + Sync {
    fn estimate_fee_rate(&self, conf_target: u32) -> Result<FeeRate, Error>;
}

/// How a caller wants the fee of a settlement to be chosen. At most one field may be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeePreference {
    pub conf_target: Option<u32>,
    pub fee_rate: Option<FeeRate>,
}

impl FeePreference {
    pub fn conf_target(conf_target: u32) -> Self {
        Self {
            conf_target: Some(conf_target),
            fee_rate: None,
        }
    }

    pub fn fee_rate(fee_rate: FeeRate) -> Self {
        Self {
            conf_target: None,
            fee_rate: Some(fee_rate),
        }
    }

    /// Build a preference from transport-level hints, where zero means unset.
    pub fn from_hints(sat_per_vbyte: u64, conf_target: u32) -> Result<Self, Error> {
        let fee_rate = match sat_per_vbyte {
            0 => None,
            sat_per_vbyte => Some(FeeRate::from_sat_per_vb(sat_per_vbyte).ok_or_else(|| {
                Error::invalid_parameters(format!("fee rate {sat_per_vbyte} sat/vB overflows"))
            })?),
        };

        let conf_target = match conf_target {
            0 => None,
            conf_target => Some(conf_target),
        };

        Ok(Self {
            conf_target,
            fee_rate,
        })
    }
}

/// Turns a [`FeePreference`] into a concrete fee rate.
#[derive(Debug, Clone, Copy)]
pub struct FeePolicy {
    max_fee_rate: FeeRate,
    default_conf_target: u32,
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self {
            max_fee_rate: FeeRate::from_sat_per_kwu(2_500_000),
            default_conf_target: DEFAULT_CONF_TARGET,
        }
    }
}

impl FeePolicy {
    pub fn new(max_fee_rate: FeeRate, default_conf_target: u32) -> Self {
        Self {
            max_fee_rate,
            default_conf_target,
        }
    }

    pub fn resolve_fee_rate(
        &self,
        estimator: &dyn FeeEstimator,
        preference: FeePreference,
    ) -> Result<FeeRate, Error> {
        match preference {
            FeePreference {
                conf_target: Some(_),
                fee_rate: Some(_),
            } => Err(Error::invalid_parameters(
                "only one of fee rate and confirmation target may be set",
            )),
            FeePreference {
                fee_rate: Some(fee_rate),
                ..
            } => self.explicit_fee_rate(fee_rate),
            FeePreference {
                conf_target: Some(conf_target),
                ..
            } => estimate(estimator, conf_target),
            FeePreference {
                conf_target: None,
                fee_rate: None,
            } => estimate(estimator, self.default_conf_target),
        }
    }

    fn explicit_fee_rate(&self, fee_rate: FeeRate) -> Result<FeeRate, Error> {
        if fee_rate > self.max_fee_rate {
            return Err(Error::invalid_parameters(format!(
                "fee rate {} sat/kwu exceeds maximum of {} sat/kwu",
                fee_rate.to_sat_per_kwu(),
                self.max_fee_rate.to_sat_per_kwu()
            )));
        }

        if fee_rate < FEE_RATE_FLOOR {
            tracing::warn!(
                requested = fee_rate.to_sat_per_kwu(),
                floor = FEE_RATE_FLOOR.to_sat_per_kwu(),
                "Manual fee rate is too low, using floor instead"
            );

            return Ok(FEE_RATE_FLOOR);
        }

        Ok(fee_rate)
    }
}

fn estimate(estimator: &dyn FeeEstimator, conf_target: u32) -> Result<FeeRate, Error> {
    if !(1..=MAX_CONF_TARGET).contains(&conf_target) {
        return Err(Error::invalid_parameters(format!(
            "confirmation target {conf_target} is outside 1..={MAX_CONF_TARGET}"
        )));
    }

    let fee_rate = estimator
        .estimate_fee_rate(conf_target)
        .map_err(Error::fee_estimation)
        .with_context(|| format!("failed to estimate fee for target {conf_target}"))?;

    if fee_rate == FeeRate::ZERO {
        return Err(Error::fee_estimation(format!(
            "estimator returned no fee rate for target {conf_target}"
        )));
    }

    tracing::debug!(
        conf_target,
        sat_per_kwu = fee_rate.to_sat_per_kwu(),
        "Estimated fee rate"
    );

    Ok(fee_rate.max(FEE_RATE_FLOOR))
}

/// `ceil(fee_rate * weight)`, in satoshis.
pub fn fee_for_weight(fee_rate: FeeRate, weight: Weight) -> Result<Amount, Error> {
    let sats = fee_rate
        .to_sat_per_kwu()
        .checked_mul(weight.to_wu())
        .and_then(|fee| fee.checked_add(999))
        .map(|fee| fee / 1000)
        .ok_or_else(|| Error::invalid_parameters("fee computation overflows"))?;

    Ok(Amount::from_sat(sats))
}
