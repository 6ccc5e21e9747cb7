//! Kinked interest rate curve
//!
//! Utilization maps to a per-second rate along two linear segments joined at
//! the kink. Supply and borrow each have their own curve.

use crate::scale::{ScaleError, Wad};
use serde::{Deserialize, Serialize};

/// 365 days
pub const SECONDS_PER_YEAR: u64 = 31_536_000;

/// Two-segment rate curve, all parameters per second at 1e18 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateCurve {
    pub base: Wad,
    pub slope1: Wad,
    pub slope2: Wad,
    pub kink: Wad,
}

impl RateCurve {
    /// Build a curve from annual figures (e.g. "0.04" for 4% APR per unit of utilization)
    pub fn from_annual(base: Wad, slope1: Wad, slope2: Wad, kink: Wad) -> Result<Self, ScaleError> {
        Ok(Self {
            base: base.div_int(SECONDS_PER_YEAR)?,
            slope1: slope1.div_int(SECONDS_PER_YEAR)?,
            slope2: slope2.div_int(SECONDS_PER_YEAR)?,
            kink,
        })
    }

    /// Per-second rate at `utilization`
    ///
    /// - `u <= kink`: `base + slope1 * u`
    /// - `u > kink`:  `base + slope1 * kink + slope2 * (u - kink)`
    ///
    /// Both branches compute `slope1 * kink` the same way, so they agree exactly
    /// at `u == kink`.
    pub fn rate(&self, utilization: Wad) -> Result<Wad, ScaleError> {
        if utilization <= self.kink {
            self.base.checked_add(self.slope1.mul_wad(utilization)?)
        } else {
            let at_kink = self.base.checked_add(self.slope1.mul_wad(self.kink)?)?;
            let excess = utilization.saturating_sub(self.kink);
            at_kink.checked_add(self.slope2.mul_wad(excess)?)
        }
    }
}

/// Supply and borrow curves of one market
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketRates {
    pub supply: RateCurve,
    pub borrow: RateCurve,
}

/// Free-function form of [`RateCurve::rate`]
pub fn rate(utilization: Wad, curve: &RateCurve) -> Result<Wad, ScaleError> {
    curve.rate(utilization)
}

/// Annual rate for a per-second rate (a fraction; multiply by 100 for percent)
pub fn annualize(per_second: Wad) -> Result<Wad, ScaleError> {
    per_second.mul_int(SECONDS_PER_YEAR)
}

/// "12.3456%" style rendering of an annualized per-second rate
pub fn apr_percent(per_second: Wad) -> Result<String, ScaleError> {
    let percent = annualize(per_second)?.mul_int(100)?;
    Ok(format!("{}%", truncate_fraction(&percent.to_string(), 4)))
}

fn truncate_fraction(text: &str, places: usize) -> String {
    match text.split_once('.') {
        Some((whole, frac)) if frac.len() > places => format!("{whole}.{}", &frac[..places]),
        _ => text.to_string(),
    }
}
