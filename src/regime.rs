//! Market regime classification.
//!
//! The declaration order of [`Regime`] is the tie-break key for every argmax
//! in the engine. Never reorder the variants.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Regime {
    ChopBalanced,
    ChopStophunt,
    LiquidationUp,
    LiquidationDown,
    SqueezeUp,
    SqueezeDown,
    TrendBuildUp,
    TrendBuildDown,
    TrendExhaustion,
}

impl Regime {
    /// All regimes in canonical order.
    pub const ALL: [Regime; 9] = [
        Regime::ChopBalanced,
        Regime::ChopStophunt,
        Regime::LiquidationUp,
        Regime::LiquidationDown,
        Regime::SqueezeUp,
        Regime::SqueezeDown,
        Regime::TrendBuildUp,
        Regime::TrendBuildDown,
        Regime::TrendExhaustion,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Position in the canonical ordering (0 = first declared).
    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn first() -> Regime {
        Self::ALL[0]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::ChopBalanced => "CHOP_BALANCED",
            Regime::ChopStophunt => "CHOP_STOPHUNT",
            Regime::LiquidationUp => "LIQUIDATION_UP",
            Regime::LiquidationDown => "LIQUIDATION_DOWN",
            Regime::SqueezeUp => "SQUEEZE_UP",
            Regime::SqueezeDown => "SQUEEZE_DOWN",
            Regime::TrendBuildUp => "TREND_BUILD_UP",
            Regime::TrendBuildDown => "TREND_BUILD_DOWN",
            Regime::TrendExhaustion => "TREND_EXHAUSTION",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Regime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Regime::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| format!("unknown regime: {}", s))
    }
}
