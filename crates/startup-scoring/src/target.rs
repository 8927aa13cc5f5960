use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The six scoring dimensions. Declaration order is the canonical target order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Overall,
    TechMaturity,
    Innovation,
    MarketPotential,
    TeamReadiness,
    FinancialHealth,
}

impl Target {
    pub const ALL: [Target; 6] = [
        Target::Overall,
        Target::TechMaturity,
        Target::Innovation,
        Target::MarketPotential,
        Target::TeamReadiness,
        Target::FinancialHealth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Overall => "overall",
            Target::TechMaturity => "tech_maturity",
            Target::Innovation => "innovation",
            Target::MarketPotential => "market_potential",
            Target::TeamReadiness => "team_readiness",
            Target::FinancialHealth => "financial_health",
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        let normalized = normalized.strip_prefix("score_").unwrap_or(normalized.as_str());
        Target::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("Unknown scoring target: {}", s))
    }
}
