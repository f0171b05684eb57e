//! Loyalty tiers
//!
//! A user's level follows what they paid in the current calendar month.
//! Purchases can only raise the level; the monthly decay job lowers it one
//! step for users who bought nothing the month before.

use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{Money, Percent};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyLevel { #[default] None, Bronze, Silver, Gold }

impl LoyaltyLevel {
    const ORDER: [LoyaltyLevel; 4] = [Self::None, Self::Bronze, Self::Silver, Self::Gold];

    pub fn previous(self) -> LoyaltyLevel {
        Self::ORDER.iter().rev().copied().find(|l| *l < self).unwrap_or(Self::None)
    }

    pub fn as_str(self) -> &'static str {
        match self { Self::None => "none", Self::Bronze => "bronze", Self::Silver => "silver", Self::Gold => "gold" }
    }

    pub fn parse(value: &str) -> Option<LoyaltyLevel> {
        Self::ORDER.iter().copied().find(|l| l.as_str().eq_ignore_ascii_case(value))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Tier {
    pub threshold: Money,
    pub percent: Percent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LoyaltyTiers {
    pub bronze: Tier,
    pub silver: Tier,
    pub gold: Tier,
}

impl Default for LoyaltyTiers {
    fn default() -> Self {
        let tier = |threshold: i64, percent: u32| Tier {
            threshold: Money::from_major(threshold),
            percent: Percent::from_int(percent).unwrap_or(Percent::ZERO),
        };
        Self { bronze: tier(10_000, 5), silver: tier(30_000, 7), gold: tier(50_000, 10) }
    }
}

impl LoyaltyTiers {
    fn tier(&self, level: LoyaltyLevel) -> Option<&Tier> {
        match level {
            LoyaltyLevel::None => None,
            LoyaltyLevel::Bronze => Some(&self.bronze),
            LoyaltyLevel::Silver => Some(&self.silver),
            LoyaltyLevel::Gold => Some(&self.gold),
        }
    }

    pub fn percent(&self, level: LoyaltyLevel) -> Percent {
        self.tier(level).map_or(Percent::ZERO, |t| t.percent)
    }

    /// Highest level whose threshold `monthly_total` reaches.
    pub fn level_for(&self, monthly_total: Money) -> LoyaltyLevel {
        LoyaltyLevel::ORDER
            .iter()
            .rev()
            .copied()
            .find(|l| self.tier(*l).is_some_and(|t| monthly_total >= t.threshold))
            .unwrap_or(LoyaltyLevel::None)
    }

    pub fn promote(&self, current: LoyaltyLevel, monthly_total: Money) -> LoyaltyLevel {
        current.max(self.level_for(monthly_total))
    }

    pub fn decay(&self, current: LoyaltyLevel) -> LoyaltyLevel { current.previous() }
}
