//! Storage cost model for Cairn.
//!
//! Objects are billed per GiB per month at a rate that depends on how long
//! ago they were last read. [`StorageTiers`] holds the rate buckets, sorted
//! ascending by their day threshold, and [`TieredCostAnalyzer`] picks the
//! bucket with the highest threshold not above the elapsed days.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};

use crate::resource::Resource;
use crate::{CairnError, Result};

/// Bytes in one GiB.
pub const BYTES_PER_GIB: i64 = 1_073_741_824;

/// A cost bucket keyed by days since last access.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StorageTier {
    /// Tier name.
    pub name: String,
    /// Minimum days since last access for this tier to apply.
    pub days_since_last_access: u32,
    /// Rate in USD per GiB per month.
    #[serde(deserialize_with = "deserialize_rate")]
    pub cost_per_gb_per_month: Decimal,
}

impl StorageTier {
    /// Create a tier.
    pub fn new(name: impl Into<String>, days_since_last_access: u32, cost_per_gb_per_month: Decimal) -> Self {
        Self {
            name: name.into(),
            days_since_last_access,
            cost_per_gb_per_month,
        }
    }
}

impl fmt::Display for StorageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}d, ${}/GiB)",
            self.name, self.days_since_last_access, self.cost_per_gb_per_month
        )
    }
}

/// Accept a rate written as a TOML string, float or integer.
///
/// Floats go through their shortest decimal representation, so `0.023`
/// becomes exactly 0.023 rather than the nearest binary fraction.
fn deserialize_rate<'de, D>(deserializer: D) -> std::result::Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Rate {
        Text(String),
        Integer(i64),
        Float(f64),
    }

    let text = match Rate::deserialize(deserializer)? {
        Rate::Text(s) => s,
        Rate::Integer(i) => i.to_string(),
        Rate::Float(f) => f.to_string(),
    };
    Decimal::from_str(text.trim()).map_err(serde::de::Error::custom)
}

/// The standard three-tier price list.
pub fn default_tiers() -> Vec<StorageTier> {
    vec![
        StorageTier::new("standard", 0, Decimal::new(23, 3)),
        StorageTier::new("infrequent", 30, Decimal::new(125, 4)),
        StorageTier::new("archive-instant", 90, Decimal::new(4, 3)),
    ]
}

/// A non-empty tier list sorted ascending by threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTiers {
    tiers: Vec<StorageTier>,
}

impl StorageTiers {
    /// Validate and wrap a tier list.
    ///
    /// Empty lists, lists out of order and negative rates are rejected.
    pub fn new(tiers: Vec<StorageTier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(CairnError::Validation(
                "at least one storage tier is required".to_string(),
            ));
        }
        if let Some(pair) = tiers
            .windows(2)
            .find(|w| w[1].days_since_last_access < w[0].days_since_last_access)
        {
            return Err(CairnError::Validation(format!(
                "storage tiers must be sorted by days_since_last_access: '{}' ({}d) comes after '{}' ({}d)",
                pair[1].name, pair[1].days_since_last_access, pair[0].name, pair[0].days_since_last_access
            )));
        }
        if let Some(tier) = tiers.iter().find(|t| t.cost_per_gb_per_month.is_sign_negative()) {
            return Err(CairnError::Validation(format!(
                "storage tier '{}' has a negative rate",
                tier.name
            )));
        }
        Ok(Self { tiers })
    }

    /// The tiers, ascending by threshold.
    pub fn as_slice(&self) -> &[StorageTier] {
        &self.tiers
    }

    /// Tier that applies after `elapsed_days` without access.
    ///
    /// Falls back to the lowest tier when no threshold has been reached.
    pub fn tier_for(&self, elapsed_days: i64) -> &StorageTier {
        self.tiers
            .iter()
            .rev()
            .find(|t| elapsed_days >= i64::from(t.days_since_last_access))
            .unwrap_or(&self.tiers[0])
    }
}

impl Default for StorageTiers {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
        }
    }
}

/// Estimates the monthly storage cost of resources.
pub trait CostAnalyzer: Send + Sync {
    /// Cost of `size_bytes` last accessed at `reference`.
    fn compute_cost(&self, size_bytes: i64, reference: DateTime<Utc>) -> Decimal;

    /// Cost of a resource.
    ///
    /// Empty resources cost nothing. Otherwise the last access time is used
    /// when known, the creation time when not.
    fn compute_resource_cost(&self, resource: &Resource) -> Decimal {
        if resource.size() <= 0 {
            return Decimal::ZERO;
        }
        let reference = resource
            .last_accessed_at()
            .unwrap_or_else(|| resource.created_at());
        self.compute_cost(resource.size(), reference)
    }
}

/// Cost analyzer pricing by [`StorageTiers`].
#[derive(Debug, Clone, Default)]
pub struct TieredCostAnalyzer {
    tiers: StorageTiers,
}

impl TieredCostAnalyzer {
    /// Create an analyzer over validated tiers.
    pub fn new(tiers: StorageTiers) -> Self {
        Self { tiers }
    }

    /// Create an analyzer from a raw tier list.
    pub fn from_tiers(tiers: Vec<StorageTier>) -> Result<Self> {
        Ok(Self::new(StorageTiers::new(tiers)?))
    }

    /// Configured tiers.
    pub fn tiers(&self) -> &StorageTiers {
        &self.tiers
    }

    /// Cost of `size_bytes` last accessed at `reference`, as seen at `now`.
    pub fn compute_cost_at(
        &self,
        size_bytes: i64,
        reference: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Decimal {
        if size_bytes <= 0 {
            return Decimal::ZERO;
        }
        let elapsed_days = (now - reference).num_days();
        let tier = self.tiers.tier_for(elapsed_days);

        Decimal::from(size_bytes) / Decimal::from(BYTES_PER_GIB) * tier.cost_per_gb_per_month
    }
}

impl CostAnalyzer for TieredCostAnalyzer {
    fn compute_cost(&self, size_bytes: i64, reference: DateTime<Utc>) -> Decimal {
        self.compute_cost_at(size_bytes, reference, Utc::now())
    }
}
