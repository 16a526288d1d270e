//! Inbound snapshot wire types
//!
//! One `Snapshot` is one unit of work: a timestamped batch of price or promo
//! facts for a single provider/branch, produced by the external normalizer.
//! Field names follow the wire format the extractors publish
//! (`pricesFull`/`promoFull`, `price` for the regular price, `src_key` for
//! the originating object key).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Snapshot payload kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SnapshotKind {
    #[serde(rename = "pricesFull")]
    Prices,
    #[serde(rename = "promoFull")]
    Promos,
}

impl SnapshotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotKind::Prices => "pricesFull",
            SnapshotKind::Promos => "promoFull",
        }
    }
}

impl std::fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound batch of facts for a provider/branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub provider: String,
    pub branch: String,
    #[serde(rename = "type")]
    pub kind: SnapshotKind,
    pub timestamp: DateTime<Utc>,
    /// Source object key the normalizer extracted this snapshot from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_key: Option<String>,
    #[serde(default)]
    pub items: Vec<ItemFact>,
}

impl Snapshot {
    /// Boundary validation: downstream code relies on these holding.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.provider.trim().is_empty() {
            return Err(PipelineError::Validation("snapshot has no provider".into()));
        }
        if self.branch.trim().is_empty() {
            return Err(PipelineError::Validation("snapshot has no branch".into()));
        }
        if !self.items.iter().any(|it| !it.code.trim().is_empty()) {
            return Err(PipelineError::Validation(
                "snapshot has no items with a code".into(),
            ));
        }
        Ok(())
    }

    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey {
            provider: self.provider.clone(),
            branch: self.branch.clone(),
            kind: self.kind,
        }
    }

    /// Distinct non-blank item codes, in first-appearance order.
    pub fn codes(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for it in &self.items {
            let code = it.code.trim();
            if !code.is_empty() && seen.insert(code.to_string()) {
                out.push(code.to_string());
            }
        }
        out
    }
}

/// One normalized price or promo fact
///
/// Price snapshots carry the descriptive and pricing fields; promo snapshots
/// carry either an absolute discounted price or a percentage rate plus an
/// optional validity window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemFact {
    #[serde(default)]
    pub code: String,
    #[serde(default, alias = "product", alias = "clean_name")]
    pub name: Option<String>,
    #[serde(default, alias = "manufacturer")]
    pub brand: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub qty: Option<Decimal>,
    #[serde(default)]
    pub unit_price: Option<Decimal>,
    /// Regular shelf price (`price` on the wire)
    #[serde(default, rename = "price")]
    pub regular_price: Option<Decimal>,
    #[serde(default)]
    pub discounted_price: Option<Decimal>,
    #[serde(default)]
    pub discount_rate_pct: Option<Decimal>,
    #[serde(default)]
    pub start_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_at: Option<DateTime<Utc>>,
}

/// Checkpoint partition key: one checkpoint per (provider, branch, kind)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub provider: String,
    pub branch: String,
    pub kind: SnapshotKind,
}

impl PartitionKey {
    /// `provider#branch#kind` storage encoding
    pub fn storage_key(&self) -> String {
        format!("{}#{}#{}", self.provider, self.branch, self.kind)
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.provider, self.branch, self.kind)
    }
}
