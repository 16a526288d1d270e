//! Current-state projection and ledger rows

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::snapshot::SnapshotKind;

/// Latest known truth for one (store, product code)
///
/// Also the upsert row the reconciliation engine emits: an emitted value is
/// the complete post-merge row, ready for the idempotent writer.
///
/// Invariants: `last_price_ts` and `last_promo_ts` never move backwards;
/// `promo_price`, when present, is strictly below `regular_price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "db", derive(sqlx::FromRow))]
pub struct CurrentItemState {
    pub chain_id: String,
    pub store_id: String,
    pub code: String,
    pub name: Option<String>,
    pub brand: Option<String>,
    pub unit: Option<String>,
    pub qty: Option<Decimal>,
    pub unit_price: Option<Decimal>,
    pub regular_price: Option<Decimal>,
    pub promo_price: Option<Decimal>,
    pub promo_start: Option<DateTime<Utc>>,
    pub promo_end: Option<DateTime<Utc>>,
    pub last_price_ts: Option<DateTime<Utc>>,
    pub last_promo_ts: Option<DateTime<Utc>>,
}

impl CurrentItemState {
    /// Blank row for a code that has never been seen before.
    pub fn new(chain_id: &str, store_id: &str, code: &str) -> Self {
        Self {
            chain_id: chain_id.to_string(),
            store_id: store_id.to_string(),
            code: code.to_string(),
            name: None,
            brand: None,
            unit: None,
            qty: None,
            unit_price: None,
            regular_price: None,
            promo_price: None,
            promo_start: None,
            promo_end: None,
            last_price_ts: None,
            last_promo_ts: None,
        }
    }

    pub fn has_active_promo(&self) -> bool {
        self.promo_price.is_some()
    }
}

/// Append-only record of one accepted fact
///
/// Unique on (provider, branch, kind, ts, code); a duplicate delivery hits
/// the unique key and is silently ignored at the storage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    pub provider: String,
    pub branch: String,
    pub kind: SnapshotKind,
    pub ts: DateTime<Utc>,
    pub code: String,
    pub price: Option<Decimal>,
    pub promo_price: Option<Decimal>,
    pub source_ref: Option<String>,
}
