//! Reconciliation engine
//!
//! Pure, timestamp-ordered merge of price and promo facts into the
//! current-state projection. Both entry points are functions of
//! (existing rows, incoming facts, evaluation timestamp) and produce the
//! complete upsert rows for the idempotent writer — no I/O, so the whole
//! merge policy is testable without a database.
//!
//! The merge is monotonic: a fact whose timestamp is not strictly newer than
//! the matching `last_price_ts`/`last_promo_ts` produces no row, which is
//! what makes at-least-once redelivery a no-op at this layer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::models::{CurrentItemState, ItemFact, LedgerRow, Snapshot};

/// Merge one price snapshot into the projection.
///
/// A fact is stale when the existing row already carries a price at least as
/// new; stale facts are dropped per item, not per snapshot. Accepted facts
/// overwrite the descriptive fields and `last_price_ts`, carry any promo
/// fields forward unchanged, and keep the previous `regular_price` when the
/// incoming fact has none.
pub fn merge_price_facts(
    chain_id: &str,
    store_id: &str,
    ts: DateTime<Utc>,
    items: &[ItemFact],
    existing_by_code: &HashMap<String, CurrentItemState>,
) -> Vec<CurrentItemState> {
    let mut out = Vec::new();
    for it in items {
        let code = it.code.trim();
        if code.is_empty() {
            continue;
        }

        let existing = existing_by_code.get(code);
        if let Some(ex) = existing
            && let Some(last) = ex.last_price_ts
            && ts <= last
        {
            continue;
        }

        let mut row = existing
            .cloned()
            .unwrap_or_else(|| CurrentItemState::new(chain_id, store_id, code));
        row.name = it.name.clone();
        row.brand = it.brand.clone();
        row.unit = it.unit.clone();
        row.qty = it.qty;
        row.unit_price = it.unit_price;
        row.regular_price = it.regular_price.or(row.regular_price);
        row.last_price_ts = Some(ts);
        out.push(row);
    }
    out
}

/// Merge one promo snapshot into the projection.
///
/// A promo can never create a product: codes without an existing row (or
/// without a known regular price) are ignored. Among the candidates for a
/// code, the lowest computed promo price wins; ties go to the first
/// candidate in input order. When no candidate survives and the row still
/// shows a promo, a newer snapshot clears it.
pub fn merge_promo_facts(
    ts: DateTime<Utc>,
    items: &[ItemFact],
    existing_by_code: &HashMap<String, CurrentItemState>,
) -> Vec<CurrentItemState> {
    let mut out = Vec::new();
    for code in codes_in_order(items) {
        let Some(ex) = existing_by_code.get(&code) else {
            continue;
        };

        let best = best_promo_for_code(&code, items, ex.regular_price, ts);
        let newer = ex.last_promo_ts.is_none_or(|last| ts > last);

        match best {
            None => {
                if ex.has_active_promo() && newer {
                    let mut row = ex.clone();
                    row.promo_price = None;
                    row.promo_start = None;
                    row.promo_end = None;
                    row.last_promo_ts = Some(ts);
                    out.push(row);
                }
            }
            Some((price, start, end)) => {
                if newer {
                    let mut row = ex.clone();
                    row.promo_price = Some(price);
                    row.promo_start = start;
                    row.promo_end = end;
                    row.last_promo_ts = Some(ts);
                    out.push(row);
                }
            }
        }
    }
    out
}

/// Ledger rows for the accepted facts of one snapshot.
pub fn build_ledger_rows(snapshot: &Snapshot, upserts: &[CurrentItemState]) -> Vec<LedgerRow> {
    upserts
        .iter()
        .map(|row| LedgerRow {
            provider: snapshot.provider.clone(),
            branch: snapshot.branch.clone(),
            kind: snapshot.kind,
            ts: snapshot.timestamp,
            code: row.code.clone(),
            price: row.regular_price,
            promo_price: row.promo_price,
            source_ref: snapshot.src_key.clone(),
        })
        .collect()
}

/// Clear promo fields on rows whose window closed before `now`. Returns the
/// number of rows cleared. Regular price and both cursors are untouched, so
/// a later promo snapshot is still gated correctly.
pub fn expire_stale_promos<'a>(
    rows: impl IntoIterator<Item = &'a mut CurrentItemState>,
    now: DateTime<Utc>,
) -> u64 {
    let mut cleared = 0;
    for row in rows {
        if row.promo_end.is_some_and(|end| end < now) {
            row.promo_price = None;
            row.promo_start = None;
            row.promo_end = None;
            cleared += 1;
        }
    }
    cleared
}

/// Distinct non-blank codes in first-appearance order (deterministic
/// tie-breaking depends on this).
fn codes_in_order(items: &[ItemFact]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for it in items {
        let code = it.code.trim();
        if !code.is_empty() && seen.insert(code.to_string()) {
            out.push(code.to_string());
        }
    }
    out
}

fn window_active(fact: &ItemFact, at: DateTime<Utc>) -> bool {
    if let Some(start) = fact.start_at
        && start > at
    {
        return false;
    }
    if let Some(end) = fact.end_at
        && end < at
    {
        return false;
    }
    true
}

/// Lowest surviving promo price for a code, with its validity window.
///
/// Candidates outside their window, without any price information, or not an
/// actual discount are dropped. Rate-derived prices are rounded to 2
/// decimals with banker's rounding.
fn best_promo_for_code(
    code: &str,
    items: &[ItemFact],
    regular_price: Option<Decimal>,
    at: DateTime<Utc>,
) -> Option<(Decimal, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    let regular = regular_price?;
    let mut best: Option<(Decimal, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> = None;

    for fact in items.iter().filter(|it| it.code.trim() == code) {
        if !window_active(fact, at) {
            continue;
        }

        let promo_price = match (fact.discounted_price, fact.discount_rate_pct) {
            (Some(abs), _) => abs,
            (None, Some(rate)) => {
                (regular * (Decimal::ONE - rate / Decimal::ONE_HUNDRED)).round_dp(2)
            }
            (None, None) => continue,
        };

        if promo_price >= regular {
            continue;
        }

        // strict less-than keeps the first candidate on ties
        if best.as_ref().is_none_or(|(b, _, _)| promo_price < *b) {
            best = Some((promo_price, fact.start_at, fact.end_at));
        }
    }
    best
}
