//! Current-state and ledger writer
//!
//! Applies one reconciled snapshot atomically: the current-state upserts and
//! the matching ledger rows commit in a single transaction. The upserts are
//! idempotent under redelivery because the engine already gated on
//! timestamps and the SQL gates again with GREATEST/COALESCE; ledger inserts
//! dedupe on their natural key.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use shared::{CurrentItemState, LedgerRow, PipelineError};

#[async_trait]
pub trait StateWriter: Send + Sync {
    /// Load the current rows for the given codes in one store.
    async fn fetch_existing(
        &self,
        store_id: &str,
        codes: &[String],
    ) -> Result<HashMap<String, CurrentItemState>, PipelineError>;

    /// Commit post-merge rows and their ledger records in one transaction.
    async fn apply(
        &self,
        upserts: &[CurrentItemState],
        ledger: &[LedgerRow],
    ) -> Result<(), PipelineError>;

    /// Clear promo fields on rows whose window has closed. Returns the
    /// number of rows cleared.
    async fn expire_promos(&self, now: DateTime<Utc>) -> Result<u64, PipelineError>;
}

pub struct PgStateWriter {
    pool: PgPool,
}

impl PgStateWriter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateWriter for PgStateWriter {
    async fn fetch_existing(
        &self,
        store_id: &str,
        codes: &[String],
    ) -> Result<HashMap<String, CurrentItemState>, PipelineError> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }
        let rows: Vec<CurrentItemState> = sqlx::query_as(
            r#"
            SELECT chain_id, store_id, code, name, brand, unit, qty, unit_price,
                   regular_price, promo_price, promo_start, promo_end,
                   last_price_ts, last_promo_ts
            FROM items_current
            WHERE store_id = $1 AND code = ANY($2)
            "#,
        )
        .bind(store_id)
        .bind(codes)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| (r.code.clone(), r)).collect())
    }

    async fn apply(
        &self,
        upserts: &[CurrentItemState],
        ledger: &[LedgerRow],
    ) -> Result<(), PipelineError> {
        if upserts.is_empty() && ledger.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;

        for row in upserts {
            sqlx::query(
                r#"
                INSERT INTO items_current (
                    chain_id, store_id, code, name, brand, unit, qty, unit_price,
                    regular_price, promo_price, promo_start, promo_end,
                    last_price_ts, last_promo_ts, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW())
                ON CONFLICT (store_id, code) DO UPDATE SET
                    chain_id = EXCLUDED.chain_id,
                    name = EXCLUDED.name,
                    brand = EXCLUDED.brand,
                    unit = EXCLUDED.unit,
                    qty = EXCLUDED.qty,
                    unit_price = EXCLUDED.unit_price,
                    regular_price = COALESCE(EXCLUDED.regular_price, items_current.regular_price),
                    promo_price = EXCLUDED.promo_price,
                    promo_start = EXCLUDED.promo_start,
                    promo_end = EXCLUDED.promo_end,
                    last_price_ts = GREATEST(items_current.last_price_ts, EXCLUDED.last_price_ts),
                    last_promo_ts = GREATEST(items_current.last_promo_ts, EXCLUDED.last_promo_ts),
                    updated_at = NOW()
                "#,
            )
            .bind(&row.chain_id)
            .bind(&row.store_id)
            .bind(&row.code)
            .bind(&row.name)
            .bind(&row.brand)
            .bind(&row.unit)
            .bind(row.qty)
            .bind(row.unit_price)
            .bind(row.regular_price)
            .bind(row.promo_price)
            .bind(row.promo_start)
            .bind(row.promo_end)
            .bind(row.last_price_ts)
            .bind(row.last_promo_ts)
            .execute(&mut *tx)
            .await?;
        }

        for row in ledger {
            sqlx::query(
                r#"
                INSERT INTO price_ledger (provider, branch, doc_type, ts, code,
                                          price, promo_price, source_ref)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (provider, branch, doc_type, ts, code) DO NOTHING
                "#,
            )
            .bind(&row.provider)
            .bind(&row.branch)
            .bind(row.kind.as_str())
            .bind(row.ts)
            .bind(&row.code)
            .bind(row.price)
            .bind(row.promo_price)
            .bind(row.source_ref.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn expire_promos(&self, now: DateTime<Utc>) -> Result<u64, PipelineError> {
        let res = sqlx::query(
            r#"
            UPDATE items_current
            SET promo_price = NULL, promo_start = NULL, promo_end = NULL, updated_at = NOW()
            WHERE promo_end IS NOT NULL AND promo_end < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}
