//! Price History Provider
//!
//! Historical price snapshots, one row per (asset, time). Writes are
//! last-write-wins upserts keyed by the normalized timestamp.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use folio_common::price::PricePoint;
use uuid::Uuid;

use crate::core::error::StorageError;

#[async_trait]
pub trait PriceHistoryProvider {
    async fn upsert_price_point(&self, point: &PricePoint) -> Result<(), StorageError>;

    /// Most recent snapshot not older than `max_age` as of `now`.
    async fn get_recent_price(
        &self,
        asset_id: Uuid,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<PricePoint>, StorageError>;

    /// Snapshot for the given UTC calendar date, if any.
    async fn get_price_at(
        &self,
        asset_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<PricePoint>, StorageError>;
}
