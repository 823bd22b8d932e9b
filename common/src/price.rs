// Price history and oracle result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::amount::Amount;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PriceSource {
    Provider,
    Manual,
}

/// One historical price observation, USD scaled by 10^8.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub asset_id: Uuid,
    pub time: DateTime<Utc>,
    pub price_usd: Amount,
    pub source: PriceSource,
}

/// How fresh a resolved price is.
///
/// `Stale` is a success with a warning attached, not an error: callers may
/// proceed but can surface the age to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum Freshness {
    Fresh,
    // The observation time is carried when the serving layer knows it
    Stale { as_of: Option<DateTime<Utc>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub price: Amount,
    pub freshness: Freshness,
}

impl PriceQuote {
    pub fn fresh(price: Amount) -> Self {
        Self {
            price,
            freshness: Freshness::Fresh,
        }
    }

    pub fn stale(price: Amount, as_of: Option<DateTime<Utc>>) -> Self {
        Self {
            price,
            freshness: Freshness::Stale { as_of },
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self.freshness, Freshness::Stale { .. })
    }
}
