// Time helpers shared by the ledger and the price oracle.
//
// All wall-clock reads go through here so tests can reason about them in one
// place. Historical price lookups are keyed by UTC calendar date.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};

#[inline]
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

// The UTC calendar date a timestamp falls on
pub fn utc_date(at: DateTime<Utc>) -> NaiveDate {
    at.date_naive()
}

// Midnight UTC of the given date
pub fn date_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"))
}

// Whether the timestamp falls on the current UTC day
pub fn is_today(at: DateTime<Utc>) -> bool {
    utc_date(at) == utc_date(now())
}
