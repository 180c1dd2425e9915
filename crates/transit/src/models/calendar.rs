//! Service day arithmetic.
//!
//! A transit service day does not end at midnight: trips running at 1am still
//! belong to the previous day's schedule. The backend rolls the service day
//! over at 3am agency-local time.

use chrono::{DateTime, Days, NaiveDate, TimeZone, Timelike};

/// Local hour at which a new service day begins.
pub const SERVICE_DAY_START_HOUR: u32 = 3;

/// How to treat an instant that lands exactly on the service day boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ServiceDateRounding {
    /// 03:00 belongs to the service day that is starting.
    #[default]
    Forwards,
    /// 03:00 belongs to the service day that is ending (used for end times).
    Backwards,
}

/// Service date of `at`, evaluated in `at`'s own time zone.
///
/// Callers are expected to convert into the agency's local zone first.
pub fn service_date<Tz: TimeZone>(at: &DateTime<Tz>) -> NaiveDate {
    service_date_rounded(at, ServiceDateRounding::Forwards)
}

pub fn service_date_rounded<Tz: TimeZone>(
    at: &DateTime<Tz>,
    rounding: ServiceDateRounding,
) -> NaiveDate {
    let local = at.naive_local();
    let date = local.date();
    let before_start = local.hour() < SERVICE_DAY_START_HOUR
        || (rounding == ServiceDateRounding::Backwards
            && local.hour() == SERVICE_DAY_START_HOUR
            && local.minute() == 0
            && local.second() == 0);

    if before_start {
        date.checked_sub_days(Days::new(1)).unwrap_or(date)
    } else {
        date
    }
}
