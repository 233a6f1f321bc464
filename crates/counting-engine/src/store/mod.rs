pub mod file;
pub mod memory;
pub mod postgres;

pub use file::FileCameraStore;
pub use memory::MemoryStore;
pub use postgres::PgStore;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};

/// UTC bounds `[start, end)` of a local calendar day
pub(crate) fn local_day_bounds(date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = Local
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    let next = date.succ_opt()?;
    let end = Local
        .from_local_datetime(&next.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    Some((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}

/// Local calendar day of a UTC timestamp
pub(crate) fn local_date(timestamp: DateTime<Utc>) -> NaiveDate {
    timestamp.with_timezone(&Local).date_naive()
}
