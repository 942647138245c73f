//! Expiry values accepted by `set`.
//!
//! An expiry can be given as milliseconds since the Unix epoch, as a date
//! value, or as a string. Strings are tried as an HTTP-date (IMF-fixdate, then
//! asctime) and finally as RFC 3339.

use std::time::{SystemTime, UNIX_EPOCH};

use time::format_description::well_known::Rfc3339;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::engine::errors::CookieError;

/// `Sun, 06 Nov 1994 08:49:37 GMT`
const IMF_FIXDATE: &[BorrowedFormatItem<'_>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// `Sun Nov  6 08:49:37 1994`
const ASCTIME: &[BorrowedFormatItem<'_>] = format_description!(
    "[weekday repr:short] [month repr:short] [day padding:space] [hour]:[minute]:[second] [year]"
);

/// An absolute expiry as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expires {
    EpochMillis(i64),
    Date(OffsetDateTime),
    /// Converted on use; instants past the calendar range are rejected then.
    SystemTime(SystemTime),
    HttpDate(String),
}

impl Expires {
    /// Converts the expiry into milliseconds since the Unix epoch.
    ///
    /// Values outside the representable calendar range are `LimitExceeded`,
    /// unparseable strings are `DateParse`.
    pub fn to_epoch_millis(&self) -> Result<i64, CookieError> {
        match self {
            Expires::EpochMillis(ms) => checked_millis(*ms),
            Expires::Date(dt) => Ok(date_to_millis(*dt)),
            Expires::SystemTime(t) => system_time_to_millis(*t),
            Expires::HttpDate(s) => parse_cookie_date(s).map(date_to_millis),
        }
    }
}

impl From<i64> for Expires {
    fn from(ms: i64) -> Self {
        Expires::EpochMillis(ms)
    }
}

impl From<OffsetDateTime> for Expires {
    fn from(dt: OffsetDateTime) -> Self {
        Expires::Date(dt)
    }
}

impl From<SystemTime> for Expires {
    fn from(t: SystemTime) -> Self {
        Expires::SystemTime(t)
    }
}

impl From<&str> for Expires {
    fn from(s: &str) -> Self {
        Expires::HttpDate(s.to_string())
    }
}

impl From<String> for Expires {
    fn from(s: String) -> Self {
        Expires::HttpDate(s)
    }
}

fn checked_millis(ms: i64) -> Result<i64, CookieError> {
    let nanos = i128::from(ms) * 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos).map_err(|_| {
        CookieError::LimitExceeded(format!("expiry {ms} is outside the supported date range"))
    })?;
    Ok(ms)
}

fn system_time_to_millis(t: SystemTime) -> Result<i64, CookieError> {
    let out_of_range =
        || CookieError::LimitExceeded(format!("expiry {t:?} is outside the supported date range"));
    let ms = match t.duration_since(UNIX_EPOCH) {
        Ok(after) => i64::try_from(after.as_millis()).map_err(|_| out_of_range())?,
        Err(before) => i64::try_from(before.duration().as_millis())
            .map(|ms| -ms)
            .map_err(|_| out_of_range())?,
    };
    checked_millis(ms).map_err(|_| out_of_range())
}

fn date_to_millis(dt: OffsetDateTime) -> i64 {
    // Any OffsetDateTime fits: the calendar range is far inside i64 milliseconds.
    (dt.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Parses an HTTP-date or RFC 3339 timestamp.
pub fn parse_cookie_date(input: &str) -> Result<OffsetDateTime, CookieError> {
    let s = input.trim();

    if let Ok(dt) = PrimitiveDateTime::parse(s, IMF_FIXDATE) {
        return Ok(dt.assume_utc());
    }
    if let Ok(dt) = PrimitiveDateTime::parse(s, ASCTIME) {
        return Ok(dt.assume_utc());
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(dt);
    }

    Err(CookieError::DateParse(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    // 1994-11-06T08:49:37Z
    const RFC_EXAMPLE_MS: i64 = 784_111_777_000;

    #[test]
    fn parses_imf_fixdate() {
        let dt = parse_cookie_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();
        assert_eq!(dt, datetime!(1994-11-06 08:49:37 UTC));
    }

    #[test]
    fn parses_asctime() {
        let dt = parse_cookie_date("Sun Nov  6 08:49:37 1994").unwrap();
        assert_eq!(dt, datetime!(1994-11-06 08:49:37 UTC));
    }

    #[test]
    fn parses_rfc3339() {
        let dt = parse_cookie_date("2030-01-01T00:00:00+01:00").unwrap();
        assert_eq!(dt, datetime!(2029-12-31 23:00:00 UTC));
    }

    #[test]
    fn garbage_is_a_date_parse_error() {
        let err = Expires::from("next tuesday").to_epoch_millis().unwrap_err();
        assert_eq!(err, CookieError::DateParse("next tuesday".into()));
    }

    #[test]
    fn all_forms_agree_on_the_instant() {
        let forms = [
            Expires::from(RFC_EXAMPLE_MS),
            Expires::from(datetime!(1994-11-06 08:49:37 UTC)),
            Expires::from("Sun, 06 Nov 1994 08:49:37 GMT"),
        ];
        for form in forms {
            assert_eq!(form.to_epoch_millis().unwrap(), RFC_EXAMPLE_MS);
        }
    }

    #[test]
    fn out_of_range_millis_is_limit_exceeded() {
        let err = Expires::EpochMillis(i64::MAX).to_epoch_millis().unwrap_err();
        assert!(matches!(err, CookieError::LimitExceeded(_)));
    }

    #[test]
    fn system_time_converts() {
        let t = SystemTime::UNIX_EPOCH + std::time::Duration::from_millis(1_500);
        assert_eq!(Expires::from(t).to_epoch_millis().unwrap(), 1_500);
    }

    #[test]
    fn far_system_time_is_limit_exceeded() {
        let far = SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(400_000_000_000);
        let err = Expires::from(far).to_epoch_millis().unwrap_err();
        assert!(matches!(err, CookieError::LimitExceeded(_)));
    }

    #[test]
    fn system_time_before_the_epoch_is_negative() {
        let t = SystemTime::UNIX_EPOCH - std::time::Duration::from_secs(60);
        assert_eq!(Expires::from(t).to_epoch_millis().unwrap(), -60_000);
    }
}
