use chrono::{DateTime, Utc};

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Formats a timestamp the way the `Date` response header expects,
/// e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn format_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
