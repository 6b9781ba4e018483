use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

/// Render a timestamp the way the data service stores it.
///
/// Fixed microsecond precision with a `Z` suffix keeps stored values
/// lexically ordered, so `created_at < cursor` comparisons on text columns
/// agree with chronological order.
pub fn format(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Current server time truncated to the stored precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}
