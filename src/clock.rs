use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use uuid::Uuid;

/// Display format for every timestamp the board assigns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats older pages wrote; tried in order when sorting.
const ACCEPTED_FORMATS: &[&str] = &[
    TIMESTAMP_FORMAT,
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
];

/// Source of fresh ids and creation times.
///
/// Injected into the normalizer and repository so tests can pin both.
pub trait Stamper: Send {
    fn next_id(&self) -> String;
    fn now(&self) -> String;
}

/// Wall-clock stamper used outside tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemStamper;

impl Stamper for SystemStamper {
    fn next_id(&self) -> String {
        let millis = Local::now().timestamp_millis();
        let random = Uuid::new_v4().simple().to_string();
        format!("msg-{millis}-{}", &random[..10])
    }

    fn now(&self) -> String {
        Local::now().format(TIMESTAMP_FORMAT).to_string()
    }
}

/// Parses a stored timestamp; `None` means it sorts after every valid one.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.naive_local());
    }
    ACCEPTED_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
