use anyhow::{Result, bail};
use chrono::{
    DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone, Utc,
};
use chrono_tz::Tz;
use serde_json::{Map, Value};

/// Fields that may carry a document's timestamp, in order of preference.
const TIME_FIELDS: [&str; 4] = ["date", "dateString", "created_at", "time"];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parses a Nightscout timestamp: epoch milliseconds or an ISO-8601 string.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(num) => num
            .as_i64()
            .or_else(|| num.as_f64().filter(|x| x.is_finite()).map(|x| x as i64))
            .and_then(DateTime::from_timestamp_millis),
        Value::String(s) => parse_str(s.trim()),
        _ => None,
    }
}

fn parse_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }

    if let Ok(ms) = s.parse::<i64>() {
        return DateTime::from_timestamp_millis(ms);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.to_utc());
    }

    // Offsets without a colon, e.g. "2024-05-01T10:00:00+0200"
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.to_utc());
    }

    // Anything without an offset is UTC
    let naive = s.trim_end_matches('Z');
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
}

/// Returns the first parseable timestamp among the known time fields.
pub fn pick_time(doc: &Map<String, Value>) -> Option<DateTime<Utc>> {
    TIME_FIELDS
        .iter()
        .filter_map(|key| doc.get(*key))
        .find_map(parse_timestamp)
}

/// Converts a wall-clock time in `tz` to UTC.
///
/// Ambiguous times (clocks going back) resolve to the earlier instant. Times that
/// fall into a gap (clocks going forward) are read with the offset in force
/// before the transition.
pub fn localize(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.to_utc(),
        LocalResult::Ambiguous(earliest, _) => earliest.to_utc(),
        LocalResult::None => {
            let day_before = naive.checked_sub_signed(TimeDelta::days(1)).unwrap_or(naive);
            let before = tz.offset_from_utc_datetime(&day_before).fix();
            naive
                .checked_sub_signed(TimeDelta::seconds(before.local_minus_utc().into()))
                .unwrap_or(naive)
                .and_utc()
        }
    }
}

/// A closed UTC time window, `start` strictly before `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            bail!("end time {end} must be after start time {start}");
        }

        Ok(Self { start, end })
    }

    /// Builds a range from wall-clock dates and times in `tz`.
    pub fn from_local(
        start_date: NaiveDate,
        start_time: NaiveTime,
        end_date: NaiveDate,
        end_time: NaiveTime,
        tz: Tz,
    ) -> Result<Self> {
        let start = localize(start_date.and_time(start_time), tz);
        let end = localize(end_date.and_time(end_time), tz);

        Self::new(start, end)
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn start_ms(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> i64 {
        self.end.timestamp_millis()
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && time <= self.end
    }

    pub fn clamp(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        time.clamp(self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().to_utc()
    }

    #[test]
    fn parses_epoch_millis() {
        let expected = utc("2024-05-01T10:00:00Z");

        assert_eq!(parse_timestamp(&json!(1714557600000_i64)), Some(expected));
        assert_eq!(parse_timestamp(&json!(1714557600000.0)), Some(expected));
        assert_eq!(parse_timestamp(&json!("1714557600000")), Some(expected));
    }

    #[test]
    fn parses_iso_strings() {
        let expected = utc("2024-05-01T10:00:00Z");

        for s in [
            "2024-05-01T10:00:00Z",
            "2024-05-01T10:00:00.000Z",
            "2024-05-01T12:00:00+02:00",
            "2024-05-01T12:00:00+0200",
            "2024-05-01T10:00:00",
            "2024-05-01 10:00:00",
            "2024-05-01T10:00",
        ] {
            assert_eq!(parse_timestamp(&json!(s)), Some(expected), "{s}");
        }
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
        assert_eq!(parse_timestamp(&json!("")), None);
        assert_eq!(parse_timestamp(&json!(null)), None);
        assert_eq!(parse_timestamp(&json!(true)), None);
    }

    #[test]
    fn pick_time_prefers_date_then_falls_back() {
        let doc = json!({
            "date": 1714557600000_i64,
            "dateString": "2020-01-01T00:00:00Z",
        });
        assert_eq!(
            pick_time(doc.as_object().unwrap()),
            Some(utc("2024-05-01T10:00:00Z"))
        );

        let doc = json!({ "date": "nonsense", "created_at": "2024-05-01T10:00:00Z" });
        assert_eq!(
            pick_time(doc.as_object().unwrap()),
            Some(utc("2024-05-01T10:00:00Z"))
        );

        let doc = json!({ "sgv": 120 });
        assert_eq!(pick_time(doc.as_object().unwrap()), None);
    }

    #[test]
    fn range_requires_end_after_start() {
        let t = utc("2024-05-01T10:00:00Z");

        assert!(TimeRange::new(t, t).is_err());
        assert!(TimeRange::new(t, t - TimeDelta::minutes(1)).is_err());

        let range = TimeRange::new(t, t + TimeDelta::hours(1)).unwrap();
        assert_eq!(range.end_ms() - range.start_ms(), 3_600_000);
        assert!(range.contains(t));
        assert!(!range.contains(t - TimeDelta::seconds(1)));
    }

    #[test]
    fn local_range_uses_timezone() {
        let date = NaiveDate::from_ymd_opt(2024, 7, 1).unwrap();
        let range = TimeRange::from_local(
            date,
            NaiveTime::MIN,
            date,
            NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
            chrono_tz::Europe::Berlin,
        )
        .unwrap();

        assert_eq!(range.start(), utc("2024-06-30T22:00:00Z"));
        assert_eq!(range.end(), utc("2024-07-01T21:59:00Z"));
    }

    #[test]
    fn localize_handles_dst_transitions() {
        let tz = chrono_tz::Europe::Berlin;

        // Clocks jump from 02:00 to 03:00
        let gap = NaiveDate::from_ymd_opt(2024, 3, 31)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        assert_eq!(localize(gap, tz), utc("2024-03-31T01:30:00Z"));

        // 02:30 happens twice
        let ambiguous = NaiveDate::from_ymd_opt(2024, 10, 27)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        assert_eq!(localize(ambiguous, tz), utc("2024-10-27T00:30:00Z"));
    }
}
