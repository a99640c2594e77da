use chrono::{DateTime, NaiveTime, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};

use crate::{
    records::{Document, number},
    time::{TimeRange, localize},
};

const SECS_PER_DAY: u32 = 86_400;

/// One entry of a daily basal profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BasalSegment {
    /// Seconds after local midnight
    pub start: u32,
    /// U/h
    pub rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatePoint {
    pub time: DateTime<Utc>,
    pub rate: f64,
}

/// A repeating daily basal profile.
///
/// Always holds at least one segment, sorted by start with unique starts.
#[derive(Debug, Clone, PartialEq)]
pub struct BasalSchedule {
    segments: Vec<BasalSegment>,
    timezone: Option<Tz>,
}

impl BasalSchedule {
    /// Extracts the basal schedule from a Nightscout profile document.
    ///
    /// Handles both the Loop/OpenAPS layout (`store.basalprofile`) and the
    /// Nightscout profile editor layout (`store.<name>.basal`).
    pub fn from_profile(doc: &Document) -> Option<Self> {
        let (list, owner) = locate_segments(doc)?;

        let timezone = owner
            .get("timezone")
            .or_else(|| doc.get("timezone"))
            .and_then(Value::as_str)
            .and_then(|name| name.parse::<Tz>().ok());

        Self::from_segments(list.iter().filter_map(parse_segment), timezone)
    }

    pub fn from_segments(
        segments: impl IntoIterator<Item = BasalSegment>,
        timezone: Option<Tz>,
    ) -> Option<Self> {
        let mut sorted: Vec<BasalSegment> = segments.into_iter().collect();
        sorted.sort_by_key(|seg| seg.start);

        // Later duplicates win
        let mut segments: Vec<BasalSegment> = Vec::with_capacity(sorted.len());
        for seg in sorted {
            match segments.last_mut() {
                Some(last) if last.start == seg.start => *last = seg,
                _ => segments.push(seg),
            }
        }

        if segments.is_empty() {
            return None;
        }

        Some(Self { segments, timezone })
    }

    pub fn segments(&self) -> &[BasalSegment] {
        &self.segments
    }

    /// Timezone declared by the profile itself, if any.
    pub fn timezone(&self) -> Option<Tz> {
        self.timezone
    }

    fn effective_tz(&self, fallback: Tz) -> Tz {
        self.timezone.unwrap_or(fallback)
    }

    fn rate_at_secs(&self, secs: u32) -> f64 {
        // Before the first segment, the last one from the previous day still applies
        self.segments
            .iter()
            .rev()
            .find(|seg| seg.start <= secs)
            .or(self.segments.last())
            .map_or(0., |seg| seg.rate)
    }

    /// Scheduled rate at `time`. `tz` is used unless the profile names its own timezone.
    pub fn rate_at(&self, time: DateTime<Utc>, tz: Tz) -> f64 {
        let local = time.with_timezone(&self.effective_tz(tz));

        self.rate_at_secs(local.num_seconds_from_midnight())
    }

    /// Expands the schedule into a step series over `range`.
    ///
    /// Each point marks the start of a rate that holds until the next point. The
    /// series always starts at `range.start()` and ends at `range.end()`.
    pub fn build(&self, range: &TimeRange, tz: Tz) -> Vec<RatePoint> {
        let tz = self.effective_tz(tz);

        let first_day = range.start().with_timezone(&tz).date_naive();
        let last_day = range.end().with_timezone(&tz).date_naive();

        let mut points = vec![RatePoint {
            time: range.start(),
            rate: self.rate_at(range.start(), tz),
        }];

        for day in first_day.iter_days().take_while(|day| *day <= last_day) {
            let midnight = day.and_time(NaiveTime::MIN);

            for seg in &self.segments {
                let Some(wall) = midnight.checked_add_signed(TimeDelta::seconds(seg.start.into()))
                else {
                    break;
                };
                let time = localize(wall, tz);

                if time > range.start() && time < range.end() {
                    points.push(RatePoint {
                        time,
                        rate: seg.rate,
                    });
                }
            }
        }

        points.push(RatePoint {
            time: range.end(),
            rate: self.rate_at(range.end(), tz),
        });

        points.sort_by_key(|point| point.time);
        points
    }
}

/// Finds the segment list and the object holding it.
fn locate_segments(doc: &Document) -> Option<(&[Value], &Map<String, Value>)> {
    if let Some(store) = doc.get("store").and_then(Value::as_object) {
        if let Some(list) = store.get("basalprofile").and_then(Value::as_array) {
            return Some((list.as_slice(), store));
        }

        let default = doc
            .get("defaultProfile")
            .and_then(Value::as_str)
            .and_then(|name| store.get(name))
            .and_then(Value::as_object);

        let found = default
            .into_iter()
            .chain(store.values().filter_map(Value::as_object))
            .find_map(|profile| {
                let list = profile.get("basal").and_then(Value::as_array)?;
                Some((list.as_slice(), profile))
            });

        if found.is_some() {
            return found;
        }
    }

    ["basalprofile", "basal"]
        .iter()
        .find_map(|key| doc.get(*key).and_then(Value::as_array))
        .map(|list| (list.as_slice(), doc))
}

fn parse_segment(value: &Value) -> Option<BasalSegment> {
    let seg = value.as_object()?;

    let start = segment_start(seg)?;
    let rate = ["rate", "value", "v"]
        .iter()
        .find_map(|key| seg.get(*key).and_then(number))
        .filter(|rate| *rate >= 0.)?;

    Some(BasalSegment { start, rate })
}

fn segment_start(seg: &Map<String, Value>) -> Option<u32> {
    let get = |key: &str| seg.get(key).and_then(number);
    let clock = |key: &str| {
        seg.get(key)
            .and_then(Value::as_str)
            .and_then(parse_clock)
            .map(f64::from)
    };

    // `i` is only trusted as minutes when nothing more explicit is present
    let secs = get("minutes")
        .map(|mins| mins * 60.)
        .or_else(|| get("timeAsSeconds"))
        .or_else(|| clock("time"))
        .or_else(|| clock("start"))
        .or_else(|| get("i").map(|mins| mins * 60.))?;

    (0. ..f64::from(SECS_PER_DAY))
        .contains(&secs)
        .then_some(secs as u32)
}

/// Parses "HH:MM" or "HH:MM:SS" into seconds after midnight.
fn parse_clock(s: &str) -> Option<u32> {
    let mut parts = s.trim().split(':').map(|x| x.parse::<u32>().ok());

    let hours = parts.next()??;
    let minutes = parts.next()??;
    let seconds = parts.next().unwrap_or(Some(0))?;

    if parts.next().is_some() || hours >= 24 || minutes >= 60 || seconds >= 60 {
        return None;
    }

    Some(hours * 3600 + minutes * 60 + seconds)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().to_utc()
    }

    fn schedule(doc: Value) -> BasalSchedule {
        BasalSchedule::from_profile(doc.as_object().unwrap()).unwrap()
    }

    fn rates(points: &[RatePoint]) -> Vec<(String, f64)> {
        points
            .iter()
            .map(|p| (p.time.format("%d %H:%M").to_string(), p.rate))
            .collect()
    }

    #[test]
    fn loop_store_with_minute_offsets() {
        let sched = schedule(json!({
            "store": {
                "basalprofile": [
                    { "i": 0, "rate": 0.8 },
                    { "i": 360, "rate": 1.0 },
                    { "i": 1320, "rate": 0.7 },
                ]
            }
        }));

        let range =
            TimeRange::new(utc("2024-03-10T00:00:00Z"), utc("2024-03-10T23:59:00Z")).unwrap();
        let points = sched.build(&range, chrono_tz::UTC);

        assert_eq!(
            rates(&points),
            [
                ("10 00:00".to_string(), 0.8),
                ("10 06:00".to_string(), 1.0),
                ("10 22:00".to_string(), 0.7),
                ("10 23:59".to_string(), 0.7),
            ]
        );
    }

    #[test]
    fn openaps_minutes_take_precedence_over_index() {
        let sched = schedule(json!({
            "store": {
                "basalprofile": [
                    { "i": 0, "minutes": 0, "start": "00:00:00", "rate": 0.5 },
                    { "i": 1, "minutes": 480, "start": "08:00:00", "rate": 0.9 },
                ]
            }
        }));

        let starts: Vec<_> = sched.segments().iter().map(|s| s.start).collect();
        assert_eq!(starts, [0, 480 * 60]);
    }

    #[test]
    fn nightscout_named_profile() {
        let sched = schedule(json!({
            "defaultProfile": "Weekday",
            "store": {
                "Weekend": {
                    "basal": [{ "time": "00:00", "value": 2.0 }]
                },
                "Weekday": {
                    "timezone": "America/New_York",
                    "basal": [
                        { "time": "00:00", "value": "0.6", "timeAsSeconds": 0 },
                        { "time": "07:30", "value": 0.85 },
                        { "timeAsSeconds": 79200, "v": 0.55 },
                    ]
                }
            }
        }));

        assert_eq!(sched.timezone(), Some(chrono_tz::America::New_York));
        assert_eq!(
            sched.segments(),
            [
                BasalSegment { start: 0, rate: 0.6 },
                BasalSegment { start: 27000, rate: 0.85 },
                BasalSegment { start: 79200, rate: 0.55 },
            ]
        );

        // 12:00 UTC is 08:00 in New York during summer time
        assert_eq!(
            sched.rate_at(utc("2024-07-01T12:00:00Z"), chrono_tz::UTC),
            0.85
        );
    }

    #[test]
    fn falls_back_to_first_store_entry_and_top_level_lists() {
        let sched = schedule(json!({
            "defaultProfile": "missing",
            "store": { "Only": { "basal": [{ "time": "00:00", "value": 1.1 }] } }
        }));
        assert_eq!(sched.segments()[0].rate, 1.1);

        let sched = schedule(json!({ "basal": [{ "time": "06:00", "rate": 0.4 }] }));
        assert_eq!(sched.segments()[0].start, 6 * 3600);
    }

    #[test]
    fn invalid_segments_are_skipped() {
        let sched = schedule(json!({
            "basalprofile": [
                { "i": 0, "rate": 0.8 },
                { "i": 1440, "rate": 9.0 },
                { "i": -30, "rate": 9.0 },
                { "time": "25:00", "rate": 9.0 },
                { "time": "10:00", "rate": -1 },
                { "time": "11:00" },
                { "rate": 9.0 },
                "garbage",
            ]
        }));

        assert_eq!(sched.segments(), [BasalSegment { start: 0, rate: 0.8 }]);
    }

    #[test]
    fn empty_or_missing_schedule() {
        let doc = json!({ "store": { "basalprofile": [] } });
        assert!(BasalSchedule::from_profile(doc.as_object().unwrap()).is_none());

        let doc = json!({ "units": "mmol" });
        assert!(BasalSchedule::from_profile(doc.as_object().unwrap()).is_none());
    }

    #[test]
    fn duplicate_starts_keep_last() {
        let sched = BasalSchedule::from_segments(
            [
                BasalSegment { start: 3600, rate: 1.0 },
                BasalSegment { start: 0, rate: 0.5 },
                BasalSegment { start: 3600, rate: 1.5 },
            ],
            None,
        )
        .unwrap();

        assert_eq!(
            sched.segments(),
            [
                BasalSegment { start: 0, rate: 0.5 },
                BasalSegment { start: 3600, rate: 1.5 },
            ]
        );
    }

    #[test]
    fn rate_before_first_segment_wraps_to_previous_day() {
        let sched = BasalSchedule::from_segments(
            [
                BasalSegment { start: 3 * 3600, rate: 1.0 },
                BasalSegment { start: 20 * 3600, rate: 0.3 },
            ],
            None,
        )
        .unwrap();

        assert_eq!(sched.rate_at(utc("2024-01-02T01:00:00Z"), chrono_tz::UTC), 0.3);
        assert_eq!(sched.rate_at(utc("2024-01-02T03:00:00Z"), chrono_tz::UTC), 1.0);
    }

    #[test]
    fn multi_day_range_repeats_segments() {
        let sched = BasalSchedule::from_segments(
            [
                BasalSegment { start: 0, rate: 0.5 },
                BasalSegment { start: 12 * 3600, rate: 1.0 },
            ],
            None,
        )
        .unwrap();

        let range =
            TimeRange::new(utc("2024-01-01T18:00:00Z"), utc("2024-01-03T06:00:00Z")).unwrap();
        let points = sched.build(&range, chrono_tz::UTC);

        assert_eq!(
            rates(&points),
            [
                ("01 18:00".to_string(), 1.0),
                ("02 00:00".to_string(), 0.5),
                ("02 12:00".to_string(), 1.0),
                ("03 00:00".to_string(), 0.5),
                ("03 06:00".to_string(), 0.5),
            ]
        );
    }

    #[test]
    fn segments_follow_local_midnight() {
        let sched = BasalSchedule::from_segments(
            [
                BasalSegment { start: 0, rate: 0.5 },
                BasalSegment { start: 6 * 3600, rate: 1.0 },
            ],
            None,
        )
        .unwrap();

        // Berlin is UTC+1 in January
        let range =
            TimeRange::new(utc("2024-01-01T00:00:00Z"), utc("2024-01-01T12:00:00Z")).unwrap();
        let points = sched.build(&range, chrono_tz::Europe::Berlin);

        assert_eq!(
            rates(&points),
            [
                ("01 00:00".to_string(), 0.5),
                ("01 05:00".to_string(), 1.0),
                ("01 12:00".to_string(), 1.0),
            ]
        );
    }

    fn berlin_day_schedule() -> BasalSchedule {
        BasalSchedule::from_segments(
            [
                BasalSegment { start: 0, rate: 0.5 },
                BasalSegment { start: 9000, rate: 1.0 },
                BasalSegment { start: 12 * 3600, rate: 0.8 },
            ],
            None,
        )
        .unwrap()
    }

    #[test]
    fn segment_in_spring_forward_gap_keeps_winter_offset() {
        // 02:30 does not exist in Berlin on 2024-03-31, it is read as 02:30 CET
        let range =
            TimeRange::new(utc("2024-03-30T23:00:00Z"), utc("2024-03-31T12:00:00Z")).unwrap();
        let points = berlin_day_schedule().build(&range, chrono_tz::Europe::Berlin);

        assert_eq!(
            rates(&points),
            [
                ("30 23:00".to_string(), 0.5),
                ("31 01:30".to_string(), 1.0),
                ("31 10:00".to_string(), 0.8),
                ("31 12:00".to_string(), 0.8),
            ]
        );
    }

    #[test]
    fn segment_in_repeated_hour_uses_first_occurrence() {
        // 02:30 happens twice in Berlin on 2024-10-27, the CEST one comes first
        let range =
            TimeRange::new(utc("2024-10-26T22:00:00Z"), utc("2024-10-27T12:00:00Z")).unwrap();
        let points = berlin_day_schedule().build(&range, chrono_tz::Europe::Berlin);

        assert_eq!(
            rates(&points),
            [
                ("26 22:00".to_string(), 0.5),
                ("27 00:30".to_string(), 1.0),
                ("27 11:00".to_string(), 0.8),
                ("27 12:00".to_string(), 0.8),
            ]
        );
    }

    #[test]
    fn profile_timezone_drives_the_expansion() {
        let sched = schedule(json!({
            "defaultProfile": "Default",
            "store": {
                "Default": {
                    "timezone": "America/New_York",
                    "basal": [
                        { "time": "00:00", "value": 0.5 },
                        { "time": "06:00", "value": 1.0 },
                    ]
                }
            }
        }));

        // New York is UTC-5 in January, the dashboard zone is ignored
        let range =
            TimeRange::new(utc("2024-01-01T00:00:00Z"), utc("2024-01-01T18:00:00Z")).unwrap();
        let points = sched.build(&range, chrono_tz::Europe::Berlin);

        assert_eq!(
            rates(&points),
            [
                ("01 00:00".to_string(), 1.0),
                ("01 05:00".to_string(), 0.5),
                ("01 11:00".to_string(), 1.0),
                ("01 18:00".to_string(), 1.0),
            ]
        );
    }

    #[test]
    fn range_at_the_end_of_the_calendar_does_not_overflow() {
        let sched = berlin_day_schedule();

        let end = NaiveDate::MAX.and_hms_opt(23, 0, 0).unwrap().and_utc();
        let range = TimeRange::new(end - TimeDelta::days(2), end).unwrap();
        let points = sched.build(&range, chrono_tz::UTC);

        assert_eq!(points.first().unwrap().time, range.start());
        assert_eq!(points.last().unwrap().time, range.end());
    }

    #[test]
    fn parses_clock_strings() {
        assert_eq!(parse_clock("00:00"), Some(0));
        assert_eq!(parse_clock("07:30"), Some(27000));
        assert_eq!(parse_clock("23:59:59"), Some(86399));
        assert_eq!(parse_clock("24:00"), None);
        assert_eq!(parse_clock("7"), None);
        assert_eq!(parse_clock("01:02:03:04"), None);
    }
}
