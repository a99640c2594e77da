use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;

use crate::{
    records::{Dataset, GlucoseEntry, TreatmentKind},
    schedule::{BasalSchedule, RatePoint},
    time::TimeRange,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub units: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarbMarker {
    pub time: DateTime<Utc>,
    pub grams: f64,
}

/// A temp basal as it was actually in effect.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateStep {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub rate: f64,
}

impl RateStep {
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// Everything the three chart panels need, restricted to one range.
#[derive(Debug, Clone, Default)]
pub struct DashboardSeries {
    pub glucose: Vec<GlucoseEntry>,
    pub manual_boluses: Vec<Bar>,
    pub smbs: Vec<Bar>,
    pub carbs: Vec<CarbMarker>,
    pub scheduled_basal: Vec<RatePoint>,
    pub temp_basals: Vec<RateStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub readings: usize,
    pub latest: Option<GlucoseEntry>,
    pub bolus_units: f64,
    pub smb_units: f64,
    pub carb_grams: f64,
}

impl DashboardSeries {
    pub fn build(dataset: &Dataset, range: &TimeRange, tz: Tz) -> Self {
        let glucose = dataset
            .entries
            .iter()
            .filter(|entry| range.contains(entry.time))
            .cloned()
            .collect();

        let treatments: Vec<_> = dataset
            .treatments
            .iter()
            .filter(|treatment| range.contains(treatment.time))
            .collect();

        let bars = |kind: TreatmentKind| -> Vec<Bar> {
            treatments
                .iter()
                .filter(|treatment| treatment.kind() == kind)
                .filter_map(|treatment| {
                    Some(Bar {
                        time: treatment.time,
                        units: treatment.bolus_units()?,
                    })
                })
                .collect()
        };

        let carbs = treatments
            .iter()
            .filter_map(|treatment| {
                Some(CarbMarker {
                    time: treatment.time,
                    grams: treatment.carb_grams()?,
                })
            })
            .collect();

        let temps: Vec<(DateTime<Utc>, f64, Option<TimeDelta>)> = treatments
            .iter()
            .filter(|treatment| treatment.kind() == TreatmentKind::TempBasal)
            .filter_map(|treatment| Some((treatment.time, treatment.rate?, treatment.duration)))
            .collect();

        let scheduled_basal = dataset
            .profile
            .as_ref()
            .and_then(BasalSchedule::from_profile)
            .map(|schedule| schedule.build(range, tz))
            .unwrap_or_default();

        Self {
            glucose,
            manual_boluses: bars(TreatmentKind::ManualBolus),
            smbs: bars(TreatmentKind::Smb),
            carbs,
            scheduled_basal,
            temp_basals: temp_steps(&temps, range),
        }
    }

    pub fn summary(&self) -> Summary {
        Summary {
            readings: self.glucose.len(),
            latest: self.glucose.last().cloned(),
            bolus_units: self.manual_boluses.iter().map(|bar| bar.units).sum(),
            smb_units: self.smbs.iter().map(|bar| bar.units).sum(),
            carb_grams: self.carbs.iter().map(|marker| marker.grams).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.glucose.is_empty()
            && self.manual_boluses.is_empty()
            && self.smbs.is_empty()
            && self.carbs.is_empty()
            && self.temp_basals.is_empty()
    }
}

/// Turns temp basal events into the intervals they covered.
///
/// A temp basal ends after its duration or when the next one starts, whichever
/// comes first. Without a duration it runs until the next one or the range end.
fn temp_steps(temps: &[(DateTime<Utc>, f64, Option<TimeDelta>)], range: &TimeRange) -> Vec<RateStep> {
    temps
        .iter()
        .enumerate()
        .filter_map(|(idx, &(start, rate, duration))| {
            let next_start = temps.get(idx + 1).map(|next| next.0);

            let end = [duration.and_then(|d| start.checked_add_signed(d)), next_start]
                .into_iter()
                .flatten()
                .min()
                .unwrap_or(range.end());

            let start = range.clamp(start);
            let end = range.clamp(end);

            (end > start).then_some(RateStep { start, end, rate })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().to_utc()
    }

    fn day() -> TimeRange {
        TimeRange::new(utc("2024-05-01T00:00:00Z"), utc("2024-05-01T23:59:00Z")).unwrap()
    }

    fn dataset() -> Dataset {
        Dataset::from_payloads(
            json!([
                { "dateString": "2024-04-30T23:55:00Z", "sgv": 90 },
                { "dateString": "2024-05-01T08:00:00Z", "sgv": 108 },
                { "dateString": "2024-05-01T08:05:00Z", "sgv": 126 },
            ]),
            json!([
                { "created_at": "2024-05-01T08:00:00Z", "eventType": "Correction Bolus", "insulin": 1.5 },
                { "created_at": "2024-05-01T08:10:00Z", "eventType": "Bolus", "insulin": 0.2 },
                { "created_at": "2024-05-01T08:15:00Z", "eventType": "Bolus", "insulin": 0.3 },
                { "created_at": "2024-05-01T12:00:00Z", "eventType": "Meal Bolus", "insulin": 3, "carbs": 40 },
                { "created_at": "2024-05-01T09:00:00Z", "eventType": "Temp Basal", "rate": 1.4, "duration": 30 },
                { "created_at": "2024-05-01T09:10:00Z", "eventType": "Temp Basal", "rate": 0.0, "duration": 30 },
                { "created_at": "2024-05-02T01:00:00Z", "eventType": "Bolus", "insulin": 5 },
            ]),
            json!([{ "store": { "basalprofile": [{ "i": 0, "rate": 0.8 }] } }]),
        )
    }

    #[test]
    fn splits_treatments_into_panels() {
        let series = DashboardSeries::build(&dataset(), &day(), chrono_tz::UTC);

        assert_eq!(series.glucose.len(), 2);
        assert_eq!(series.manual_boluses.len(), 2);
        assert_eq!(series.smbs.len(), 2);
        assert_eq!(
            series.carbs,
            [CarbMarker {
                time: utc("2024-05-01T12:00:00Z"),
                grams: 40.
            }]
        );
        assert_eq!(series.scheduled_basal.len(), 2);
        assert!(!series.is_empty());
    }

    #[test]
    fn temp_basals_are_cut_by_the_next_one() {
        let series = DashboardSeries::build(&dataset(), &day(), chrono_tz::UTC);

        assert_eq!(
            series.temp_basals,
            [
                RateStep {
                    start: utc("2024-05-01T09:00:00Z"),
                    end: utc("2024-05-01T09:10:00Z"),
                    rate: 1.4,
                },
                RateStep {
                    start: utc("2024-05-01T09:10:00Z"),
                    end: utc("2024-05-01T09:40:00Z"),
                    rate: 0.0,
                },
            ]
        );
    }

    #[test]
    fn open_ended_temp_basal_runs_to_range_end() {
        let range = day();
        let steps = temp_steps(&[(utc("2024-05-01T23:00:00Z"), 2.0, None)], &range);

        assert_eq!(steps[0].end, range.end());
        assert_eq!(steps[0].duration(), TimeDelta::minutes(59));

        // Zero duration cancels
        let steps = temp_steps(
            &[(utc("2024-05-01T10:00:00Z"), 0.0, Some(TimeDelta::zero()))],
            &range,
        );
        assert!(steps.is_empty());
    }

    #[test]
    fn endless_temp_basal_is_clamped_to_the_range() {
        let dataset = Dataset::from_payloads(
            json!([]),
            json!([
                { "created_at": "2024-05-01T09:00:00Z", "eventType": "Temp Basal", "rate": 1.0, "duration": 1e12 },
            ]),
            json!(null),
        );
        let range = day();

        let series = DashboardSeries::build(&dataset, &range, chrono_tz::UTC);

        assert_eq!(
            series.temp_basals,
            [RateStep {
                start: utc("2024-05-01T09:00:00Z"),
                end: range.end(),
                rate: 1.0,
            }]
        );
    }

    #[test]
    fn summary_totals() {
        let summary = DashboardSeries::build(&dataset(), &day(), chrono_tz::UTC).summary();

        assert_eq!(summary.readings, 2);
        assert_eq!(summary.latest.map(|x| x.sgv), Some(126.));
        assert_eq!(summary.bolus_units, 4.5);
        assert_eq!(summary.smb_units, 0.5);
        assert_eq!(summary.carb_grams, 40.);
    }

    #[test]
    fn missing_profile_means_no_scheduled_basal() {
        let mut dataset = dataset();
        dataset.profile = None;

        let series = DashboardSeries::build(&dataset, &day(), chrono_tz::UTC);

        assert!(series.scheduled_basal.is_empty());
    }
}
