use anyhow::{Result, bail};
use chrono::{Datelike, NaiveDate, NaiveTime, TimeDelta, Utc};
use chrono_tz::Tz;
use hyper::StatusCode;
use log::warn;
use maud::{Render, html};
use nightscout::{TimeRange, series::DashboardSeries};
use serde::{Deserialize, Serialize};

use crate::http::{
    request::{ServerRequest, parse_query},
    response::ServerResponse,
};

use super::template::template;

mod fragments;
mod graph;

use graph::SvgChart;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];
const YEARS: std::ops::RangeInclusive<i32> = 1970..=9999;
/// Longest window a single request may cover
const MAX_RANGE_DAYS: i64 = 31;

/// Raw form fields, empty means "use the default".
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardQuery {
    start_date: String,
    start_time: String,
    end_date: String,
    end_time: String,
}

/// The wall-clock window the user picked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub start_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_date: NaiveDate,
    pub end_time: NaiveTime,
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .ok()
        .filter(|date| YEARS.contains(&date.year()))
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
}

fn field<T>(value: &str, name: &str, default: T, parse: fn(&str) -> Option<T>) -> Result<T, String> {
    let value = value.trim();

    if value.is_empty() {
        return Ok(default);
    }

    parse(value).ok_or_else(|| format!("invalid {name}: {value:?}"))
}

impl DashboardQuery {
    /// Fills in missing fields: today from 00:00 to 23:59.
    fn resolve(&self, today: NaiveDate) -> Result<Selection, String> {
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN);

        Ok(Selection {
            start_date: field(&self.start_date, "start date", today, parse_date)?,
            start_time: field(&self.start_time, "start time", NaiveTime::MIN, parse_time)?,
            end_date: field(&self.end_date, "end date", today, parse_date)?,
            end_time: field(&self.end_time, "end time", end_of_day, parse_time)?,
        })
    }
}

impl Selection {
    fn range(&self, tz: Tz) -> Result<TimeRange> {
        let range = TimeRange::from_local(
            self.start_date,
            self.start_time,
            self.end_date,
            self.end_time,
            tz,
        )?;

        if range.duration() > TimeDelta::days(MAX_RANGE_DAYS) {
            bail!("time range must not be longer than {MAX_RANGE_DAYS} days");
        }

        Ok(range)
    }

    fn to_query(self) -> String {
        let query = DashboardQuery {
            start_date: self.start_date.format(DATE_FORMAT).to_string(),
            start_time: self.start_time.format(TIME_FORMATS[0]).to_string(),
            end_date: self.end_date.format(DATE_FORMAT).to_string(),
            end_time: self.end_time.format(TIME_FORMATS[0]).to_string(),
        };

        serde_urlencoded::to_string(query).unwrap_or_default()
    }
}

fn bad_request(message: String) -> ServerResponse {
    ServerResponse::new()
        .status(StatusCode::BAD_REQUEST)
        .body(message)
}

fn selection_from_query(query: Option<&str>, today: NaiveDate) -> Result<Selection, ServerResponse> {
    let query: DashboardQuery = parse_query(query)?;

    query.resolve(today).map_err(bad_request)
}

fn extract_selection(req: &ServerRequest) -> Result<Selection, ServerResponse> {
    let today = Utc::now().with_timezone(&req.config().timezone).date_naive();

    selection_from_query(req.uri().query(), today)
}

/// The SVG endpoint has no page to show a notice on, so a bad range is a 400.
fn svg_range(selection: &Selection, tz: Tz) -> Result<TimeRange, ServerResponse> {
    selection
        .range(tz)
        .map_err(|err| bad_request(format!("{err:#}")))
}

pub async fn page(req: ServerRequest) -> Result<ServerResponse, ServerResponse> {
    let selection = extract_selection(&req)?;
    let state = req.state();
    let config = &state.config;
    let tz = config.timezone;

    let body = match selection.range(tz) {
        Err(err) => fragments::notice(&format!("{err:#}")),
        Ok(range) => match state.source.dataset(&range).await {
            Ok(data) => {
                let series = DashboardSeries::build(&data, &range, tz);
                let chart = SvgChart::new(&series, range, tz, config.glucose_unit);

                html! {
                    @if series.is_empty() {
                        (fragments::notice("No Nightscout data in this time range."))
                    }
                    (fragments::summary(&series.summary(), config.glucose_unit, tz))
                    (chart)
                }
            }
            Err(err) => {
                warn!("Failed to fetch Nightscout data: {err:#}");
                fragments::notice(&format!("Couldn't fetch Nightscout data: {err:#}"))
            }
        },
    };

    let content = html! {
        section {
            (fragments::range_form(&selection))
        }
        section .chart {
            (body)
        }
    };

    Ok(template(config, content))
}

pub async fn chart_svg(req: ServerRequest) -> Result<ServerResponse, ServerResponse> {
    let selection = extract_selection(&req)?;
    let state = req.state();
    let config = &state.config;
    let tz = config.timezone;

    let range = svg_range(&selection, tz)?;

    let data = state.source.dataset(&range).await.map_err(|err| {
        warn!("Failed to fetch Nightscout data: {err:#}");
        ServerResponse::new()
            .status(StatusCode::BAD_GATEWAY)
            .body(format!("Nightscout request failed: {err:#}"))
    })?;

    let series = DashboardSeries::build(&data, &range, tz);
    let chart = SvgChart::new(&series, range, tz, config.glucose_unit);

    Ok(ServerResponse::new().svg(chart.render()))
}
