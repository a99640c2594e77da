use chrono::{DateTime, NaiveTime, TimeDelta, Timelike, Utc};
use chrono_tz::Tz;
use config::GlucoseUnit;
use maud::{Markup, Render, html};
use nightscout::{TimeRange, series::DashboardSeries, time::localize};

const WIDTH: f64 = 1200.;
const HEIGHT: f64 = 740.;
const MARGIN_TOP: f64 = 48.;
const MARGIN_BOTTOM: f64 = 32.;
const MARGIN_LEFT: f64 = 64.;
const MARGIN_RIGHT: f64 = 40.;

/// Gap between panels, as a fraction of the plot height
const PANEL_GAP: f64 = 0.06;
const PANEL_RATIOS: [f64; 3] = [0.45, 0.27, 0.28];

const BG_COLOR: &str = "#1f77b4";
const BOLUS_COLOR: &str = "#1f77b4";
const SMB_COLOR: &str = "#ff7f0e";
const CARB_COLOR: &str = "green";
const SCHEDULED_COLOR: &str = "grey";
const TEMP_COLOR: &str = "#9467bd";
const AXIS_COLOR: &str = "#444";
const GRID_COLOR: &str = "#eee";

/// Carb markers sit just above the bolus axis' zero line
const CARB_MARKER_Y: f64 = 0.05;
/// Bars are sized as if there was one per CGM interval, with a 20% gap
const BAR_SLOT_MS: f64 = 5. * 60_000.;
const BAR_FILL: f64 = 0.8;

const TIME_STEPS_MINUTES: [i64; 10] = [15, 30, 60, 120, 180, 360, 720, 1440, 2880, 10080];
const MAX_TIME_TICKS: i64 = 12;
const VALUE_TICKS: usize = 5;

fn f(v: f64) -> String {
    format!("{v:.1}")
}

pub fn format_glucose(unit: GlucoseUnit, mgdl: f64) -> String {
    match unit {
        GlucoseUnit::Mmol => format!("{:.1}", unit.convert(mgdl)),
        GlucoseUnit::Mgdl => format!("{mgdl:.0}"),
    }
}

struct TimeScale {
    start_ms: i64,
    span_ms: f64,
}

impl TimeScale {
    fn new(range: &TimeRange) -> Self {
        Self {
            start_ms: range.start_ms(),
            span_ms: (range.end_ms() - range.start_ms()) as f64,
        }
    }

    fn x(&self, time: DateTime<Utc>) -> f64 {
        let frac = (time.timestamp_millis() - self.start_ms) as f64 / self.span_ms;
        MARGIN_LEFT + frac.clamp(0., 1.) * (WIDTH - MARGIN_LEFT - MARGIN_RIGHT)
    }

    fn bar_width(&self) -> f64 {
        let slot = (WIDTH - MARGIN_LEFT - MARGIN_RIGHT) * BAR_SLOT_MS / self.span_ms;
        (slot * BAR_FILL).clamp(2., 12.)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Axis {
    min: f64,
    max: f64,
    step: f64,
    ticks: Vec<f64>,
}

impl Axis {
    /// An axis covering `[min, max]` with ticks on a 1/2/5 grid.
    fn nice(min: f64, max: f64) -> Self {
        let max = if max - min <= f64::EPSILON { min + 1. } else { max };

        let raw = (max - min) / VALUE_TICKS as f64;
        let magnitude = 10_f64.powf(raw.log10().floor());
        let step = match raw / magnitude {
            x if x <= 1. => 1.,
            x if x <= 2. => 2.,
            x if x <= 5. => 5.,
            _ => 10.,
        } * magnitude;

        let lo = (min / step).floor() * step;
        let hi = (max / step).ceil() * step;
        let count = ((hi - lo) / step).round() as usize;
        let ticks = (0..=count).map(|i| lo + i as f64 * step).collect();

        Self {
            min: lo,
            max: hi,
            step,
            ticks,
        }
    }

    fn label(&self, value: f64) -> String {
        let decimals = if self.step >= 1. {
            0
        } else {
            (-self.step.log10() - 1e-9).ceil() as usize
        };

        format!("{value:.decimals$}")
    }
}

#[derive(Debug, Clone, Copy)]
struct Panel {
    top: f64,
    height: f64,
}

impl Panel {
    fn layout() -> [Panel; 3] {
        let plot_height = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
        let gap = PANEL_GAP * plot_height;
        let usable = plot_height - 2. * gap;

        let mut top = MARGIN_TOP;
        std::array::from_fn(|idx| {
            let height = PANEL_RATIOS[idx] * usable;
            let panel = Panel { top, height };
            top += height + gap;
            panel
        })
    }

    fn bottom(&self) -> f64 {
        self.top + self.height
    }

    fn y(&self, axis: &Axis, value: f64) -> f64 {
        let frac = ((value - axis.min) / (axis.max - axis.min)).clamp(0., 1.);
        self.bottom() - frac * self.height
    }
}

/// Labelled x axis positions, aligned to local wall-clock time.
fn time_ticks(range: &TimeRange, tz: Tz) -> Vec<(DateTime<Utc>, String)> {
    let span = range.duration().num_minutes().max(1);
    let step_minutes = TIME_STEPS_MINUTES
        .iter()
        .copied()
        .find(|step| span / step <= MAX_TIME_TICKS)
        .unwrap_or_else(|| (span / MAX_TIME_TICKS / 1440 + 1) * 1440);
    let step = TimeDelta::minutes(step_minutes);

    let mut naive = range
        .start()
        .with_timezone(&tz)
        .date_naive()
        .and_time(NaiveTime::MIN);
    let mut ticks = Vec::new();

    loop {
        let time = localize(naive, tz);
        if time > range.end() {
            break;
        }

        if time >= range.start() {
            let local = time.with_timezone(&tz);
            let label = if local.hour() == 0 && local.minute() == 0 {
                local.format("%d %b")
            } else {
                local.format("%H:%M")
            };
            ticks.push((time, label.to_string()));
        }

        naive = match naive.checked_add_signed(step) {
            Some(next) => next,
            None => break,
        };
    }

    ticks
}

enum Swatch {
    Line(&'static str),
    Dashed(&'static str),
    Bar(&'static str),
    Area(&'static str),
}

/// The three-panel glucose / bolus / basal chart.
pub struct SvgChart<'a> {
    series: &'a DashboardSeries,
    range: TimeRange,
    tz: Tz,
    unit: GlucoseUnit,
}

impl<'a> SvgChart<'a> {
    pub fn new(series: &'a DashboardSeries, range: TimeRange, tz: Tz, unit: GlucoseUnit) -> Self {
        Self {
            series,
            range,
            tz,
            unit,
        }
    }

    fn clock(&self, time: DateTime<Utc>) -> String {
        time.with_timezone(&self.tz).format("%H:%M").to_string()
    }

    fn glucose_axis(&self) -> Axis {
        let (lo, hi) = self
            .series
            .glucose
            .iter()
            .map(|entry| self.unit.convert(entry.sgv))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });

        if lo.is_finite() {
            Axis::nice(lo.max(0.), hi)
        } else {
            Axis::nice(self.unit.convert(36.), self.unit.convert(270.))
        }
    }

    fn bolus_axis(&self) -> Axis {
        let max = self
            .series
            .manual_boluses
            .iter()
            .chain(&self.series.smbs)
            .map(|bar| bar.units)
            .fold(0.5, f64::max);

        Axis::nice(0., max)
    }

    fn basal_axis(&self) -> Axis {
        let max = self
            .series
            .scheduled_basal
            .iter()
            .map(|point| point.rate)
            .chain(self.series.temp_basals.iter().map(|step| step.rate))
            .fold(0.5, f64::max);

        Axis::nice(0., max)
    }

    fn frame(&self, panel: &Panel, axis: &Axis, title: &str, ticks: &[(f64, String)]) -> Markup {
        let right = WIDTH - MARGIN_RIGHT;
        let mid = panel.top + panel.height / 2.;

        html! {
            g {
                @for value in &axis.ticks {
                    @let y = panel.y(axis, *value);
                    line x1=(f(MARGIN_LEFT)) x2=(f(right)) y1=(f(y)) y2=(f(y)) stroke=(GRID_COLOR) {}
                    text x=(f(MARGIN_LEFT - 6.)) y=(f(y)) text-anchor="end" dominant-baseline="middle" {
                        (axis.label(*value))
                    }
                }
                @for (x, _) in ticks {
                    line x1=(f(*x)) x2=(f(*x)) y1=(f(panel.top)) y2=(f(panel.bottom())) stroke=(GRID_COLOR) {}
                }
                line x1=(f(MARGIN_LEFT)) x2=(f(MARGIN_LEFT)) y1=(f(panel.top)) y2=(f(panel.bottom())) stroke=(AXIS_COLOR) {}
                line x1=(f(MARGIN_LEFT)) x2=(f(right)) y1=(f(panel.bottom())) y2=(f(panel.bottom())) stroke=(AXIS_COLOR) {}
                text x="14" y=(f(mid)) text-anchor="middle" transform={"rotate(-90 14 " (f(mid)) ")"} {
                    (title)
                }
            }
        }
    }

    fn glucose_panel(&self, scale: &TimeScale, panel: &Panel, axis: &Axis) -> Markup {
        let glucose = &self.series.glucose;

        let points = glucose
            .iter()
            .map(|entry| {
                let y = panel.y(axis, self.unit.convert(entry.sgv));
                format!("{},{}", f(scale.x(entry.time)), f(y))
            })
            .collect::<Vec<_>>()
            .join(" ");

        html! {
            g {
                @if glucose.is_empty() {
                    text x=(f(WIDTH / 2.)) y=(f(panel.top + panel.height / 2.)) text-anchor="middle" fill=(AXIS_COLOR) {
                        "No glucose data in this range"
                    }
                } @else {
                    polyline points=(points) fill="none" stroke=(BG_COLOR) stroke-width="1.5" {}
                    @for entry in glucose {
                        circle cx=(f(scale.x(entry.time))) cy=(f(panel.y(axis, self.unit.convert(entry.sgv)))) r="2.5" fill=(BG_COLOR) {
                            title {
                                (format_glucose(self.unit, entry.sgv)) " " (self.unit.label()) "\n" (self.clock(entry.time))
                            }
                        }
                    }
                }
            }
        }
    }

    fn events_panel(&self, scale: &TimeScale, panel: &Panel, axis: &Axis) -> Markup {
        let width = scale.bar_width();
        let bars = [
            (&self.series.manual_boluses, BOLUS_COLOR, "Manual bolus"),
            (&self.series.smbs, SMB_COLOR, "SMB"),
        ];

        html! {
            g {
                @for (list, color, name) in bars {
                    @for bar in list {
                        @let y = panel.y(axis, bar.units);
                        rect x=(f(scale.x(bar.time) - width / 2.)) y=(f(y)) width=(f(width)) height=(f(panel.bottom() - y)) fill=(color) {
                            title { (name) ": " (format!("{:.2}", bar.units)) " U\n" (self.clock(bar.time)) }
                        }
                    }
                }
                @for marker in &self.series.carbs {
                    @let cx = scale.x(marker.time);
                    @let cy = panel.y(axis, CARB_MARKER_Y);
                    @let r = (marker.grams / 2.).clamp(3., 24.);
                    circle cx=(f(cx)) cy=(f(cy)) r=(f(r)) fill=(CARB_COLOR) fill-opacity="0.7" {
                        title { (format!("{:.0}", marker.grams)) " g\n" (self.clock(marker.time)) }
                    }
                    text x=(f(cx)) y=(f(cy - r - 4.)) text-anchor="middle" {
                        (format!("{:.0}", marker.grams)) " g"
                    }
                }
            }
        }
    }

    fn basal_panel(&self, scale: &TimeScale, panel: &Panel, axis: &Axis) -> Markup {
        let scheduled = &self.series.scheduled_basal;

        // Step line: hold each rate until the next point, then jump
        let mut path = String::new();
        for (idx, point) in scheduled.iter().enumerate() {
            let x = f(scale.x(point.time));
            let y = f(panel.y(axis, point.rate));
            if idx == 0 {
                path.push_str(&format!("M{x} {y}"));
            } else {
                path.push_str(&format!(" H{x} V{y}"));
            }
        }

        html! {
            g {
                @for step in &self.series.temp_basals {
                    @let x = scale.x(step.start);
                    @let y = panel.y(axis, step.rate);
                    @let width = scale.x(step.end) - x;
                    @let duration = step.duration().to_std().unwrap_or_default();
                    g {
                        title {
                            (format!("{:.2}", step.rate)) " U/h for "
                            (humantime::format_duration(duration).to_string()) "\n" (self.clock(step.start))
                        }
                        rect x=(f(x)) y=(f(y)) width=(f(width)) height=(f(panel.bottom() - y)) fill=(TEMP_COLOR) fill-opacity="0.35" {}
                        line x1=(f(x)) x2=(f(x + width)) y1=(f(y)) y2=(f(y)) stroke=(TEMP_COLOR) stroke-width="2" {}
                    }
                }
                @if !path.is_empty() {
                    path d=(path) fill="none" stroke=(SCHEDULED_COLOR) stroke-width="1" stroke-dasharray="6 4" {}
                }
            }
        }
    }

    fn legend(&self) -> Markup {
        let mut entries = vec![("BG", Swatch::Line(BG_COLOR))];
        if !self.series.manual_boluses.is_empty() {
            entries.push(("Manual bolus", Swatch::Bar(BOLUS_COLOR)));
        }
        if !self.series.smbs.is_empty() {
            entries.push(("SMB", Swatch::Bar(SMB_COLOR)));
        }
        entries.push(("Scheduled basal", Swatch::Dashed(SCHEDULED_COLOR)));
        if !self.series.temp_basals.is_empty() {
            entries.push(("Temp basal", Swatch::Area(TEMP_COLOR)));
        }

        let mut x = MARGIN_LEFT;
        let placed: Vec<_> = entries
            .into_iter()
            .map(|(label, swatch)| {
                let start = x;
                x += 36. + 7. * label.len() as f64;
                (start, label, swatch)
            })
            .collect();
        let y = 20.;

        html! {
            g {
                @for (start, label, swatch) in &placed {
                    @let start = *start;
                    @match swatch {
                        Swatch::Line(color) => {
                            line x1=(f(start)) x2=(f(start + 20.)) y1=(f(y)) y2=(f(y)) stroke=(color) stroke-width="2" {}
                        }
                        Swatch::Dashed(color) => {
                            line x1=(f(start)) x2=(f(start + 20.)) y1=(f(y)) y2=(f(y)) stroke=(color) stroke-dasharray="4 3" {}
                        }
                        Swatch::Bar(color) => {
                            rect x=(f(start + 6.)) y=(f(y - 6.)) width="8" height="12" fill=(color) {}
                        }
                        Swatch::Area(color) => {
                            rect x=(f(start)) y=(f(y - 6.)) width="20" height="12" fill=(color) fill-opacity="0.35" stroke=(color) {}
                        }
                    }
                    text x=(f(start + 26.)) y=(f(y)) dominant-baseline="middle" { (label) }
                }
            }
        }
    }
}

impl Render for SvgChart<'_> {
    fn render(&self) -> Markup {
        let scale = TimeScale::new(&self.range);
        let [bg_panel, event_panel, basal_panel] = Panel::layout();

        let bg_axis = self.glucose_axis();
        let event_axis = self.bolus_axis();
        let basal_axis = self.basal_axis();

        let ticks: Vec<(f64, String)> = time_ticks(&self.range, self.tz)
            .into_iter()
            .map(|(time, label)| (scale.x(time), label))
            .collect();

        html! {
            svg xmlns="http://www.w3.org/2000/svg"
                viewBox={"0 0 " (WIDTH) " " (HEIGHT)}
                width="100%"
                font-family="sans-serif"
                font-size="12"
            {
                rect width=(WIDTH) height=(HEIGHT) fill="white" {}

                (self.legend())

                (self.frame(&bg_panel, &bg_axis, self.unit.label(), &ticks))
                (self.frame(&event_panel, &event_axis, "U / g", &ticks))
                (self.frame(&basal_panel, &basal_axis, "U/h", &ticks))

                (self.glucose_panel(&scale, &bg_panel, &bg_axis))
                (self.events_panel(&scale, &event_panel, &event_axis))
                (self.basal_panel(&scale, &basal_panel, &basal_axis))

                @for (x, label) in &ticks {
                    text x=(f(*x)) y=(f(basal_panel.bottom() + 18.)) text-anchor="middle" { (label) }
                }
            }
        }
    }
}
