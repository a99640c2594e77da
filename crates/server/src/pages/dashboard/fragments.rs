use chrono_tz::Tz;
use config::GlucoseUnit;
use maud::{Markup, html};
use nightscout::series::Summary;

use super::{Selection, graph::format_glucose};

pub fn range_form(selection: &Selection) -> Markup {
    let query = selection.to_query();

    html! {
        form .range method="get" action="/" {
            fieldset {
                legend { "Start" }
                input type="date" name="start_date" value=(selection.start_date.format("%Y-%m-%d").to_string());
                input type="time" name="start_time" value=(selection.start_time.format("%H:%M").to_string());
            }
            fieldset {
                legend { "End" }
                input type="date" name="end_date" value=(selection.end_date.format("%Y-%m-%d").to_string());
                input type="time" name="end_time" value=(selection.end_time.format("%H:%M").to_string());
            }
            button type="submit" { "Show" }
            a href="/" { "Today" }
            a href={"/chart.svg?" (query)} download="nightscout.svg" { "Download SVG" }
        }
    }
}

pub fn notice(message: &str) -> Markup {
    html! {
        p .notice { (message) }
    }
}

pub fn summary(summary: &Summary, unit: GlucoseUnit, tz: Tz) -> Markup {
    html! {
        dl .summary {
            dt { "Latest" }
            dd {
                @if let Some(latest) = &summary.latest {
                    (format_glucose(unit, latest.sgv)) " " (unit.label())
                    " at " (latest.time.with_timezone(&tz).format("%H:%M").to_string())
                } @else {
                    "–"
                }
            }
            dt { "Readings" }
            dd { (summary.readings) }
            dt { "Manual bolus" }
            dd { (format!("{:.2}", summary.bolus_units)) " U" }
            dt { "SMB" }
            dd { (format!("{:.2}", summary.smb_units)) " U" }
            dt { "Carbs" }
            dd { (format!("{:.0}", summary.carb_grams)) " g" }
        }
    }
}
