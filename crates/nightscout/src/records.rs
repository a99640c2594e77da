use chrono::{DateTime, TimeDelta, Utc};
use log::debug;
use serde_json::{Map, Value};

use crate::time::pick_time;

pub type Document = Map<String, Value>;

/// Normalises a JSON payload into a list of documents.
///
/// Nightscout answers with an array, but a lone object or an empty body are
/// treated as one document and no documents respectively.
pub fn documents(payload: Value) -> Vec<Document> {
    match payload {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
        Value::Object(map) => vec![map],
        _ => Vec::new(),
    }
}

/// Reads a number that may have been sent as a string.
pub(crate) fn number(value: &Value) -> Option<f64> {
    let num = match value {
        Value::Number(num) => num.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };

    num.filter(|x| x.is_finite())
}

fn field(doc: &Document, key: &str) -> Option<f64> {
    doc.get(key).and_then(number)
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseEntry {
    pub time: DateTime<Utc>,
    /// Sensor glucose in mg/dL
    pub sgv: f64,
}

impl GlucoseEntry {
    pub fn from_document(doc: &Document) -> Option<Self> {
        Some(Self {
            time: pick_time(doc)?,
            sgv: field(doc, "sgv")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreatmentKind {
    ManualBolus,
    Smb,
    TempBasal,
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Treatment {
    pub time: DateTime<Utc>,
    pub event_type: String,
    pub insulin: Option<f64>,
    pub carbs: Option<f64>,
    /// Temp basal rate in U/h
    pub rate: Option<f64>,
    pub duration: Option<TimeDelta>,
    pub is_smb: bool,
}

impl Treatment {
    pub fn from_document(doc: &Document) -> Option<Self> {
        let time = pick_time(doc)?;

        let event_type = doc
            .get("eventType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // Durations are in minutes, some uploaders only send milliseconds
        let duration = field(doc, "duration")
            .map(|mins| mins * 60_000.)
            .or_else(|| field(doc, "durationInMilliseconds"))
            .filter(|ms| *ms >= 0.)
            .and_then(|ms| TimeDelta::try_milliseconds(ms as i64));

        let is_smb = doc.get("isSMB").and_then(Value::as_bool).unwrap_or(false)
            || doc.get("type").and_then(Value::as_str) == Some("SMB");

        Some(Self {
            time,
            event_type,
            insulin: field(doc, "insulin"),
            carbs: field(doc, "carbs"),
            rate: field(doc, "rate").or_else(|| field(doc, "absolute")),
            duration,
            is_smb,
        })
    }

    pub fn kind(&self) -> TreatmentKind {
        match self.event_type.as_str() {
            "Bolus" | "SMB" => TreatmentKind::Smb,
            "Correction Bolus" | "Meal Bolus" | "Snack Bolus" if self.is_smb => TreatmentKind::Smb,
            "Correction Bolus" | "Meal Bolus" | "Snack Bolus" => TreatmentKind::ManualBolus,
            "Temp Basal" => TreatmentKind::TempBasal,
            _ if self.is_smb => TreatmentKind::Smb,
            _ => TreatmentKind::Other,
        }
    }

    /// Delivered insulin, if this is a bolus of some kind.
    pub fn bolus_units(&self) -> Option<f64> {
        match self.kind() {
            TreatmentKind::ManualBolus | TreatmentKind::Smb => self.insulin.filter(|x| *x > 0.),
            _ => None,
        }
    }

    pub fn carb_grams(&self) -> Option<f64> {
        self.carbs.filter(|x| *x > 0.)
    }
}

/// Everything fetched from Nightscout for one time range.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub entries: Vec<GlucoseEntry>,
    pub treatments: Vec<Treatment>,
    /// The first (active) profile document
    pub profile: Option<Document>,
}

impl Dataset {
    pub fn from_payloads(entries: Value, treatments: Value, profile: Value) -> Self {
        let entry_docs = documents(entries);
        let mut entries: Vec<_> = entry_docs
            .iter()
            .filter_map(GlucoseEntry::from_document)
            .collect();
        entries.sort_by_key(|x| x.time);

        let treatment_docs = documents(treatments);
        let mut treatments: Vec<_> = treatment_docs
            .iter()
            .filter_map(Treatment::from_document)
            .collect();
        treatments.sort_by_key(|x| x.time);

        debug!(
            "Parsed {}/{} entries and {}/{} treatments",
            entries.len(),
            entry_docs.len(),
            treatments.len(),
            treatment_docs.len()
        );

        let profile = documents(profile).into_iter().next();

        Self {
            entries,
            treatments,
            profile,
        }
    }
}
