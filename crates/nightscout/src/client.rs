use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::SecondsFormat;
use log::debug;
use reqwest::StatusCode;
use serde_json::Value;

use crate::{records::Dataset, time::TimeRange};

const ENTRIES_PATH: &str = "/api/v1/entries.json";
const TREATMENTS_PATH: &str = "/api/v1/treatments.json";
const PROFILE_PATH: &str = "/api/v1/profile.json";

/// How much of an error body ends up in the error message
const ERROR_SNIPPET_LEN: usize = 120;
/// CGMs report every 5 minutes, leave room for duplicates and backfill
const SAMPLES_PER_HOUR: i64 = 24;
const MIN_COUNT: i64 = 100;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub token: Option<String>,
    pub connect_timeout: Duration,
    pub timeout: Duration,
}

pub struct NightscoutClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl NightscoutClient {
    pub fn new(settings: ClientSettings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.timeout)
            .user_agent(concat!("nightscout-dashboard/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token,
        })
    }

    /// Fetches entries, treatments and the active profile for `range`.
    pub async fn fetch(&self, range: &TimeRange) -> Result<Dataset> {
        let count = (range.duration().num_hours() + 1) * SAMPLES_PER_HOUR;
        let count = count.max(MIN_COUNT).to_string();

        let entries_query = [
            ("find[date][$gte]", range.start_ms().to_string()),
            ("find[date][$lte]", range.end_ms().to_string()),
            ("count", count.clone()),
        ];

        // Treatments are indexed by created_at rather than date
        let treatments_query = [
            (
                "find[created_at][$gte]",
                range.start().to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            (
                "find[created_at][$lte]",
                range.end().to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            ("count", count),
        ];

        debug!(
            "Fetching Nightscout data from {} to {}",
            range.start(),
            range.end()
        );

        let (entries, treatments, profile) = tokio::try_join!(
            self.get(ENTRIES_PATH, &entries_query),
            self.get(TREATMENTS_PATH, &treatments_query),
            self.get(PROFILE_PATH, &[]),
        )?;

        Ok(Dataset::from_payloads(entries, treatments, profile))
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let mut req = self
            .http
            .get(format!("{}{path}", self.base_url))
            .query(query);

        if let Some(token) = &self.token {
            req = req.query(&[("token", token)]);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("failed to request {path}"))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .with_context(|| format!("failed to read response body of {path}"))?;

        if status != StatusCode::OK {
            let snippet: String = body.chars().take(ERROR_SNIPPET_LEN).collect();
            bail!("Nightscout error {}: {snippet}", status.as_u16());
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).with_context(|| format!("invalid JSON in response of {path}"))
    }
}
