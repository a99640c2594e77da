//! Client and data model for the Nightscout REST API.

mod client;
pub mod records;
pub mod schedule;
pub mod series;
pub mod time;

pub use client::{ClientSettings, NightscoutClient};
pub use records::Dataset;
pub use time::TimeRange;
