//! Home.InfoPoint school portal client.
//!
//! Logs into the portal with a form login, fetches the data page and turns
//! its tables into a [`models::Snapshot`] of grades, homework and remarks.

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod scraper;
pub mod storage;
pub mod utils;
pub mod views;

pub use error::{ParseAmbiguity, PortalError};
pub use models::{Record, Snapshot, Student};
pub use scraper::parsers::parse_snapshot;
pub use scraper::{HomeInfoPointScraper, PortalSource};
