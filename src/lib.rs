//! pubnotice - unattended extraction of legal notices from public notice portals.
//!
//! The browser engine drives a search portal through its search form, paginated
//! result grid and per-notice verification challenges, and streams every extracted
//! record to a CSV file as soon as it is available.

pub mod browser;
pub mod config;
pub mod error;
pub mod extraction;
pub mod models;
pub mod scrapers;
pub mod solver;
pub mod storage;
pub mod vpn;

pub use config::Config;
pub use error::{DriverError, ScrapeError};
