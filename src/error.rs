//! Error types for the PVE inventory exporter.
//!
//! This module defines custom error types using `thiserror` for structured
//! error handling throughout the application.

use thiserror::Error;

use crate::client::GuestKind;

/// Main error type for PVE inventory operations.
#[derive(Debug, Error)]
pub enum PveError {
    /// Authentication against the PVE API failed (fatal, aborts the run)
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transport-level error talking to the PVE API
    #[error("PVE API error: {0}")]
    Http(#[from] reqwest::Error),

    /// The PVE API answered with a non-success status
    #[error("PVE API returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    /// Error parsing a PVE API response
    #[error("Failed to parse PVE API response: {0}")]
    Parse(String),

    /// Cluster topology could not be enumerated at all (fatal)
    #[error("Topology enumeration failed: {0}")]
    Topology(String),

    /// One guest's configuration could not be fetched (non-fatal, the guest
    /// is recorded as an error row and the run continues)
    #[error("Failed to fetch {kind}/{vmid} on {node}: {source}")]
    Fetch {
        node: String,
        vmid: u32,
        kind: GuestKind,
        #[source]
        source: Box<PveError>,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// CSV output error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for PVE inventory operations.
pub type Result<T> = std::result::Result<T, PveError>;
