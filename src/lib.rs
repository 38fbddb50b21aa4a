//! # PVE Inventory
//!
//! A CSV inventory exporter for Proxmox VE guest configurations.
//!
//! ## Overview
//!
//! This crate discovers every node and guest in a PVE cluster, fetches each
//! guest's configuration and flattens the sparse, dynamically-keyed config
//! objects into one rectangular CSV table:
//!
//! - Ticket-based authentication with transparent refresh
//! - Node and guest enumeration (qemu VMs and lxc containers)
//! - Property-string decomposition (`scsi0` becomes `scsi0.storage`,
//!   `scsi0.format`, `scsi0.size`, ...)
//! - Optional filesystem usage columns from the QEMU guest agent
//! - Per-guest failure isolation: failed fetches become error rows
//!
//! ## Quick Start
//!
//! ```no_run
//! use pve_inventory::{client::PveClient, config::Settings, export, inventory::InventoryCollector};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load configuration
//!     let settings = Settings::load(Some("config/default.toml"))?;
//!
//!     // Authenticate against the cluster
//!     let client = PveClient::new(settings.pve.clone())?;
//!     client.login().await?;
//!
//!     // Collect and export
//!     let collector = InventoryCollector::new(client, settings.export.clone());
//!     let (table, _summary) = collector.collect().await?;
//!     export::write_output(&settings.export.output, &table)?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! The exporter can be configured via:
//! - TOML configuration file
//! - Environment variables (with `PVE_INVENTORY_` prefix)
//! - Command-line arguments
//!
//! See [`config::Settings`] for details.
//!
//! ## Modules
//!
//! - [`client`] - PVE API client: node, guest and config endpoints
//! - [`config`] - Configuration management
//! - [`error`] - Error types and handling
//! - [`session`] - Ticket-based session handling
//! - [`normalize`] - Schema normalization of raw guest configs
//! - [`inventory`] - Cluster walk and row collection
//! - [`export`] - CSV emission

pub mod client;
pub mod config;
pub mod error;
pub mod export;
pub mod inventory;
pub mod normalize;
pub mod session;

pub use error::{PveError, Result};
