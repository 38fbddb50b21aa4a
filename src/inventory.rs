//! Inventory collection: walks the cluster topology and feeds each guest's
//! config through the normalizer.
//!
//! Per-guest failures never abort the run; the guest becomes an error row and
//! collection continues. Only an authentication failure or a total topology
//! enumeration failure is fatal.

use crate::client::{FilesystemInfo, GuestKind, GuestRef, PveClient};
use crate::config::ExportConfig;
use crate::error::{PveError, Result};
use crate::normalize::{Normalizer, Table};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    /// Nodes enumerated
    pub nodes: usize,
    /// Guests that produced a row
    pub guests: usize,
    /// Guests whose config fetch failed (error rows)
    pub failed: usize,
}

/// Walks nodes and guests sequentially and buffers normalized rows.
pub struct InventoryCollector {
    client: PveClient,
    options: ExportConfig,
}

impl InventoryCollector {
    pub fn new(client: PveClient, options: ExportConfig) -> Self {
        Self { client, options }
    }

    /// Enumerate the cluster and collect one row per guest.
    ///
    /// # Errors
    ///
    /// Returns `PveError::Auth` if the ticket is rejected even after a
    /// refresh, and `PveError::Topology` if the cluster reports no nodes or
    /// guest enumeration fails on every node. Per-guest fetch failures are
    /// recorded as error rows, not returned.
    pub async fn collect(&self) -> Result<(Table, RunSummary)> {
        let nodes = self.client.list_nodes().await?;
        if nodes.is_empty() {
            return Err(PveError::Topology("cluster returned no nodes".to_string()));
        }
        info!("Enumerated {} cluster nodes", nodes.len());

        let mut normalizer = Normalizer::new();
        let mut failed = 0usize;
        let mut failed_nodes = 0usize;

        for node in &nodes {
            let guests = match self.client.list_guests(&node.node).await {
                Ok(guests) => guests,
                Err(auth @ PveError::Auth(_)) => return Err(auth),
                Err(e) => {
                    warn!("Failed to list guests on {}: {}", node.node, e);
                    failed_nodes += 1;
                    continue;
                }
            };
            info!("Node {}: {} guests", node.node, guests.len());

            for guest in guests {
                if self.options.running_only && guest.status != "running" {
                    debug!(
                        "Skipping {}/{} with status {}",
                        guest.node, guest.vmid, guest.status
                    );
                    continue;
                }

                match self.client.fetch_config(&guest).await {
                    Ok(config) => {
                        let enrichment = self.agent_columns(&guest, &config).await;
                        normalizer.push_guest(&guest, &config, &enrichment);
                    }
                    Err(auth @ PveError::Auth(_)) => return Err(auth),
                    Err(e) => {
                        warn!("{}", e);
                        normalizer.push_error_row(&guest, &e.to_string());
                        failed += 1;
                    }
                }
            }
        }

        if failed_nodes == nodes.len() {
            return Err(PveError::Topology(
                "guest enumeration failed on every node".to_string(),
            ));
        }

        let summary = RunSummary {
            nodes: nodes.len(),
            guests: normalizer.len(),
            failed,
        };
        info!(
            "Collected {} guests across {} nodes ({} failed)",
            summary.guests, summary.nodes, summary.failed
        );
        Ok((normalizer.finish(), summary))
    }

    /// Filesystem usage columns from the QEMU guest agent, when available.
    /// Any agent problem is logged at debug level and yields no columns; it
    /// never fails the guest's row.
    async fn agent_columns(&self, guest: &GuestRef, config: &Map<String, Value>) -> Vec<(String, String)> {
        if !self.options.agent_fsinfo
            || guest.kind != GuestKind::Qemu
            || guest.status != "running"
            || !agent_enabled(config)
        {
            return Vec::new();
        }

        match self.client.fetch_fs_info(guest).await {
            Ok(filesystems) => pack_fs_columns(&filesystems),
            Err(e) => {
                debug!(
                    "No agent filesystem info for {}/{}: {}",
                    guest.node, guest.vmid, e
                );
                Vec::new()
            }
        }
    }
}

/// Whether the config enables the guest agent: either `agent: "1"` (or the
/// numeric 1) or a property string with a leading `1` flag or `enabled=1`.
fn agent_enabled(config: &Map<String, Value>) -> bool {
    let Some(value) = config.get("agent") else {
        return false;
    };
    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Number(n) => return n.as_u64() == Some(1),
        _ => return false,
    };
    raw.split(',').enumerate().any(|(i, segment)| {
        match segment.split_once('=') {
            Some(("enabled", v)) => v == "1",
            Some(_) => false,
            None => i == 0 && segment == "1",
        }
    })
}

/// One `fsinfo.<mountpoint>` column per real filesystem plus usage sums.
/// Optical pseudo-filesystems and entries without size data are skipped.
fn pack_fs_columns(filesystems: &[FilesystemInfo]) -> Vec<(String, String)> {
    let mut columns = Vec::new();
    let mut sum_used: u64 = 0;
    let mut sum_total: u64 = 0;
    let mut sum_unused: u64 = 0;

    for fs in filesystems {
        if fs.fs_type == "CDFS" || fs.fs_type == "UDF" {
            debug!("Skipping {} of type {}", fs.mountpoint, fs.fs_type);
            continue;
        }
        let (Some(total), Some(used)) = (fs.total_bytes, fs.used_bytes) else {
            debug!("Skipping {} without size data", fs.mountpoint);
            continue;
        };
        let unused = total.saturating_sub(used);
        let percent_free = if total > 0 {
            unused as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        columns.push((
            format!("fsinfo.{}", fs.mountpoint),
            format!(
                "filesystem={},total-bytes={},used-bytes={},unused-bytes={},percent-free={:.1}",
                fs.fs_type, total, used, unused, percent_free
            ),
        ));
        sum_used += used;
        sum_total += total;
        sum_unused += unused;
    }

    columns.push(("sum_used_bytes".to_string(), sum_used.to_string()));
    columns.push(("sum_total_bytes".to_string(), sum_total.to_string()));
    columns.push(("sum_unused_bytes".to_string(), sum_unused.to_string()));
    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_agent_enabled_variants() {
        assert!(agent_enabled(&config(json!({"agent": "1"}))));
        assert!(agent_enabled(&config(json!({"agent": 1}))));
        assert!(agent_enabled(&config(
            json!({"agent": "1,fstrim_cloned_disks=1"})
        )));
        assert!(agent_enabled(&config(json!({"agent": "enabled=1,type=virtio"}))));

        assert!(!agent_enabled(&config(json!({"agent": "0"}))));
        assert!(!agent_enabled(&config(json!({"agent": "enabled=0"}))));
        assert!(!agent_enabled(&config(json!({"cores": 4}))));
    }

    #[test]
    fn test_pack_fs_columns_skips_optical_and_sizeless() {
        let filesystems = vec![
            FilesystemInfo {
                fs_type: "ext4".to_string(),
                mountpoint: "/".to_string(),
                total_bytes: Some(1000),
                used_bytes: Some(400),
            },
            FilesystemInfo {
                fs_type: "CDFS".to_string(),
                mountpoint: "/media/cdrom".to_string(),
                total_bytes: Some(700),
                used_bytes: Some(700),
            },
            FilesystemInfo {
                fs_type: "tmpfs".to_string(),
                mountpoint: "/run".to_string(),
                total_bytes: None,
                used_bytes: None,
            },
        ];

        let columns = pack_fs_columns(&filesystems);
        let root = columns.iter().find(|(c, _)| c == "fsinfo./").unwrap();
        assert_eq!(
            root.1,
            "filesystem=ext4,total-bytes=1000,used-bytes=400,unused-bytes=600,percent-free=60.0"
        );
        assert!(!columns.iter().any(|(c, _)| c.contains("cdrom")));
        assert!(!columns.iter().any(|(c, _)| c.contains("/run")));

        let sums: Vec<_> = columns
            .iter()
            .filter(|(c, _)| c.starts_with("sum_"))
            .collect();
        assert_eq!(sums.len(), 3);
        assert!(columns.contains(&("sum_total_bytes".to_string(), "1000".to_string())));
        assert!(columns.contains(&("sum_unused_bytes".to_string(), "600".to_string())));
    }
}
