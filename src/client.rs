//! PVE API client for communicating with Proxmox VE.
//!
//! This module provides the authenticated HTTP layer plus the typed read
//! endpoints the exporter needs: node enumeration, per-node guest lists,
//! per-guest configuration and the QEMU guest-agent filesystem query.

use crate::config::PveConfig;
use crate::error::{PveError, Result};
use crate::session::SessionManager;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// PVE API client.
///
/// All requests are GETs authenticated with the `PVEAuthCookie` ticket.
/// A 401 triggers one ticket refresh followed by one retry; transport
/// failures and 5xx answers are retried once (the calls are idempotent
/// reads). Everything else is surfaced to the caller.
pub struct PveClient {
    client: Client,
    endpoint: String,
    session: SessionManager,
}

impl PveClient {
    /// Create a new PVE API client.
    ///
    /// # Arguments
    ///
    /// * `config` - PVE connection configuration
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pve_inventory::client::PveClient;
    /// use pve_inventory::config::PveConfig;
    ///
    /// let config = PveConfig {
    ///     endpoint: "https://pve.example.com:8006".to_string(),
    ///     username: "audit@pve".to_string(),
    ///     password: "secret".to_string(),
    ///     verify_tls: false,
    ///     timeout_secs: 10,
    ///     ticket_lifetime_secs: 6600,
    /// };
    /// let client = PveClient::new(config).unwrap();
    /// ```
    pub fn new(config: PveConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        let session = SessionManager::new(client.clone(), config);

        Ok(Self {
            client,
            endpoint,
            session,
        })
    }

    /// Authenticate eagerly. Failing here is fatal to the run.
    pub async fn login(&self) -> Result<()> {
        self.session.login().await?;
        Ok(())
    }

    /// List the cluster nodes.
    pub async fn list_nodes(&self) -> Result<Vec<Node>> {
        self.get_data("/nodes").await
    }

    /// List the guests on one node, qemu VMs first, then lxc containers.
    /// Order within each kind is the order the cluster returned.
    pub async fn list_guests(&self, node: &str) -> Result<Vec<GuestRef>> {
        let mut guests = Vec::new();
        for kind in [GuestKind::Qemu, GuestKind::Lxc] {
            let path = format!("/nodes/{}/{}", node, kind.api_segment());
            let items: Vec<GuestListItem> = self.get_data(&path).await?;
            guests.extend(items.into_iter().map(|item| GuestRef {
                node: node.to_string(),
                vmid: item.vmid,
                kind,
                name: item.name.unwrap_or_default(),
                status: item.status.unwrap_or_default(),
            }));
        }
        Ok(guests)
    }

    /// Fetch the raw configuration object for one guest.
    ///
    /// # Errors
    ///
    /// Failures are wrapped in [`PveError::Fetch`] so the caller can record
    /// the guest and move on; only an authentication failure keeps its own
    /// variant (it is fatal, not per-guest).
    pub async fn fetch_config(&self, guest: &GuestRef) -> Result<Map<String, Value>> {
        let path = format!(
            "/nodes/{}/{}/{}/config",
            guest.node,
            guest.kind.api_segment(),
            guest.vmid
        );
        self.get_data(&path).await.map_err(|e| guest.wrap_error(e))
    }

    /// Query the QEMU guest agent for filesystem usage. Only meaningful for
    /// running qemu guests with the agent enabled; the agent being down
    /// surfaces as an API error the caller is expected to tolerate.
    pub async fn fetch_fs_info(&self, guest: &GuestRef) -> Result<Vec<FilesystemInfo>> {
        let path = format!("/nodes/{}/qemu/{}/agent/get-fsinfo", guest.node, guest.vmid);
        let info: AgentFsInfo = self.get_data(&path).await?;
        Ok(info.result)
    }

    /// GET an API path and unwrap the `data` envelope.
    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}/api2/json{}", self.endpoint, path);
        debug!("GET {}", url);

        let mut session = self.session.ensure_valid().await?;
        let mut retried = false;
        let mut refreshed = false;

        loop {
            let response = match self
                .client
                .get(&url)
                .header(header::COOKIE, session.cookie_header())
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if !retried => {
                    warn!("GET {} failed ({}), retrying once", path, e);
                    retried = true;
                    continue;
                }
                Err(e) => return Err(PveError::Http(e)),
            };

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                if refreshed {
                    return Err(PveError::Auth(
                        "ticket rejected again after refresh".to_string(),
                    ));
                }
                warn!("Ticket rejected for {}, refreshing and retrying", path);
                session = self.session.refresh().await?;
                refreshed = true;
                continue;
            }
            if status.is_server_error() && !retried {
                warn!("GET {} answered {}, retrying once", path, status);
                retried = true;
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                warn!("GET {} failed with status {}", path, status);
                return Err(PveError::Api { status, body });
            }

            let body = response.text().await?;
            let api_response: ApiResponse<T> = serde_json::from_str(&body).map_err(|e| {
                // truncate on a char boundary, the body may not be ASCII
                let preview: String = body.chars().take(200).collect();
                PveError::Parse(format!(
                    "Failed to parse response from {}: {}. Body preview: {}",
                    path, e, preview
                ))
            })?;
            return Ok(api_response.data);
        }
    }
}

/// Generic PVE API response wrapper.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    data: T,
}

/// A cluster member host, as returned by `/nodes`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Node {
    /// Node name
    pub node: String,
    /// Node status (online, offline, unknown)
    #[serde(default)]
    pub status: Option<String>,
}

/// Guest kind, selecting the API sub-tree a guest lives under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestKind {
    Qemu,
    Lxc,
}

impl GuestKind {
    /// The path segment used by the PVE API for this kind.
    pub fn api_segment(&self) -> &'static str {
        match self {
            GuestKind::Qemu => "qemu",
            GuestKind::Lxc => "lxc",
        }
    }
}

impl std::fmt::Display for GuestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.api_segment())
    }
}

/// One entry of a per-node guest list.
#[derive(Debug, Clone, Deserialize)]
pub struct GuestListItem {
    /// Numeric guest id (lxc lists have been observed returning it as a
    /// string, so both encodings are accepted)
    #[serde(deserialize_with = "deserialize_vmid")]
    pub vmid: u32,
    /// Guest name
    #[serde(default)]
    pub name: Option<String>,
    /// Guest status (running, stopped, ...)
    #[serde(default)]
    pub status: Option<String>,
}

/// Fully qualified guest reference: the join key between enumeration and
/// fetch, plus the enumeration metadata used to seed identifier columns.
#[derive(Debug, Clone)]
pub struct GuestRef {
    pub node: String,
    pub vmid: u32,
    pub kind: GuestKind,
    pub name: String,
    pub status: String,
}

impl GuestRef {
    fn wrap_error(&self, source: PveError) -> PveError {
        match source {
            auth @ PveError::Auth(_) => auth,
            other => PveError::Fetch {
                node: self.node.clone(),
                vmid: self.vmid,
                kind: self.kind,
                source: Box::new(other),
            },
        }
    }
}

/// Envelope of the agent `get-fsinfo` answer.
#[derive(Debug, Deserialize)]
struct AgentFsInfo {
    #[serde(default)]
    result: Vec<FilesystemInfo>,
}

/// One guest filesystem as reported by the QEMU guest agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemInfo {
    /// Filesystem type (ext4, xfs, CDFS, ...)
    #[serde(rename = "type")]
    pub fs_type: String,
    /// Mountpoint inside the guest
    pub mountpoint: String,
    /// Total size in bytes; absent for pseudo-filesystems
    #[serde(rename = "total-bytes", default)]
    pub total_bytes: Option<u64>,
    /// Used bytes
    #[serde(rename = "used-bytes", default)]
    pub used_bytes: Option<u64>,
}

fn deserialize_vmid<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid vmid: {}", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guest_list_item_accepts_numeric_and_string_vmid() {
        let numeric: GuestListItem =
            serde_json::from_str(r#"{"vmid": 100, "name": "web", "status": "running"}"#).unwrap();
        assert_eq!(numeric.vmid, 100);

        let text: GuestListItem =
            serde_json::from_str(r#"{"vmid": "204", "status": "stopped"}"#).unwrap();
        assert_eq!(text.vmid, 204);
        assert_eq!(text.name, None);
    }

    #[test]
    fn test_guest_list_item_rejects_garbage_vmid() {
        let result: std::result::Result<GuestListItem, _> =
            serde_json::from_str(r#"{"vmid": "not-a-number"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_guest_kind_api_segment() {
        assert_eq!(GuestKind::Qemu.api_segment(), "qemu");
        assert_eq!(GuestKind::Lxc.api_segment(), "lxc");
        assert_eq!(GuestKind::Lxc.to_string(), "lxc");
    }

    #[test]
    fn test_filesystem_info_tolerates_missing_sizes() {
        let fs: FilesystemInfo =
            serde_json::from_str(r#"{"type": "CDFS", "mountpoint": "/media/cdrom"}"#).unwrap();
        assert_eq!(fs.fs_type, "CDFS");
        assert_eq!(fs.total_bytes, None);
    }
}
