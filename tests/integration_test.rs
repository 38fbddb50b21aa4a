//! Integration tests for the PVE client
//!
//! These tests use mockito to simulate PVE API responses

use mockito::{Mock, Server};
use pve_inventory::{client::PveClient, config::PveConfig, PveError};

/// Helper to create a test PVE config pointing to the mock server
fn create_test_config(server_url: &str) -> PveConfig {
    PveConfig {
        endpoint: server_url.to_string(),
        username: "test@pve".to_string(),
        password: "secret".to_string(),
        verify_tls: false,
        timeout_secs: 5,
        ticket_lifetime_secs: 6600,
    }
}

/// Helper to mock a successful ticket request
async fn mock_login(server: &mut Server) -> Mock {
    mock_login_times(server, 1).await
}

/// Same, expecting the ticket endpoint to be hit an exact number of times
async fn mock_login_times(server: &mut Server, hits: usize) -> Mock {
    server
        .mock("POST", "/api2/json/access/ticket")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
            "data": {
                "ticket": "PVE:test@pve:4EEC61E2::signature",
                "CSRFPreventionToken": "4EEC61E2:csrf"
            }
        }"#,
        )
        .expect(hits)
        .create_async()
        .await
}

#[tokio::test]
async fn test_login_success() {
    let mut server = Server::new_async().await;
    let mock = mock_login(&mut server).await;

    let client = PveClient::new(create_test_config(&server.url())).unwrap();
    client.login().await.unwrap();

    mock.assert_async().await;
}

#[tokio::test]
async fn test_login_invalid_credentials() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("POST", "/api2/json/access/ticket")
        .with_status(401)
        .create_async()
        .await;

    let client = PveClient::new(create_test_config(&server.url())).unwrap();
    let result = client.login().await;

    assert!(matches!(result, Err(PveError::Auth(_))));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_login_unreachable_endpoint() {
    // nothing listens on port 1
    let client = PveClient::new(create_test_config("http://127.0.0.1:1")).unwrap();
    let result = client.login().await;

    assert!(matches!(result, Err(PveError::Auth(_))));
}

#[tokio::test]
async fn test_list_nodes_success() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;

    let mock = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
            "data": [
                {"node": "pve1", "status": "online"},
                {"node": "pve2", "status": "online"}
            ]
        }"#,
        )
        .create_async()
        .await;

    let client = PveClient::new(create_test_config(&server.url())).unwrap();
    let nodes = client.list_nodes().await.unwrap();

    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].node, "pve1");
    assert_eq!(nodes[1].node, "pve2");

    mock.assert_async().await;
}

#[tokio::test]
async fn test_list_guests_merges_qemu_and_lxc() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;

    let qemu = server
        .mock("GET", "/api2/json/nodes/pve1/qemu")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
            "data": [
                {"vmid": 100, "name": "web", "status": "running"},
                {"vmid": 101, "name": "db", "status": "stopped"}
            ]
        }"#,
        )
        .create_async()
        .await;

    // lxc lists have been seen returning vmid as a string
    let lxc = server
        .mock("GET", "/api2/json/nodes/pve1/lxc")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
            "data": [
                {"vmid": "200", "name": "cache", "status": "running"}
            ]
        }"#,
        )
        .create_async()
        .await;

    let client = PveClient::new(create_test_config(&server.url())).unwrap();
    let guests = client.list_guests("pve1").await.unwrap();

    assert_eq!(guests.len(), 3);
    // qemu guests first, then lxc, each in cluster order
    assert_eq!(guests[0].vmid, 100);
    assert_eq!(guests[0].kind.to_string(), "qemu");
    assert_eq!(guests[1].vmid, 101);
    assert_eq!(guests[1].status, "stopped");
    assert_eq!(guests[2].vmid, 200);
    assert_eq!(guests[2].kind.to_string(), "lxc");
    assert_eq!(guests[2].name, "cache");

    qemu.assert_async().await;
    lxc.assert_async().await;
}

#[tokio::test]
async fn test_fetch_config_success() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;

    let qemu = server
        .mock("GET", "/api2/json/nodes/pve1/qemu")
        .with_status(200)
        .with_body(r#"{"data": [{"vmid": 100, "name": "web", "status": "running"}]}"#)
        .create_async()
        .await;
    let lxc = server
        .mock("GET", "/api2/json/nodes/pve1/lxc")
        .with_status(200)
        .with_body(r#"{"data": []}"#)
        .create_async()
        .await;
    let config_mock = server
        .mock("GET", "/api2/json/nodes/pve1/qemu/100/config")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
            "data": {
                "cores": 4,
                "memory": 8192,
                "scsi0": "local-lvm:vm-100-disk-0,size=32G"
            }
        }"#,
        )
        .create_async()
        .await;

    let client = PveClient::new(create_test_config(&server.url())).unwrap();
    let guests = client.list_guests("pve1").await.unwrap();
    let config = client.fetch_config(&guests[0]).await.unwrap();

    assert_eq!(config["cores"], 4);
    assert_eq!(config["memory"], 8192);
    assert_eq!(config["scsi0"], "local-lvm:vm-100-disk-0,size=32G");

    qemu.assert_async().await;
    lxc.assert_async().await;
    config_mock.assert_async().await;
}

#[tokio::test]
async fn test_persistent_401_refreshes_once_then_fails() {
    let mut server = Server::new_async().await;

    // initial login plus exactly one refresh after the observed 401
    let login = mock_login_times(&mut server, 2).await;
    let nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(401)
        .expect(2)
        .create_async()
        .await;

    let client = PveClient::new(create_test_config(&server.url())).unwrap();
    let result = client.list_nodes().await;

    assert!(matches!(result, Err(PveError::Auth(_))));
    login.assert_async().await;
    nodes.assert_async().await;
}

#[tokio::test]
async fn test_401_then_refresh_and_retry_succeeds() {
    let mut server = Server::new_async().await;

    // initial login plus the refresh triggered by the 401
    let login = mock_login_times(&mut server, 2).await;
    // first GET is rejected, the retry with the fresh ticket succeeds
    let stale = server
        .mock("GET", "/api2/json/nodes")
        .with_status(401)
        .expect(1)
        .create_async()
        .await;
    let fresh = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_body(r#"{"data": [{"node": "pve1", "status": "online"}]}"#)
        .expect(1)
        .create_async()
        .await;

    let client = PveClient::new(create_test_config(&server.url())).unwrap();
    let nodes = client.list_nodes().await.unwrap();

    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].node, "pve1");

    login.assert_async().await;
    stale.assert_async().await;
    fresh.assert_async().await;
}

#[tokio::test]
async fn test_non_json_body_surfaces_as_parse_error() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;

    // a proxy or maintenance page answering 200 with HTML; the multi-byte
    // character straddles the 200-byte preview cutoff
    let mut body = "a".repeat(199);
    body.push_str("é une page de maintenance");
    let nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(&body)
        .create_async()
        .await;

    let client = PveClient::new(create_test_config(&server.url())).unwrap();
    let result = client.list_nodes().await;

    match result {
        Err(PveError::Parse(message)) => {
            assert!(message.contains("Body preview"), "message: {}", message);
        }
        other => panic!("expected Parse error, got {:?}", other.map(|_| ())),
    }

    nodes.assert_async().await;
}

#[tokio::test]
async fn test_relogin_after_ticket_expiry() {
    let mut server = Server::new_async().await;

    let login = mock_login_times(&mut server, 2).await;
    let nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(200)
        .with_body(r#"{"data": [{"node": "pve1"}]}"#)
        .expect(2)
        .create_async()
        .await;

    let mut config = create_test_config(&server.url());
    config.ticket_lifetime_secs = 0; // every request finds the ticket aged out

    let client = PveClient::new(config).unwrap();
    client.list_nodes().await.unwrap();
    client.list_nodes().await.unwrap();

    login.assert_async().await;
    nodes.assert_async().await;
}

#[tokio::test]
async fn test_server_error_retried_once_then_surfaced() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;

    let nodes = server
        .mock("GET", "/api2/json/nodes")
        .with_status(500)
        .with_body("internal error")
        .expect(2)
        .create_async()
        .await;

    let client = PveClient::new(create_test_config(&server.url())).unwrap();
    let result = client.list_nodes().await;

    assert!(matches!(result, Err(PveError::Api { .. })));
    nodes.assert_async().await;
}

#[tokio::test]
async fn test_fetch_config_failure_is_wrapped_per_guest() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;

    let qemu = server
        .mock("GET", "/api2/json/nodes/pve1/qemu")
        .with_status(200)
        .with_body(r#"{"data": [{"vmid": 100, "name": "web", "status": "running"}]}"#)
        .create_async()
        .await;
    let lxc = server
        .mock("GET", "/api2/json/nodes/pve1/lxc")
        .with_status(200)
        .with_body(r#"{"data": []}"#)
        .create_async()
        .await;
    let config_mock = server
        .mock("GET", "/api2/json/nodes/pve1/qemu/100/config")
        .with_status(500)
        .expect(2)
        .create_async()
        .await;

    let client = PveClient::new(create_test_config(&server.url())).unwrap();
    let guests = client.list_guests("pve1").await.unwrap();
    let result = client.fetch_config(&guests[0]).await;

    match result {
        Err(PveError::Fetch { node, vmid, .. }) => {
            assert_eq!(node, "pve1");
            assert_eq!(vmid, 100);
        }
        other => panic!("expected Fetch error, got {:?}", other.map(|_| ())),
    }

    qemu.assert_async().await;
    lxc.assert_async().await;
    config_mock.assert_async().await;
}

#[tokio::test]
async fn test_fetch_fs_info_success() {
    let mut server = Server::new_async().await;
    let _login = mock_login(&mut server).await;

    let qemu = server
        .mock("GET", "/api2/json/nodes/pve1/qemu")
        .with_status(200)
        .with_body(r#"{"data": [{"vmid": 100, "name": "web", "status": "running"}]}"#)
        .create_async()
        .await;
    let lxc = server
        .mock("GET", "/api2/json/nodes/pve1/lxc")
        .with_status(200)
        .with_body(r#"{"data": []}"#)
        .create_async()
        .await;
    let fsinfo = server
        .mock("GET", "/api2/json/nodes/pve1/qemu/100/agent/get-fsinfo")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{
            "data": {
                "result": [
                    {"type": "ext4", "mountpoint": "/", "total-bytes": 10737418240, "used-bytes": 4294967296},
                    {"type": "CDFS", "mountpoint": "/media/cdrom"}
                ]
            }
        }"#,
        )
        .create_async()
        .await;

    let client = PveClient::new(create_test_config(&server.url())).unwrap();
    let guests = client.list_guests("pve1").await.unwrap();
    let filesystems = client.fetch_fs_info(&guests[0]).await.unwrap();

    assert_eq!(filesystems.len(), 2);
    assert_eq!(filesystems[0].mountpoint, "/");
    assert_eq!(filesystems[0].total_bytes, Some(10737418240));
    assert_eq!(filesystems[1].fs_type, "CDFS");

    qemu.assert_async().await;
    lxc.assert_async().await;
    fsinfo.assert_async().await;
}
