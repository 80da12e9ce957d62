use common::schemas::{DiagnosticsRequest, NodeKind, WorkloadKind};
use common::url_utils::{node_base_url, parse_socket_addr, sanitize_url};

#[test]
fn sanitize_url_accepts_http_and_https() {
    assert_eq!(
        sanitize_url("http://10.0.0.1:7070/").unwrap(),
        "http://10.0.0.1:7070"
    );
    assert_eq!(
        sanitize_url("  https://peer.example:8443  ").unwrap(),
        "https://peer.example:8443"
    );
}

#[test]
fn sanitize_url_rejects_bad_input() {
    assert!(sanitize_url("").is_err());
    assert!(sanitize_url("ftp://peer.example").is_err());
    assert!(sanitize_url("http://peer\r\n.example").is_err());
    assert!(sanitize_url("not a url").is_err());
}

#[test]
fn parse_socket_addr_round_trips() {
    let addr = parse_socket_addr("0.0.0.0:7070").unwrap();
    assert_eq!(addr.port(), 7070);
    assert!(parse_socket_addr("nonsense").is_err());
}

#[test]
fn node_base_url_formats_address_and_port() {
    assert_eq!(node_base_url("10.1.2.3", 7070), "http://10.1.2.3:7070");
}

#[test]
fn wire_enums_use_snake_case() {
    assert_eq!(
        serde_json::to_string(&NodeKind::Hypervisor).unwrap(),
        "\"hypervisor\""
    );
    assert_eq!(
        serde_json::to_string(&WorkloadKind::VirtualMachine).unwrap(),
        "\"virtual_machine\""
    );
}

#[test]
fn diagnostics_request_defaults_to_all_nodes() {
    let req: DiagnosticsRequest = serde_json::from_str("{}").unwrap();
    assert!(req.nodes.is_none());
    assert!(req.cluster.is_none());
}
