use anyhow::anyhow;
use std::net::SocketAddr;
use url::Url;

pub fn sanitize_url(url: &str) -> anyhow::Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(anyhow!("URL cannot be empty"));
    }

    if url.contains('\0') || url.contains('\r') || url.contains('\n') {
        return Err(anyhow!("URL contains invalid control characters"));
    }

    let parsed_url = Url::parse(url).map_err(|e| anyhow!("Invalid URL format: {}", e))?;

    // Only allow http and https schemes
    match parsed_url.scheme() {
        "http" | "https" => {}
        other => return Err(anyhow!("Unsupported URL scheme: {}", other)),
    }

    // Strip any trailing slash so callers can append paths uniformly
    Ok(parsed_url.to_string().trim_end_matches('/').to_string())
}

pub fn parse_socket_addr(s: &str) -> anyhow::Result<SocketAddr> {
    s.parse()
        .map_err(|e| anyhow!("invalid listen address {}: {}", s, e))
}

/// Base URL of a node's API given its registry address and port.
pub fn node_base_url(address: &str, port: u16) -> String {
    format!("http://{}:{}", address, port)
}
