//! Utility functions for fedcoord

use crate::common::config::PeerConfig;
use crate::common::{Error, Result};

/// Turn a bare `host:port` into an `http://` URL; URLs pass through unchanged.
pub fn http_url(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    }
}

/// Parse a peer spec of the form `id=host:port`.
pub fn parse_peer(spec: &str) -> Result<PeerConfig> {
    let (id, addr) = spec
        .split_once('=')
        .ok_or_else(|| Error::InvalidConfig(format!("peer must be id=addr, got {}", spec)))?;

    let id: u64 = id
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("invalid peer id: {}", id)))?;
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(Error::InvalidConfig(format!("empty address for peer {}", id)));
    }

    Ok(PeerConfig {
        id,
        addr: addr.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_url() {
        assert_eq!(http_url("10.0.0.1:7000"), "http://10.0.0.1:7000");
        assert_eq!(http_url("http://node-a:7000/"), "http://node-a:7000");
        assert_eq!(http_url("https://node-a"), "https://node-a");
    }

    #[test]
    fn test_parse_peer() {
        let peer = parse_peer("2=coord-2:7001").unwrap();
        assert_eq!(peer.id, 2);
        assert_eq!(peer.addr, "coord-2:7001");

        assert!(parse_peer("coord-2:7001").is_err());
        assert!(parse_peer("x=coord-2:7001").is_err());
        assert!(parse_peer("3=").is_err());
    }
}
