//! Actuator address parsing.

use anyhow::{bail, Result};

/// Port used when the address names only a host.
pub const DEFAULT_PORT: u16 = 8080;

/// Turn `host`, `host:port` or a full URL into the client's base URL.
pub fn base_url(target: &str) -> Result<String> {
    let target = target.trim().trim_end_matches('/');
    if target.is_empty() {
        bail!("actuator address is empty");
    }

    if let Some((scheme, rest)) = target.split_once("://") {
        if !matches!(scheme, "http" | "https") {
            bail!("unsupported scheme {scheme:?} in {target:?}");
        }
        if rest.is_empty() {
            bail!("no host in {target:?}");
        }
        return Ok(target.to_string());
    }

    if has_port(target)? {
        Ok(format!("http://{target}"))
    } else {
        Ok(format!("http://{target}:{DEFAULT_PORT}"))
    }
}

fn has_port(host: &str) -> Result<bool> {
    // Bracketed IPv6 literal, e.g. [::1]:8080
    let port = if host.starts_with('[') {
        host.rsplit_once("]:").map(|(_, port)| port)
    } else {
        host.rsplit_once(':').map(|(_, port)| port)
    };

    match port {
        None => Ok(false),
        Some(port) if port.parse::<u16>().is_ok() => Ok(true),
        Some(port) => bail!("invalid port {port:?} in {host:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_gets_default_port() {
        assert_eq!(base_url("spot.local").unwrap(), "http://spot.local:8080");
        assert_eq!(base_url("192.168.80.3").unwrap(), "http://192.168.80.3:8080");
    }

    #[test]
    fn explicit_port_is_kept() {
        assert_eq!(base_url("localhost:9000").unwrap(), "http://localhost:9000");
        assert_eq!(base_url("[::1]:9000").unwrap(), "http://[::1]:9000");
        assert_eq!(base_url("[::1]").unwrap(), "http://[::1]:8080");
    }

    #[test]
    fn urls_pass_through_without_trailing_slash() {
        assert_eq!(
            base_url("https://spot.example.com/").unwrap(),
            "https://spot.example.com"
        );
    }

    #[test]
    fn invalid_addresses_are_rejected() {
        assert!(base_url("  ").is_err());
        assert!(base_url("ftp://spot").is_err());
        assert!(base_url("http://").is_err());
        assert!(base_url("spot:http").is_err());
    }
}
