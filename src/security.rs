//! URL security validation applied before every outbound fetch.
//!
//! The checks run in a fixed order: dangerous schemes, non-HTTPS schemes,
//! cloud metadata endpoints, private IPv4 literals, and finally a DNS probe
//! for names that might resolve into private ranges. A short allowlist of
//! well-known public suffixes skips the probe. DNS failure is not an error;
//! the fetch proceeds and fails naturally.
//!
//! Redirects are additionally constrained to the original host, so a public
//! page cannot bounce the fetcher into an internal address.

use crate::{Error, Result};
use std::net::{IpAddr, Ipv4Addr};
use tokio::net::lookup_host;
use url::Url;

/// Scheme prefixes rejected outright, before any other inspection.
const DANGEROUS_SCHEMES: &[&str] = &[
    "file:",
    "ftp:",
    "ftps:",
    "data:",
    "javascript:",
    "vbscript:",
    "about:",
    "blob:",
    "gopher:",
    "dict:",
    "tftp:",
];

/// Hosts that expose cloud instance metadata; matched exactly or as a
/// dot-suffix of the request host.
const METADATA_HOSTS: &[&str] = &[
    "169.254.169.254",
    "metadata.google.internal",
    "100.100.100.200",
    "fd00:ec2::254",
    "metadata",
    "metadata.azure.com",
];

/// Well-known public suffixes that skip the DNS probe.
const DNS_PROBE_ALLOWLIST: &[&str] = &[
    "google.com",
    "github.com",
    "stackoverflow.com",
    "wikipedia.org",
    "medium.com",
    "arxiv.org",
];

/// Validate a URL for outbound fetching.
///
/// Returns the parsed URL on success so callers do not parse twice.
///
/// # Errors
///
/// Returns [`Error::Security`] for any rejected URL. Security errors are
/// never retried and never wrapped as recoverable tool error results.
pub async fn validate_url(raw: &str) -> Result<Url> {
    let lowered = raw.trim().to_lowercase();

    for scheme in DANGEROUS_SCHEMES {
        if lowered.starts_with(scheme) {
            return Err(Error::security(format!(
                "Blocked dangerous URL scheme: {}",
                scheme.trim_end_matches(':')
            )));
        }
    }

    if !lowered.starts_with("https:") {
        return Err(Error::security("Only HTTPS URLs are allowed"));
    }

    let url = Url::parse(raw.trim()).map_err(|e| Error::security(format!("Invalid URL: {}", e)))?;

    let host = url
        .host_str()
        .ok_or_else(|| Error::security("URL has no host"))?
        .to_lowercase();
    let host = host.trim_matches(|c| c == '[' || c == ']');

    for metadata in METADATA_HOSTS {
        if host == *metadata || host.ends_with(&format!(".{}", metadata)) {
            return Err(Error::security("Blocked cloud metadata endpoint"));
        }
    }

    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        if is_private_ipv4(addr) {
            return Err(Error::security("Blocked private IP address"));
        }
        return Ok(url);
    }

    if is_allowlisted(host) {
        return Ok(url);
    }

    // DNS probe: a public-looking name must not resolve into private space.
    // Resolution failure is not a rejection; the fetch will fail on its own.
    match lookup_host((host, 443)).await {
        Ok(addrs) => {
            for addr in addrs {
                if is_private_ip(&addr.ip()) {
                    return Err(Error::security(format!(
                        "Blocked private IP address for host '{}'",
                        host
                    )));
                }
            }
        }
        Err(e) => {
            log::debug!("DNS probe for '{}' failed, allowing fetch: {}", host, e);
        }
    }

    Ok(url)
}

/// Validate a redirect target.
///
/// Cross-host redirects are disallowed; the target is then validated like
/// any other fetch URL.
pub async fn validate_redirect(original: &Url, next: &Url) -> Result<()> {
    if original.host_str() != next.host_str() {
        return Err(Error::security(format!(
            "Cross-host redirect not allowed: {} -> {}",
            original.host_str().unwrap_or("?"),
            next.host_str().unwrap_or("?"),
        )));
    }
    validate_url(next.as_str()).await?;
    Ok(())
}

fn is_allowlisted(host: &str) -> bool {
    DNS_PROBE_ALLOWLIST
        .iter()
        .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix)))
}

/// Private ranges rejected for dotted-quad literals: 10/8, 172.16/12,
/// 192.168/16, 127/8, 169.254/16.
fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    octets[0] == 10
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
        || octets[0] == 127
        || (octets[0] == 169 && octets[1] == 254)
}

fn is_private_ip(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => is_private_ipv4(*v4),
        IpAddr::V6(v6) => v6.is_loopback() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dangerous_schemes_rejected() {
        for raw in [
            "file:///etc/passwd",
            "ftp://example.com/x",
            "data:text/html,hi",
            "javascript:alert(1)",
            "gopher://example.com",
        ] {
            let err = validate_url(raw).await.unwrap_err();
            assert!(
                err.to_string().contains("Blocked dangerous URL scheme"),
                "{raw}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_http_rejected_before_metadata_check() {
        // Scheme check fires first, even for a metadata address.
        let err = validate_url("http://169.254.169.254/latest/meta-data")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Only HTTPS URLs are allowed"));
    }

    #[tokio::test]
    async fn test_metadata_endpoints_rejected() {
        for raw in [
            "https://169.254.169.254/latest/meta-data",
            "https://metadata.google.internal/computeMetadata/v1/",
            "https://foo.metadata.azure.com/",
            "https://metadata/",
            "https://100.100.100.200/meta",
        ] {
            let err = validate_url(raw).await.unwrap_err();
            assert!(
                err.to_string().contains("Blocked cloud metadata endpoint"),
                "{raw}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_private_ipv4_literals_rejected() {
        for raw in [
            "https://10.0.0.1/",
            "https://172.16.0.1/",
            "https://172.31.255.255/",
            "https://192.168.1.1/",
            "https://127.0.0.1/",
            "https://169.254.1.1/",
        ] {
            let err = validate_url(raw).await.unwrap_err();
            assert!(
                err.to_string().contains("Blocked private IP address"),
                "{raw}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn test_public_ipv4_literal_allowed() {
        assert!(validate_url("https://93.184.216.34/").await.is_ok());
        // 172.32.0.1 is just outside 172.16/12.
        assert!(validate_url("https://172.32.0.1/").await.is_ok());
    }

    #[tokio::test]
    async fn test_allowlisted_hosts_skip_probe() {
        assert!(validate_url("https://github.com/rust-lang/rust").await.is_ok());
        assert!(validate_url("https://en.wikipedia.org/wiki/Rust").await.is_ok());
    }

    #[tokio::test]
    async fn test_scheme_case_insensitive() {
        assert!(validate_url("HTTPS://github.com/").await.is_ok());
        let err = validate_url("HTTP://github.com/").await.unwrap_err();
        assert!(err.to_string().contains("Only HTTPS URLs are allowed"));
    }

    #[tokio::test]
    async fn test_cross_host_redirect_rejected() {
        let original = Url::parse("https://github.com/a").unwrap();
        let next = Url::parse("https://evil.internal/b").unwrap();
        let err = validate_redirect(&original, &next).await.unwrap_err();
        assert!(err.to_string().contains("Cross-host redirect"));
    }

    #[tokio::test]
    async fn test_same_host_redirect_allowed() {
        let original = Url::parse("https://github.com/a").unwrap();
        let next = Url::parse("https://github.com/b").unwrap();
        assert!(validate_redirect(&original, &next).await.is_ok());
    }

    #[test]
    fn test_private_ipv4_ranges() {
        assert!(is_private_ipv4(Ipv4Addr::new(10, 1, 2, 3)));
        assert!(is_private_ipv4(Ipv4Addr::new(172, 16, 0, 1)));
        assert!(!is_private_ipv4(Ipv4Addr::new(172, 15, 0, 1)));
        assert!(!is_private_ipv4(Ipv4Addr::new(172, 32, 0, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(192, 168, 0, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(127, 0, 0, 1)));
        assert!(is_private_ipv4(Ipv4Addr::new(169, 254, 0, 1)));
        assert!(!is_private_ipv4(Ipv4Addr::new(8, 8, 8, 8)));
    }
}
