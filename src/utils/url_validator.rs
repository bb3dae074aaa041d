// SPDX-License-Identifier: GPL-3.0-only
use url::{Host, Url};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use anyhow::{Result, Context};

/// Maximum allowed URL length
const MAX_URL_LENGTH: usize = 2048;

/// Parse and validate a service or result URL
///
/// Checks:
/// - Validates URL length
/// - Only allows http/https schemes
/// - Requires a host
pub fn validate_url(url_str: &str) -> Result<Url> {
    if url_str.len() > MAX_URL_LENGTH {
        return Err(anyhow::anyhow!("URL exceeds maximum length of {} characters", MAX_URL_LENGTH));
    }

    let url = Url::parse(url_str)
        .context("Invalid URL format")?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(anyhow::anyhow!(
                "Invalid URL scheme: {} (only http and https are allowed)",
                scheme
            ));
        }
    }

    if url.host().is_none() {
        return Err(anyhow::anyhow!("URL must have a host"));
    }

    Ok(url)
}

/// Validate a result locator handed back by the feature service
///
/// A service on a public host may not point us at localhost or a private
/// network (SSRF protection). A service that is itself internal may.
pub fn validate_result_locator(locator: &Url, service: &Url) -> Result<()> {
    validate_url(locator.as_str())?;

    if is_internal_host(locator) && !is_internal_host(service) {
        return Err(anyhow::anyhow!(
            "Result locator host {} is internal but the service is not (not allowed for security reasons)",
            locator.host_str().unwrap_or_default()
        ));
    }

    Ok(())
}

/// Whether the URL's host is localhost or a private/internal address
pub fn is_internal_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => is_localhost(domain),
        Some(Host::Ipv4(ip)) => is_private_ip(&IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => is_private_ip(&IpAddr::V6(ip)),
        None => false,
    }
}

/// Check if a hostname is a localhost variant
fn is_localhost(host: &str) -> bool {
    let host_lower = host.to_lowercase();
    host_lower == "localhost" || host_lower.ends_with(".localhost")
}

/// Check if an IP address is private/internal
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => is_private_ipv4(ipv4),
        IpAddr::V6(ipv6) => is_private_ipv6(ipv6),
    }
}

/// Check if an IPv4 address is private/internal
fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16, 169.254.0.0/16, 127.0.0.0/8, 0.0.0.0
    ip.is_private() || ip.is_link_local() || ip.is_loopback() || ip.is_unspecified()
}

/// Check if an IPv6 address is private/internal
fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }

    let segments = ip.segments();

    // Unique local (fc00::/7)
    if (segments[0] & 0xfe00) == 0xfc00 {
        return true;
    }

    // Link-local (fe80::/10)
    if (segments[0] & 0xffc0) == 0xfe80 {
        return true;
    }

    // IPv4-mapped (::ffff:0:0/96)
    match ip.to_ipv4_mapped() {
        Some(ipv4) => is_private_ipv4(&ipv4),
        None => false,
    }
}
