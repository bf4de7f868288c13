//! Input validation
//!
//! Every value that ends up on an `ip`, `mmcli` or `resolvectl` command line
//! passes through here first.

use crate::error::{WwanError, WwanResult};
use std::net::IpAddr;

/// IFNAMSIZ minus the terminating NUL
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// 3GPP TS 23.003 limits the APN network identifier to 100 octets
const MAX_APN_LEN: usize = 100;

/// Check a modem network interface name before it reaches `ip` or `ping`.
///
/// Modem netdevs are named `wwan0`, `wwp0s20u4i4`, `wwx<mac>`, `rmnet_data0`
/// or `qmimux0`, and QMAP sub-interfaces add a `.N` suffix. The first
/// character must be a letter so the name can never read as an option or a
/// relative path.
pub fn validate_interface_name(name: &str) -> WwanResult<()> {
    let invalid = |why: &str| WwanError::InvalidParameter(format!("Invalid interface name '{}': {}", name, why));

    let Some(first) = name.chars().next() else {
        return Err(WwanError::InvalidParameter("Interface name cannot be empty".to_string()));
    };
    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(invalid(&format!("longer than {} bytes", MAX_INTERFACE_NAME_LEN)));
    }
    if !first.is_ascii_alphabetic() {
        return Err(invalid("must start with a letter"));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')))
    {
        return Err(invalid(&format!("unexpected character {:?}", c)));
    }
    Ok(())
}

/// Validate an APN
///
/// Labels of letters, digits and hyphens separated by dots. The value is
/// embedded in `--create-bearer=apn=...`, so commas and `=` are rejected.
pub fn validate_apn(apn: &str) -> WwanResult<()> {
    if apn.is_empty() {
        return Err(WwanError::InvalidParameter("APN cannot be empty".to_string()));
    }

    if apn.len() > MAX_APN_LEN {
        return Err(WwanError::InvalidParameter(format!(
            "APN too long (max {} characters)",
            MAX_APN_LEN
        )));
    }

    for label in apn.split('.') {
        if label.is_empty() {
            return Err(WwanError::InvalidParameter(format!(
                "APN '{}' has an empty label",
                apn
            )));
        }
        if let Some(c) = label
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
        {
            return Err(WwanError::InvalidParameter(format!(
                "Invalid APN '{}': contains invalid character '{}'",
                apn, c
            )));
        }
    }

    Ok(())
}

/// Validate prefix length for IPv4 or IPv6
pub fn validate_prefix_len(prefix: u8, is_ipv6: bool) -> WwanResult<()> {
    let max = if is_ipv6 { 128 } else { 32 };
    if prefix > max {
        return Err(WwanError::InvalidParameter(format!(
            "Prefix length {} exceeds maximum {}",
            prefix, max
        )));
    }
    Ok(())
}

/// Validate MTU value
pub fn validate_mtu(mtu: u32) -> WwanResult<()> {
    // IPv4 minimum is 68; cellular links rarely exceed 1500
    if mtu < 68 {
        return Err(WwanError::InvalidParameter(
            "MTU must be at least 68 bytes".to_string(),
        ));
    }
    if mtu > 9000 {
        return Err(WwanError::InvalidParameter(
            "MTU cannot exceed 9000 bytes".to_string(),
        ));
    }
    Ok(())
}

/// Validate hostname or IP used as a probe target
pub fn validate_hostname(hostname: &str) -> WwanResult<()> {
    if hostname.is_empty() || hostname.len() > 253 {
        return Err(WwanError::InvalidParameter(
            "Hostname must be 1-253 characters".to_string(),
        ));
    }

    if hostname.starts_with('-') || hostname.starts_with('.') || hostname.ends_with('.') {
        return Err(WwanError::InvalidParameter(format!(
            "Invalid hostname: {}",
            hostname
        )));
    }

    if hostname.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    for label in hostname.split('.') {
        if label.is_empty() || label.len() > 63 || label.ends_with('-') {
            return Err(WwanError::InvalidParameter(format!(
                "Invalid hostname label in {}",
                hostname
            )));
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(WwanError::InvalidParameter(format!(
                "Invalid hostname: {}",
                hostname
            )));
        }
    }

    Ok(())
}
