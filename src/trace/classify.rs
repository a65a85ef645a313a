//! Private/reserved IPv4 classification.

/// Returns true for private, loopback, link-local, wildcard or malformed addresses.
///
/// Anything that is not four dot-separated integers counts as private, so no
/// geolocation lookup is ever attempted for it.
pub fn is_private_ip(ip: &str) -> bool {
    if ip.is_empty() || ip == "*" {
        return true;
    }

    let octets: Vec<u32> = match ip.split('.').map(|p| p.parse::<u32>()).collect() {
        Ok(octets) => octets,
        Err(_) => return true,
    };
    if octets.len() != 4 {
        return true;
    }

    match (octets[0], octets[1]) {
        (10, _) => true,
        (172, 16..=31) => true,
        (192, 168) => true,
        (127, _) => true,
        (169, 254) => true,
        _ => false,
    }
}
