//! Destination parsing for address checks.

const DEFAULT_HTTPS_PORT: u16 = 443;

/// Extract `(host, port)` from an `https://host[:port]/...` address.
///
/// A port that is not 2 to 5 digits or exceeds 65535 is replaced by 443.
/// Returns `None` when no host remains.
pub fn parse_address(address: &str) -> Option<(String, u16)> {
    let address = address.trim();
    let rest = address.strip_prefix("https://").unwrap_or(address);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();

    let (host, port) = match authority.split_once(':') {
        Some((host, port)) => (host, parse_port(port)),
        None => (authority, DEFAULT_HTTPS_PORT),
    };

    if host.is_empty() {
        return None;
    }
    Some((host.to_ascii_lowercase(), port))
}

fn parse_port(text: &str) -> u16 {
    let valid_shape = (2..=5).contains(&text.len()) && text.bytes().all(|b| b.is_ascii_digit());
    if !valid_shape {
        return DEFAULT_HTTPS_PORT;
    }
    text.parse().unwrap_or(DEFAULT_HTTPS_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_https_port() {
        assert_eq!(parse_address("https://example.org/path?q=1"), Some(("example.org".into(), 443)));
        assert_eq!(parse_address("https://example.org"), Some(("example.org".into(), 443)));
    }

    #[test]
    fn explicit_port_is_used() {
        assert_eq!(parse_address("https://example.org:8443/"), Some(("example.org".into(), 8443)));
        assert_eq!(parse_address("https://example.org:65535/"), Some(("example.org".into(), 65535)));
    }

    #[test]
    fn malformed_port_falls_back() {
        assert_eq!(parse_address("https://example.org:8/"), Some(("example.org".into(), 443)));
        assert_eq!(parse_address("https://example.org:65536/"), Some(("example.org".into(), 443)));
        assert_eq!(parse_address("https://example.org:123456/"), Some(("example.org".into(), 443)));
        assert_eq!(parse_address("https://example.org:80a/"), Some(("example.org".into(), 443)));
    }

    #[test]
    fn host_is_required() {
        assert_eq!(parse_address("https:///path"), None);
        assert_eq!(parse_address(""), None);
    }
}
