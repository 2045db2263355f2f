//! Port extraction and validation for torrc directives.
//!
//! A directive value such as `127.0.0.1:9051 IsolateDestAddr` carries its
//! address in the first token; the port is whatever follows the last `:`
//! of that token, or the whole token when there is no colon.

pub const MAX_PORT: u32 = 65_535;

/// Parse 1–5 ASCII digits into a port in `1..=65535`.
pub fn parse_port(text: &str) -> Option<u16> {
    if text.is_empty() || text.len() > 5 || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse::<u32>()
        .ok()
        .filter(|p| *p >= 1 && *p <= MAX_PORT)
        .map(|p| p as u16)
}

/// The port segment of a directive value.
pub fn port_tail(value: &str) -> &str {
    let address = value.split_whitespace().next().unwrap_or("");
    match address.rfind(':') {
        Some(idx) => &address[idx + 1..],
        None => address,
    }
}

/// Port embedded in a directive value, if it is valid.
pub fn port_from_value(value: &str) -> Option<u16> {
    parse_port(port_tail(value))
}

/// Replace the port segment of `value`, keeping any host prefix and
/// trailing flags. Values whose port segment is not numeric are returned
/// unchanged.
pub fn replace_port(value: &str, port: u16) -> String {
    let trimmed = value.trim_start();
    let address_len = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
    let (address, rest) = trimmed.split_at(address_len);

    let (prefix, tail) = match address.rfind(':') {
        Some(idx) => address.split_at(idx + 1),
        None => ("", address),
    };

    if tail.is_empty() || !tail.bytes().all(|b| b.is_ascii_digit()) {
        return value.to_string();
    }

    format!("{prefix}{port}{rest}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_bounds() {
        assert_eq!(parse_port("9051"), Some(9051));
        assert_eq!(parse_port("65535"), Some(65535));
        assert_eq!(parse_port("65536"), None);
        assert_eq!(parse_port("0"), None);
        assert_eq!(parse_port(""), None);
        assert_eq!(parse_port("123456"), None);
        assert_eq!(parse_port("90a1"), None);
        assert_eq!(parse_port("+905"), None);
    }

    #[test]
    fn port_tail_handles_host_and_flags() {
        assert_eq!(port_tail("127.0.0.1:9051 IsolateDestAddr"), "9051");
        assert_eq!(port_tail("9150"), "9150");
        assert_eq!(port_tail("[::1]:9050"), "9050");
        assert_eq!(port_tail("auto"), "auto");
        assert_eq!(port_tail(""), "");
    }

    #[test]
    fn replace_port_preserves_everything_else() {
        assert_eq!(
            replace_port("127.0.0.1:9051 IsolateDestAddr", 9150),
            "127.0.0.1:9150 IsolateDestAddr"
        );
        assert_eq!(replace_port("9051", 9150), "9150");
        assert_eq!(replace_port("[::1]:9050 IPv6Traffic", 1080), "[::1]:1080 IPv6Traffic");
    }

    #[test]
    fn replace_port_ignores_non_numeric_segment() {
        assert_eq!(replace_port("auto", 9150), "auto");
        assert_eq!(replace_port("unix:/run/tor/socks", 9150), "unix:/run/tor/socks");
    }
}
