//! Sticky-session cookie naming.

/// 64-bit FNV-1a.
pub fn fnv_hash(data: &str) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    data.bytes().fold(OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    })
}

/// Derive the cookie name for a service: an explicit name is sanitized, an
/// empty one becomes `_` followed by five hex characters of the service-name
/// hash.
pub fn cookie_name(explicit: &str, service: &str) -> String {
    if explicit.is_empty() {
        let digest = format!("{:016x}", fnv_hash(service));
        format!("_{}", &digest[..5])
    } else {
        sanitize(explicit)
    }
}

/// Replace every character outside `[A-Za-z0-9.-~_/]` with `_`.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '~' | '_' | '/') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Opaque cookie value identifying one backend server.
pub fn server_token(server_url: &str) -> String {
    format!("{:x}", fnv_hash(server_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_name_is_a_short_hash_token() {
        let name = cookie_name("", "app@file");
        assert_eq!(name.len(), 6);
        assert!(name.starts_with('_'));
        assert!(name[1..].chars().all(|c| c.is_ascii_hexdigit()));
        // Deterministic per service name.
        assert_eq!(name, cookie_name("", "app@file"));
        assert_ne!(name, cookie_name("", "other@file"));
    }

    #[test]
    fn explicit_names_are_sanitized() {
        assert_eq!(cookie_name("my cookie!", "svc"), "my_cookie_");
        assert_eq!(cookie_name("keep.these-chars_~/ok", "svc"), "keep.these-chars_~/ok");
    }

    #[test]
    fn server_tokens_differ_per_url() {
        assert_ne!(
            server_token("http://10.0.0.1:80"),
            server_token("http://10.0.0.2:80")
        );
    }
}
