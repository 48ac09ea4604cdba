//! Identifier generation for tunnels and rendezvous tokens.
//!
//! Both are v4 UUIDs: 122 random bits, which makes collisions between
//! concurrently pending tokens negligible without any coordination.

use uuid::Uuid;

/// Generate a fresh tunnel identifier.
pub fn new_tunnel_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a fresh rendezvous token for pairing a public connection
/// with the data channel a client opens in response.
pub fn new_token() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn tokens_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(new_token()));
        }
    }

    #[test]
    fn token_has_uuid_shape() {
        let token = new_token();
        assert_eq!(token.len(), 36);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_hexdigit() || c == '-'));
    }

    #[test]
    fn tunnel_ids_are_unique() {
        assert_ne!(new_tunnel_id(), new_tunnel_id());
    }
}
