use rand::{distributions::Alphanumeric, thread_rng, Rng};

pub const ACCESS_TOKEN_LEN: usize = 40;

/// Opaque candidate credential; also encoded in the mobile pairing link.
pub fn generate_access_token() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ACCESS_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Cheap shape check done before touching the store.
pub fn looks_like_access_token(token: &str) -> bool {
    (16..=128).contains(&token.len()) && token.chars().all(|c| c.is_ascii_alphanumeric())
}
