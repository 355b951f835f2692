use rand::RngCore;

/// Prefix carried by every proxy credential.
pub const PROXY_KEY_PREFIX: &str = "px_";

const PROXY_KEY_BYTES: usize = 32;

/// Mint a proxy credential: `px_` followed by 32 random bytes, hex-encoded.
pub fn generate_proxy_key() -> String {
    let mut bytes = [0u8; PROXY_KEY_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    format!("{}{}", PROXY_KEY_PREFIX, hex::encode(bytes))
}

/// Cheap shape check run before any lookup or MAC work.
pub fn is_proxy_key_format(token: &str) -> bool {
    token
        .strip_prefix(PROXY_KEY_PREFIX)
        .is_some_and(|rest| {
            rest.len() == PROXY_KEY_BYTES * 2
                && rest.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        })
}
