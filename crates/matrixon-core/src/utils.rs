//! Matrix ID helpers
//!
//! Localpart validity rules and the two ways of turning an arbitrary
//! username from an identity provider into a valid localpart.

use std::fmt::Write;

/// Maximum length of a full Matrix user ID, in bytes
pub const MAX_USERID_LENGTH: usize = 255;

/// Characters allowed in a localpart created by this server
pub const MXID_LOCALPART_ALLOWED_CHARACTERS: &str = "_-./=abcdefghijklmnopqrstuvwxyz0123456789";

/// Whether `c` may appear in a localpart
pub fn is_allowed_localpart_char(c: char) -> bool {
    matches!(c, 'a'..='z' | '0'..='9' | '_' | '-' | '.' | '/' | '=')
}

/// Whether `localpart` contains anything outside the allowed set
pub fn contains_invalid_mxid_characters(localpart: &str) -> bool {
    !localpart.chars().all(is_allowed_localpart_char)
}

/// Map a username onto a localpart by `=xx` hex-escaping every byte that is
/// not allowed (`=` itself included). ASCII letters are lowercased first and
/// a leading underscore is escaped as `=5f`.
pub fn map_username_to_mxid_localpart(username: &str) -> String {
    let mut localpart = String::with_capacity(username.len());

    for byte in username.bytes().map(|b| b.to_ascii_lowercase()) {
        let c = byte as char;
        if byte.is_ascii() && c != '=' && is_allowed_localpart_char(c) {
            localpart.push(c);
        } else {
            // Writing into a String cannot fail
            let _ = write!(localpart, "={:02x}", byte);
        }
    }

    match localpart.strip_prefix('_') {
        Some(rest) => format!("=5f{}", rest),
        None => localpart,
    }
}

/// Map a username onto a localpart by lowercasing it and replacing every
/// disallowed character with a dot. A leading underscore is dropped.
pub fn dot_replace_for_mxid(username: &str) -> String {
    let replaced: String = username
        .to_lowercase()
        .chars()
        .map(|c| if is_allowed_localpart_char(c) { c } else { '.' })
        .collect();

    match replaced.strip_prefix('_') {
        Some(rest) => rest.to_string(),
        None => replaced,
    }
}
