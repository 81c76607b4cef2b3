//! Key validation
//!
//! Keys are dot-separated token sequences that become the tail of a subject
//! (`$KV.<bucket>.<key>`). Validation is applied to the *encoded* key, the
//! form that actually travels on the wire.
//!
//! ## Rules
//!
//! Plain keys must:
//! - Be non-empty
//! - Not start or end with `.`
//! - Contain only `[-/=.a-zA-Z0-9_]`
//!
//! Search keys additionally accept the wildcard tokens `*` (one token) and
//! `>` (the remaining tail). `>` is only valid as the final token.
//!
//! Bucket names contain only `[-a-zA-Z0-9_]`.

use crate::error::{Error, Result};

/// Separator between key tokens
pub const KEY_SEPARATOR: char = '.';

/// Wildcard token matching exactly one token
pub const MATCH_ONE: &str = "*";

/// Wildcard token matching the remaining tail; must be last
pub const MATCH_REST: &str = ">";

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_key_char(c: char) -> bool {
    is_word_char(c) || matches!(c, '-' | '/' | '=' | '.')
}

fn is_search_key_char(c: char) -> bool {
    is_key_char(c) || c == '*' || c == '>'
}

fn check_shape(key: &str, allowed: fn(char) -> bool) -> Result<()> {
    if key.is_empty()
        || key.starts_with(KEY_SEPARATOR)
        || key.ends_with(KEY_SEPARATOR)
        || !key.chars().all(allowed)
    {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// Validate a plain key (no wildcards)
pub fn validate_key(key: &str) -> Result<()> {
    check_shape(key, is_key_char)
}

/// Validate a search key
///
/// Accepts `*` and `>` in addition to the plain key alphabet, and rejects
/// a `>` token that is not the last token.
pub fn validate_search_key(key: &str) -> Result<()> {
    check_shape(key, is_search_key_char)?;
    has_wildcards(key)?;
    Ok(())
}

/// Report whether a key contains wildcard tokens
///
/// Fails if the key starts or ends with a separator, or if `>` appears
/// anywhere but the final token.
pub fn has_wildcards(key: &str) -> Result<bool> {
    if key.starts_with(KEY_SEPARATOR) || key.ends_with(KEY_SEPARATOR) {
        return Err(Error::InvalidKey(key.to_string()));
    }
    let tokens: Vec<&str> = key.split(KEY_SEPARATOR).collect();
    let last = tokens.len() - 1;
    let mut wildcards = false;
    for (i, token) in tokens.iter().enumerate() {
        match *token {
            MATCH_ONE => wildcards = true,
            MATCH_REST => {
                if i != last {
                    return Err(Error::InvalidKey(key.to_string()));
                }
                wildcards = true;
            }
            _ => {}
        }
    }
    Ok(wildcards)
}

/// True for the match-everything search key `>`
pub fn is_catch_all(key: &str) -> bool {
    key == MATCH_REST
}

/// Validate a bucket name
pub fn validate_bucket_name(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| is_word_char(c) || c == '-') {
        return Err(Error::InvalidBucketName(name.to_string()));
    }
    Ok(())
}
