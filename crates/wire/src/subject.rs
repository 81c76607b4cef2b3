//! Subject matching
//!
//! Subjects are dot-separated tokens. In a filter, `*` matches exactly one
//! token and a final `>` matches one or more remaining tokens.

/// Check whether `subject` is matched by `filter`
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), Some(_)) => return true,
            (Some("*"), Some(_)) => {}
            (Some(f), Some(s)) if f == s => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
