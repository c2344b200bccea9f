//! Webhook path authentication.
//!
//! The webhook secret is a single path segment (`POST /<secret>`) acting as a
//! bearer token for forced cache refreshes. There is no signature or replay
//! protection; the guarded action only refetches public data.

use std::hint::black_box;

use subtle::ConstantTimeEq;

/// Compare a supplied webhook path against the expected one in constant time.
///
/// Both values must be non-empty. When the lengths differ the supplied value
/// is still compared (against itself) so the time taken depends only on its
/// length, and the result is always `false`.
pub fn authenticate(supplied: &str, expected: &str) -> bool {
    if supplied.is_empty() || expected.is_empty() {
        return false;
    }

    let supplied = supplied.as_bytes();
    let expected = expected.as_bytes();

    if supplied.len() != expected.len() {
        black_box(supplied.ct_eq(black_box(supplied)));
        return false;
    }

    supplied.ct_eq(expected).into()
}
