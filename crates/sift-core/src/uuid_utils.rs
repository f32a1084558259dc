//! UUID v7 utilities for time-ordered identifiers.
//!
//! Work-item and analysis identifiers are UUIDv7: the embedded millisecond
//! timestamp gives natural enqueue-order sorting, and the random tail
//! disambiguates repeated enqueues of the same path.

use uuid::Uuid;

/// Generate a new UUIDv7 identifier.
#[inline]
pub fn new_v7() -> Uuid {
    Uuid::now_v7()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_v7_is_v7() {
        let id = new_v7();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_new_v7_time_ordered() {
        let a = new_v7();
        let b = new_v7();
        assert!(a <= b);
    }
}
