//! Pagination and sorting control keys.

/// Keys that drive paging/sorting and are never treated as filters.
pub const RESERVED_KEYS: [&str; 4] = ["page", "size", "sortBy", "sortDir"];

/// Whether `key` is a reserved control key. Case-insensitive.
pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(key))
}
