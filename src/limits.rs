/// Longest activity, user, or reservation identifier accepted.
pub const MAX_ID_LEN: usize = 128;

/// Largest reservation snapshot a single check will scan.
pub const MAX_RESERVATIONS_PER_SNAPSHOT: usize = 10_000;

/// Bytes of an error response body kept for diagnostics.
pub const MAX_ERROR_BODY_BYTES: usize = 512;

/// Largest successful response body read from the reservation store.
pub const MAX_RESPONSE_BYTES: usize = 8 * 1024 * 1024;
