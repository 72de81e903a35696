//! ID generation utilities.

use rand::Rng;
use ulid::Ulid;
use uuid::Uuid;

/// Alphabet of public room codes.
const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of public room codes.
pub const ROOM_CODE_LEN: usize = 6;

/// ID generator for entities.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based ID.
    ///
    /// ULIDs are:
    /// - Lexicographically sortable
    /// - Monotonically increasing within the same millisecond
    /// - Shorter than UUIDs when represented as strings
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate a human-facing room code: six uppercase alphanumerics.
    ///
    /// Codes are not guaranteed unique; callers retry on collision.
    #[must_use]
    pub fn generate_room_code(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..ROOM_CODE_LEN)
            .map(|_| char::from(ROOM_CODE_CHARSET[rng.gen_range(0..ROOM_CODE_CHARSET.len())]))
            .collect()
    }

    /// Generate an opaque handle for a live connection.
    #[must_use]
    pub fn generate_connection_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Returns whether `code` has the shape of a room code.
#[must_use]
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}
