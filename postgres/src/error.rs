//! SQLSTATE classification.

use booking_core::StoreError;

/// `exclusion_violation`: an active reservation overlaps the new range.
pub const EXCLUSION_VIOLATION: &str = "23P01";

/// `foreign_key_violation`: the referenced resource does not exist.
pub const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Translate a sqlx error into a [`StoreError`].
///
/// Only the two SQLSTATEs above carry domain meaning; everything else is an
/// opaque [`StoreError::Database`].
#[must_use]
pub fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        match db.code().as_deref() {
            Some(EXCLUSION_VIOLATION) => return StoreError::Overlap(db.message().to_string()),
            Some(FOREIGN_KEY_VIOLATION) => {
                return StoreError::ResourceMissing(db.message().to_string());
            },
            _ => {},
        }
    }
    StoreError::Database(error.to_string())
}
