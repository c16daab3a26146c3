//! Macros for building and returning [`crate::error::MigrationError`] values.

/// Creates a [`crate::error::MigrationError`] from a kind, a static description and
/// an optional detail.
#[macro_export]
macro_rules! migration_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::MigrationError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::MigrationError::from(($kind, $desc, $detail.to_string()))
    };
}

/// Returns early with a [`crate::error::MigrationError`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return Err($crate::migration_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return Err($crate::migration_error!($kind, $desc, $detail))
    };
}
