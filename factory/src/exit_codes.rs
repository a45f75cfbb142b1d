//! Stable exit codes for factory CLI commands.

use crate::error::{ErrorKind, classify};

/// Command succeeded.
pub const OK: i32 = 0;
/// Unexpected failure (I/O, spawn, collaborator errors).
pub const INTERNAL: i32 = 1;
/// Invalid arguments or configuration.
pub const INVALID: i32 = 2;
/// Referenced run or deployment does not exist.
pub const NOT_FOUND: i32 = 3;
/// `factory run` finished with status `failed`.
pub const RUN_FAILED: i32 = 4;
/// `factory verify` timed out before the deployment answered.
pub const NOT_READY: i32 = 5;

pub fn for_error(err: &anyhow::Error) -> i32 {
    match classify(err) {
        ErrorKind::NotFound => NOT_FOUND,
        ErrorKind::InvalidInput => INVALID,
        ErrorKind::Internal => INTERNAL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FactoryError;

    #[test]
    fn maps_error_kinds() {
        let missing = anyhow::Error::new(FactoryError::RunNotFound(3));
        assert_eq!(for_error(&missing), NOT_FOUND);
        let invalid = anyhow::Error::new(FactoryError::InvalidInput("x".to_string()));
        assert_eq!(for_error(&invalid), INVALID);
        assert_eq!(for_error(&anyhow::anyhow!("boom")), INTERNAL);
    }
}
