//! Crate-level error type

use crate::config::ConfigError;
use crate::jobs::JobError;
use crate::store::StoreError;
use thiserror::Error;

/// Any error the library can return.
#[derive(Debug, Error)]
pub enum CouponqError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Job error
    #[error("Job error: {0}")]
    Job(#[from] JobError),
}

/// Result alias using [`CouponqError`].
pub type Result<T, E = CouponqError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobClass;

    #[test]
    fn test_wraps_component_errors() {
        let err: CouponqError = JobError::UnregisteredClass(JobClass::Email).into();
        assert_eq!(err.to_string(), "Job error: job class email is not registered");

        let err: CouponqError = ConfigError::Invalid("bad".into()).into();
        assert!(matches!(err, CouponqError::Config(_)));
    }
}
