use thiserror::Error;

/// Application error types
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// Tenant has no active model version
    #[error("No active model for tenant {tenant}")]
    NotFound { tenant: String },

    /// Explicitly referenced version does not exist
    #[error("Version {version} not found for tenant {tenant}")]
    VersionNotFound { tenant: String, version: String },

    /// Durable read/write failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Fit or evaluation failures
    #[error("Training error: {0}")]
    Training(String),

    /// Training data collaborator failures
    #[error("Data source error: {0}")]
    DataSource(String),

    /// Cooperative cancellation observed
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn not_found(tenant: impl Into<String>) -> Self {
        AppError::NotFound {
            tenant: tenant.into(),
        }
    }

    pub fn version_not_found(tenant: impl Into<String>, version: impl Into<String>) -> Self {
        AppError::VersionNotFound {
            tenant: tenant.into(),
            version: version.into(),
        }
    }

    /// HTTP-equivalent status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NotFound { .. } => 404,
            AppError::VersionNotFound { .. } => 404,
            AppError::Validation(_) => 400,
            AppError::Cancelled(_) => 409,
            AppError::DataSource(_) => 502,
            AppError::Storage(_)
            | AppError::Serialization(_)
            | AppError::Configuration(_)
            | AppError::Training(_)
            | AppError::Internal(_) => 500,
        }
    }

    /// Get error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::NotFound { .. } => "NOT_FOUND",
            AppError::VersionNotFound { .. } => "VERSION_NOT_FOUND",
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Configuration(_) => "CONFIGURATION_ERROR",
            AppError::Training(_) => "TRAINING_ERROR",
            AppError::DataSource(_) => "DATA_SOURCE_ERROR",
            AppError::Cancelled(_) => "CANCELLED",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the caller made a bad request, as opposed to the service failing
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<sled::Error> for AppError {
    fn from(err: sled::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for AppError {
    fn from(err: bincode::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AppError::not_found("acme").status_code(), 404);
        assert_eq!(AppError::version_not_found("acme", "1").status_code(), 404);
        assert_eq!(AppError::Validation("bad".to_string()).status_code(), 400);
        assert_eq!(AppError::Storage("disk".to_string()).status_code(), 500);
        assert_eq!(AppError::DataSource("db".to_string()).status_code(), 502);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::not_found("acme").error_code(), "NOT_FOUND");
        assert_eq!(
            AppError::version_not_found("acme", "1").error_code(),
            "VERSION_NOT_FOUND"
        );
        assert_eq!(
            AppError::Cancelled("stop".to_string()).error_code(),
            "CANCELLED"
        );
    }

    #[test]
    fn test_io_errors_become_storage_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::Storage(_)));
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_display_includes_tenant_and_version() {
        let err = AppError::version_not_found("acme", "20240101000000000000");
        assert_eq!(
            err.to_string(),
            "Version 20240101000000000000 not found for tenant acme"
        );
    }
}
