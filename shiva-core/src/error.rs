use thiserror::Error;

pub type ShivaResult<T> = std::result::Result<T, ShivaError>;

/// Failure taxonomy shared by every request-side operation.
///
/// `Unauthorized` deliberately carries no detail: a bad, missing, pending or
/// revoked token all look the same to the caller.
#[derive(Error, Debug)]
pub enum ShivaError {
    #[error("{0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("Too many requests. Please try again later.")]
    RateLimited,

    #[error("Delivery provider error: {0}")]
    TransientProvider(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ShivaError {
    pub fn validation(message: impl Into<String>) -> Self {
        ShivaError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ShivaError::Conflict(message.into())
    }

    /// Stable machine-readable code for the boundary.
    pub fn code(&self) -> &'static str {
        match self {
            ShivaError::Validation(_) => "validation_error",
            ShivaError::Unauthorized => "unauthorized",
            ShivaError::Forbidden(_) => "forbidden",
            ShivaError::NotFound(_) => "not_found",
            ShivaError::Conflict(_) => "conflict",
            ShivaError::RateLimited => "rate_limited",
            ShivaError::TransientProvider(_) => "provider_error",
            ShivaError::Internal(_) => "internal_error",
        }
    }

    /// Message that is safe to show to the caller. Internal failures never
    /// leak their source text.
    pub fn public_message(&self) -> String {
        match self {
            ShivaError::Internal(_) => "Something went wrong. Please try again.".to_string(),
            ShivaError::TransientProvider(_) => "We could not send an email right now.".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<diesel::result::Error> for ShivaError {
    fn from(e: diesel::result::Error) -> Self {
        ShivaError::Internal(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_are_masked() {
        let err = ShivaError::from(anyhow::anyhow!("connection refused to 10.0.0.4"));
        assert_eq!(err.code(), "internal_error");
        assert!(!err.public_message().contains("10.0.0.4"));
    }

    #[test]
    fn not_found_names_the_entity() {
        assert_eq!(ShivaError::NotFound("Support page").public_message(), "Support page not found");
    }
}
