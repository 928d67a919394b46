use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreErrorCode {
    Configuration,
    InvalidPath,
    Validation,
    Remote,
    Subscription,
    NotFound,
    InvalidArgument,
    Internal,
}

impl StoreErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreErrorCode::Configuration => "mirrorstore/configuration",
            StoreErrorCode::InvalidPath => "mirrorstore/invalid-path",
            StoreErrorCode::Validation => "mirrorstore/validation",
            StoreErrorCode::Remote => "mirrorstore/remote",
            StoreErrorCode::Subscription => "mirrorstore/subscription",
            StoreErrorCode::NotFound => "mirrorstore/not-found",
            StoreErrorCode::InvalidArgument => "mirrorstore/invalid-argument",
            StoreErrorCode::Internal => "mirrorstore/internal",
        }
    }
}

#[derive(Clone, Debug)]
pub struct StoreError {
    pub code: StoreErrorCode,
    message: String,
}

impl StoreError {
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code.as_str()
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code_str())
    }
}

impl Error for StoreError {}

pub type StoreResult<T> = Result<T, StoreError>;

pub fn configuration_error(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::Configuration, message)
}

pub fn invalid_path(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::InvalidPath, message)
}

pub fn validation_error(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::Validation, message)
}

pub fn remote_error(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::Remote, message)
}

pub fn subscription_error(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::Subscription, message)
}

pub fn not_found(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::NotFound, message)
}

pub fn invalid_argument(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::InvalidArgument, message)
}

pub fn internal_error(message: impl Into<String>) -> StoreError {
    StoreError::new(StoreErrorCode::Internal, message)
}
