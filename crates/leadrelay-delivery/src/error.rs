//! Error types for dispatch, callbacks and validation.
//!
//! Each variant belongs to one class of the error taxonomy (input,
//! correlation, transport, storage) and knows the HTTP status class it is
//! reported with, so the API layer never inspects messages.

use std::fmt;

use leadrelay_core::CoreError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Errors raised by the messaging pipeline.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Target URL does not parse or is not http(s).
    #[error("invalid webhook url '{url}': {reason}")]
    InvalidUrl {
        /// The rejected URL
        url: String,
        /// Parser explanation
        reason: String,
    },

    /// No response within the dispatch bound.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Bound that elapsed
        timeout_seconds: u64,
    },

    /// Connection-level failure reaching the relay.
    #[error("network connection failed: {message}")]
    NetworkError {
        /// Error message describing the network failure
        message: String,
    },

    /// Relay answered with a non-2xx status.
    #[error("relay rejected request: HTTP {status_code}")]
    RelayRejected {
        /// HTTP status code
        status_code: u16,
        /// Response body content
        body: String,
    },

    /// Referenced entity does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// What was missing
        message: String,
    },

    /// Lead cannot receive the requested channel.
    #[error("invalid recipient: {message}")]
    InvalidRecipient {
        /// Why the lead is unusable
        message: String,
    },

    /// Request is missing fields or is malformed.
    #[error("bad request: {message}")]
    BadRequest {
        /// What was wrong with the request
        message: String,
    },

    /// Callback names a delivery code no message carries.
    #[error("invalid delivery code: {code}")]
    InvalidDeliveryCode {
        /// The unknown code
        code: String,
    },

    /// Callback names a lead identifier that matches no lead.
    #[error("lead not found for identifier: {identifier}")]
    LeadNotFound {
        /// The unmatched email or phone number
        identifier: String,
    },

    /// Phone number does not normalize to the expected shape.
    #[error("invalid phone format: {message}")]
    InvalidFormat {
        /// Why the number was rejected
        message: String,
    },

    /// State conflict, such as a reused validation id.
    #[error("conflict: {message}")]
    Conflict {
        /// What conflicted
        message: String,
    },

    /// Generated delivery code was already taken; safe to retry.
    #[error("delivery code collision: {code}")]
    DeliveryCodeCollision {
        /// The colliding code
        code: String,
    },

    /// Required runtime configuration is absent or malformed.
    #[error("configuration error: {message}")]
    Configuration {
        /// Configuration error message
        message: String,
    },

    /// Ledger or lookup storage failed.
    #[error("storage error: {message}")]
    Storage {
        /// Storage error message
        message: String,
    },
}

impl DeliveryError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::InvalidUrl { url: url.into(), reason: reason.to_string() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a relay rejection from an HTTP response.
    pub fn relay_rejected(status_code: u16, body: impl Into<String>) -> Self {
        Self::RelayRejected { status_code, body: body.into() }
    }

    /// Creates a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Creates an invalid recipient error.
    pub fn invalid_recipient(message: impl Into<String>) -> Self {
        Self::InvalidRecipient { message: message.into() }
    }

    /// Creates a bad request error.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat { message: message.into() }
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Whether repeating the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::NetworkError { .. }
            | Self::DeliveryCodeCollision { .. }
            | Self::Storage { .. } => true,

            Self::RelayRejected { status_code, .. } => *status_code >= 500,

            Self::InvalidUrl { .. }
            | Self::NotFound { .. }
            | Self::InvalidRecipient { .. }
            | Self::BadRequest { .. }
            | Self::InvalidDeliveryCode { .. }
            | Self::LeadNotFound { .. }
            | Self::InvalidFormat { .. }
            | Self::Conflict { .. }
            | Self::Configuration { .. } => false,
        }
    }

    /// HTTP status class the error is reported with.
    pub fn status_class(&self) -> StatusClass {
        match self {
            Self::InvalidUrl { .. }
            | Self::InvalidRecipient { .. }
            | Self::BadRequest { .. }
            | Self::InvalidFormat { .. }
            | Self::Configuration { .. } => StatusClass::BadRequest,
            Self::NotFound { .. } | Self::InvalidDeliveryCode { .. } | Self::LeadNotFound { .. } => {
                StatusClass::NotFound
            },
            Self::Conflict { .. } | Self::DeliveryCodeCollision { .. } => StatusClass::Conflict,
            Self::NetworkError { .. } | Self::RelayRejected { .. } => StatusClass::BadGateway,
            Self::Timeout { .. } => StatusClass::GatewayTimeout,
            Self::Storage { .. } => StatusClass::Internal,
        }
    }
}

impl From<CoreError> for DeliveryError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(message) => Self::NotFound { message },
            CoreError::InvalidInput(message) => Self::BadRequest { message },
            CoreError::Conflict(message) | CoreError::ConstraintViolation(message) => {
                Self::Conflict { message }
            },
            CoreError::Configuration(message) => Self::Configuration { message },
            CoreError::Database(message) => Self::Storage { message },
        }
    }
}

/// HTTP status class of a [`DeliveryError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 400
    BadRequest,
    /// 404
    NotFound,
    /// 409
    Conflict,
    /// 502
    BadGateway,
    /// 504
    GatewayTimeout,
    /// 500
    Internal,
}

impl StatusClass {
    /// Numeric HTTP status.
    pub const fn as_u16(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::BadGateway => 502,
            Self::GatewayTimeout => 504,
            Self::Internal => 500,
        }
    }
}

/// Category of delivery error for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Timeouts and connection failures.
    Network,
    /// Relay answered non-2xx.
    Relay,
    /// Caller input problems.
    Input,
    /// Callback or lookup correlation failures.
    Correlation,
    /// Missing or malformed runtime configuration.
    Configuration,
    /// Storage failures.
    Storage,
}

impl From<&DeliveryError> for ErrorCategory {
    fn from(error: &DeliveryError) -> Self {
        match error {
            DeliveryError::Timeout { .. } | DeliveryError::NetworkError { .. } => Self::Network,
            DeliveryError::RelayRejected { .. } => Self::Relay,
            DeliveryError::InvalidUrl { .. }
            | DeliveryError::InvalidRecipient { .. }
            | DeliveryError::BadRequest { .. }
            | DeliveryError::InvalidFormat { .. } => Self::Input,
            DeliveryError::NotFound { .. }
            | DeliveryError::InvalidDeliveryCode { .. }
            | DeliveryError::LeadNotFound { .. }
            | DeliveryError::Conflict { .. } => Self::Correlation,
            DeliveryError::Configuration { .. } => Self::Configuration,
            DeliveryError::DeliveryCodeCollision { .. } | DeliveryError::Storage { .. } => {
                Self::Storage
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Relay => write!(f, "relay"),
            Self::Input => write!(f, "input"),
            Self::Correlation => write!(f, "correlation"),
            Self::Configuration => write!(f, "configuration"),
            Self::Storage => write!(f, "storage"),
        }
    }
}
