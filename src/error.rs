//! Unified error types for the marketplace client.

use thiserror::Error;

use crate::transport::TransportVariant;

/// Unified error type for the client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Transport/session error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Venue (marketplace API) error.
    #[error("venue error: {0}")]
    Venue(#[from] VenueError),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Transport and strategy-controller errors.
///
/// Every failure surfaces with its specific kind so the caller can decide
/// between retrying on the same variant and switching strategy.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The engine could not be started or reached.
    #[error("failed to start {variant} transport: {reason}")]
    Connect {
        /// Variant that failed to start.
        variant: TransportVariant,
        /// Reason for failure.
        reason: String,
    },

    /// Transient I/O failure.
    #[error("network error: {0}")]
    Network(String),

    /// Request exceeded the configured deadline.
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout {
        /// Target URL.
        url: String,
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// The anti-bot layer answered with an interactive challenge.
    #[error("anti-bot challenge detected at {url} (status {status}, marker {marker:?})")]
    ChallengeDetected {
        /// Target URL.
        url: String,
        /// HTTP status of the challenge page.
        status: u16,
        /// Marker that identified the challenge.
        marker: String,
    },

    /// The variant tag is unknown or not supported by the factory.
    #[error("unsupported transport variant: {0}")]
    UnsupportedVariant(String),

    /// Variant options are missing required fields or mismatch the variant.
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// A strategy switch is already running.
    #[error("strategy switch already in progress")]
    SwitchInProgress,

    /// Request issued before `init` or after `destroy`.
    #[error("controller is not ready (state: {0})")]
    NotReady(String),

    /// `init` called on a controller that already left the uninitialized state.
    #[error("controller already initialized (state: {0})")]
    AlreadyInitialized(String),

    /// The replacement transport could not start after the old one was torn down.
    /// The controller is destroyed and unusable.
    #[error("strategy switch to {to} failed, controller destroyed: {source}")]
    SwitchFailed {
        /// Variant that was being switched to.
        to: TransportVariant,
        /// Underlying cause.
        #[source]
        source: Box<TransportError>,
    },
}

impl TransportError {
    /// Whether retrying (with the same or another variant) can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Network(_)
                | TransportError::Timeout { .. }
                | TransportError::ChallengeDetected { .. }
                | TransportError::SwitchInProgress
        )
    }

    /// Whether the failure is a hint to switch transport strategy.
    pub fn suggests_switch(&self) -> bool {
        matches!(self, TransportError::ChallengeDetected { .. })
    }

    /// Whether the controller is unusable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::SwitchFailed { .. } | TransportError::UnsupportedVariant(_)
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, url: &str, timeout_ms: u64) -> Self {
        if err.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
                timeout_ms,
            }
        } else {
            TransportError::Network(err.to_string())
        }
    }
}

/// Marketplace API errors.
#[derive(Error, Debug)]
pub enum VenueError {
    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Rate limited by the venue (HTTP 429).
    #[error("{operation}: rate limited")]
    RateLimited {
        /// Operation that was rejected.
        operation: &'static str,
    },

    /// Request blocked by the venue (HTTP 403 without challenge markers).
    #[error("{operation}: request blocked")]
    Blocked {
        /// Operation that was rejected.
        operation: &'static str,
    },

    /// Unexpected HTTP status.
    #[error("{operation}: unexpected status {status}: {body}")]
    UnexpectedStatus {
        /// Operation that failed.
        operation: &'static str,
        /// HTTP status.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// The item cannot be bought yet.
    #[error("item {token_id} is not for sale yet: {message}")]
    NotForSale {
        /// NFT token ID.
        token_id: String,
        /// Venue message.
        message: String,
    },

    /// Operation requires a logged-in session.
    #[error("not authenticated: call login() first")]
    Unauthenticated,

    /// Real order placement was not confirmed by the caller.
    #[error("real order placement requires confirm_real_order = true")]
    ConfirmationRequired,

    /// Order parameters are invalid.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Response body could not be interpreted.
    #[error("failed to parse {operation} response: {reason}")]
    Parse {
        /// Operation whose response failed to parse.
        operation: &'static str,
        /// Reason for failure.
        reason: String,
    },

    /// Signing error.
    #[error("signing error: {0}")]
    Signing(String),
}

impl VenueError {
    /// The transport error behind this failure, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            VenueError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, ClientError>;
