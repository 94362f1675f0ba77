use thiserror::Error;

/// Errors produced by the distribution engine.
///
/// The first six variants are correctness failures and are always surfaced
/// to the caller. Store variants can additionally be classified with
/// [`DistributorError::is_retryable`].
#[derive(Debug, Error)]
pub enum DistributorError {
    #[error("invalid claim: {0}")]
    InvalidClaim(String),

    #[error("invalid digest: {0}")]
    InvalidDigest(String),

    #[error("duplicate claim index {0}")]
    DuplicateIndex(u64),

    #[error("duplicate claim account {0}")]
    DuplicateAccount(String),

    #[error("corrupt distribution document: {0}")]
    CorruptDocument(String),

    #[error("merkle root mismatch: expected {expected}, computed {computed}")]
    RootMismatch { expected: String, computed: String },

    #[error("account {account} has no claim in distribution {distribution_id}")]
    UnknownClaimant { distribution_id: u64, account: String },

    #[error("event for distribution {event} applied to distribution {document}")]
    DistributionMismatch { document: u64, event: u64 },

    #[error("redeemed amount {observed} for {account} does not match committed amount {committed}")]
    AmountMismatch {
        account: String,
        committed: String,
        observed: String,
    },

    #[error("distribution {0} not found")]
    NotFound(u64),

    #[error("distribution {0} is already published")]
    AlreadyPublished(u64),

    #[error("store operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DistributorError {
    /// Whether the failed operation may be retried.
    ///
    /// A retryable failure says nothing about whether the write landed;
    /// only idempotent operations should be retried blindly.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Io(_))
    }

    pub(crate) fn corrupt(reason: impl std::fmt::Display) -> Self {
        Self::CorruptDocument(reason.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DistributorError>;
