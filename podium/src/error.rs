use thiserror::Error;

/// A request that cannot be served as configured: a non-positive trial count, an empty field,
/// malformed search bounds, and so on. Never retried.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct InvalidConfiguration(#[from] pub anyhow::Error);
