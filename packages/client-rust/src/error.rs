//! Error types for discovery and outbound calls.

use thiserror::Error;

/// Failures talking to the naming service.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The registry knows no healthy instance for the service in the
    /// queried group.
    #[error("no healthy instance of `{service}` in group `{group}`")]
    NoInstance { service: String, group: String },

    /// The registry endpoint itself could not be reached or answered with
    /// an HTTP-level failure.
    #[error("registry request failed")]
    Http(#[from] reqwest::Error),

    /// The registry answered with a payload this client cannot interpret.
    #[error("malformed registry response: {0}")]
    Malformed(String),
}

/// Failures of an outbound RPC call, classified by who is at fault and
/// whether a retry already happened.
///
/// `Resolution` and `Configuration` surface immediately and are never
/// retried. A transport failure triggers at most one retry against a
/// freshly resolved address before becoming `RetryExhausted`; an
/// unreachable-network failure is reported as `Unavailable` without a
/// second attempt. `Remote` and `Malformed` pass the peer's answer through
/// untouched.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The client is misconfigured (unknown call protocol, unbuildable
    /// HTTP client).
    #[error("invalid client configuration: {0}")]
    Configuration(String),

    /// No address could be resolved for the service.
    #[error("could not resolve an address for `{service}`")]
    Resolution {
        service: String,
        #[source]
        source: RegistryError,
    },

    /// The request never produced a response and the failure is neither a
    /// refused connection nor an unreachable network.
    #[error("transport failure calling `{service}`")]
    Transport {
        service: String,
        #[source]
        source: reqwest::Error,
    },

    /// The peer answered with a non-success HTTP status.
    #[error("`{service}` responded with status {status}")]
    Remote {
        service: String,
        status: u16,
        body: String,
    },

    /// The peer answered 2xx but the body does not parse as the envelope
    /// the caller asked for.
    #[error("malformed response from `{service}`")]
    Malformed {
        service: String,
        #[source]
        source: serde_json::Error,
    },

    /// The network or host is unreachable; retrying the same address would
    /// not help.
    #[error("`{service}` is unavailable")]
    Unavailable { service: String },

    /// The connection was refused both before and after re-resolving the
    /// address.
    #[error("`{service}` is unavailable (retry exhausted)")]
    RetryExhausted { service: String },
}
