use thiserror::Error;

/// Errors produced by the measurement engine.
///
/// The line-protocol client maps everything it encounters to either
/// [`Error::Network`] (DNS, connect) or [`Error::Protocol`] (framing,
/// wrong keyword, short read/write, premature EOF).
#[derive(Debug, Error)]
pub enum Error {
    /// DNS failure, refused connection, or timeout while dialing.
    #[error("network unreachable: {0}")]
    Network(#[source] std::io::Error),
    /// Unexpected framing, wrong keyword, short read/write, or premature EOF.
    #[error("protocol failure: {0}")]
    Protocol(&'static str),
    /// Server catalogue could not be loaded or parsed.
    #[error("catalogue load failed: {0}")]
    Catalogue(String),
    /// Transport-level HTTP failure talking to one of the web endpoints.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The selector exhausted the candidate list without a usable server.
    #[error("no usable server candidate")]
    NoCandidate,
    /// A session step was invoked before its predecessor.
    #[error("`{0}` called before `{1}`")]
    InvalidOrder(&'static str, &'static str),
    /// The share endpoint accepted the request but returned no result id.
    #[error("share submission failed: {0}")]
    Share(&'static str),
    /// I/O error outside the measurement socket (e.g. an output sink).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
