//! Error types for the WebSocket opening handshake.

use thiserror::Error;

/// Errors raised while building the server handshake response.
///
/// A failed handshake produces no response; the caller decides whether to
/// close the connection or answer with a `400`.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The upgrade request carried no usable `Sec-WebSocket-Key`.
    #[error("not a WebSocket request: missing upgrade key")]
    MissingKey,

    /// Building the response failed at the HTTP layer.
    #[error("http error: {source}")]
    Http {
        #[from]
        source: http::Error,
    },
}
