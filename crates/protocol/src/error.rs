//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering every way a single command invocation can fail.
///
/// Every variant is terminal for the invocation that produced it; nothing in
/// this crate retries.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Connection errors
    /// The daemon could not be reached.
    #[error("failed to connect to {addr}: {reason}")]
    Connect {
        /// Address that was dialled.
        addr: String,
        /// Underlying failure.
        reason: String,
    },

    /// A blocking read exceeded the idle bound.
    #[error("operation timed out: {0}")]
    Timeout(String),

    // Transport errors
    /// The connection closed before a frame's declared length was received.
    #[error("frame truncated: expected {expected} bytes, received {received}")]
    FrameTruncated {
        /// Bytes the frame header (or length prefix) promised.
        expected: usize,
        /// Bytes actually received before the stream closed.
        received: usize,
    },

    /// Frame exceeds maximum allowed size.
    #[error("frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge {
        /// Declared or actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Underlying stream read or write failed.
    #[error("i/o error: {0}")]
    Io(String),

    // Handshake errors
    /// The daemon speaks a different protocol version.
    #[error("version mismatch: daemon speaks {got}, client speaks {expected}")]
    VersionMismatch {
        /// Version compiled into this client.
        expected: String,
        /// Version announced by the daemon.
        got: String,
    },

    /// The daemon rejected (or could not be offered) our credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A handshake operation was attempted in the wrong phase.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    // Cryptographic errors
    /// Encrypted payload is shorter than the nonce + tag header.
    #[error("malformed packet: {len} bytes is shorter than the {min} byte header")]
    MalformedPacket {
        /// Actual payload length.
        len: usize,
        /// Minimum valid length.
        min: usize,
    },

    /// Authentication tag did not verify.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The send counter cannot advance without reusing a nonce.
    #[error("nonce space exhausted after {0} messages; session must be discarded")]
    NonceExhausted(u64),

    /// Private key material could not be loaded.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Signature verification failed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    // Command errors
    /// The command name is not in the registry.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Required positional arguments were not supplied.
    #[error("usage: {command} is missing required argument(s): {}", missing.join(", "))]
    Usage {
        /// Command that was invoked.
        command: String,
        /// Names of the parameters that were not supplied, in declaration order.
        missing: Vec<String>,
    },

    /// More positional arguments were supplied than the command accepts.
    #[error("usage: {command} does not take argument(s): {}", extra.join(" "))]
    TooManyArguments {
        /// Command that was invoked.
        command: String,
        /// Arguments left over after binding, in order.
        extra: Vec<String>,
    },

    /// An argument could not be converted to its parameter's type.
    #[error("invalid value {value:?} for <{param}>: expected {expected}")]
    InvalidArgument {
        /// Parameter name.
        param: String,
        /// Value supplied on the command line.
        value: String,
        /// Human-readable description of accepted values.
        expected: String,
    },

    // Exchange errors
    /// The daemon executed the method and reported failure.
    #[error("{code}: {message}")]
    Method {
        /// Machine-readable error code from the daemon.
        code: String,
        /// Human-readable message from the daemon.
        message: String,
    },

    /// The reply does not belong to the outstanding request.
    #[error("unexpected response: expected id {expected}, got {got}")]
    UnexpectedResponse {
        /// Id of the outstanding request.
        expected: String,
        /// Id carried by the reply.
        got: String,
    },

    // Serialization errors
    /// Failed to serialize data.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize data.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
}

impl ProtocolError {
    /// Returns true for errors caused by how the command was invoked rather
    /// than by the daemon or the network.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnknownCommand(_)
                | ProtocolError::Usage { .. }
                | ProtocolError::TooManyArguments { .. }
                | ProtocolError::InvalidArgument { .. }
        )
    }
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}

impl From<ed25519_dalek::SignatureError> for ProtocolError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        ProtocolError::InvalidSignature(err.to_string())
    }
}

impl From<base64::DecodeError> for ProtocolError {
    fn from(err: base64::DecodeError) -> Self {
        ProtocolError::Deserialization(format!("invalid base64: {}", err))
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ProtocolError::Timeout(err.to_string()),
            _ => ProtocolError::Io(err.to_string()),
        }
    }
}
