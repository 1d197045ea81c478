//! # WinInspect Protocol Library
//!
//! This crate implements the client side of the WinInspect daemon protocol
//! without performing any IO.
//!
//! ## Overview
//!
//! - **Framing**: 4-byte little-endian length prefix with a hard size bound
//! - **Handshake**: version gate and optional Ed25519 challenge-response
//! - **Session Crypto**: AES-256-GCM with counter nonces, `nonce ‖ tag ‖ ciphertext`
//! - **Command Registry**: declarative table from command name to remote method
//! - **Messages**: JSON request/response records
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Request / Response (JSON)        │  registry, messages
//! ├─────────────────────────────────────────┤
//! │             Session Crypto              │  AES-256-GCM
//! ├─────────────────────────────────────────┤
//! │   Handshake (hello, auth, auth_status)  │  plaintext JSON frames
//! ├─────────────────────────────────────────┤
//! │                Framing                  │  u32 LE length prefix
//! ├─────────────────────────────────────────┤
//! │               Transport (TCP)           │  crates/cli
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{build_request, FrameCodec, Role, SessionCrypto, SessionKey};
//!
//! let args = vec!["0x1234".to_string()];
//! let request = build_request("cli-1", "info", &args).unwrap();
//! assert_eq!(request.method, "window.getInfo");
//!
//! let key = SessionKey::from_bytes([7u8; 32]);
//! let mut client = SessionCrypto::new(&key, Role::Initiator);
//! let payload = client.encrypt(&request.to_json().unwrap()).unwrap();
//!
//! let frame = FrameCodec::new().encode(&payload).unwrap();
//! assert_eq!(&frame[..4], &(payload.len() as u32).to_le_bytes());
//! ```
//!
//! ## Modules
//!
//! - [`framing`]: Frame codec
//! - [`handshake`]: Hello/auth messages and the client state machine
//! - [`session`]: Session encryption and key schedule
//! - [`crypto`]: Client identity and signatures
//! - [`messages`]: Request and response records
//! - [`registry`]: Command table and request construction
//! - [`error`]: Error types

pub mod crypto;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod messages;
pub mod registry;
pub mod session;

pub use crypto::{AuthorizedKey, ClientIdentity, Signature, SSH_ED25519};
pub use error::{ProtocolError, Result};
pub use framing::{FrameCodec, FRAME_HEADER_SIZE, MAX_FRAME_SIZE};
pub use handshake::{
    AuthMessage, AuthResult, ClientHandshake, Credentials, HandshakePhase, HandshakeStep,
    HelloMessage,
};
pub use messages::{request_id, ErrorDetail, Request, Response, PROTOCOL_VERSION};
pub use registry::{
    build_request, build_request_with, lookup, usage, watch_request, CommandSpec, MethodParams,
    ParamShape, RequestOptions, COMMANDS, WATCH_METHOD,
};
pub use session::{
    KeySchedule, PlaceholderKeySchedule, Role, SessionCrypto, SessionKey, SESSION_HEADER_LEN,
};
