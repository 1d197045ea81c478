//! Connection handshake and challenge-response authentication.
//!
//! The daemon speaks first with a hello. If the hello carries a challenge the
//! client answers with a signed auth message and waits for the verdict;
//! otherwise the connection is accepted as-is. Either way a session is
//! established once, after the handshake reaches `Authenticated`.
//!
//! ```text
//! Connected --start--> AwaitingHello --hello(no challenge)--> Authenticated
//!                           |
//!                           +--hello(challenge)--> AwaitingAuthResult --ok--> Authenticated
//!                           |                            ^
//!                           +--hello(challenge, no key)--+-- AwaitingCredentials
//!
//! any error ---------------------------------------------------------> Failed
//! ```
//!
//! [`ClientHandshake`] performs no IO. The caller reads frames, feeds them in
//! and writes whatever the state machine asks it to send. Credentials may be
//! given up front or supplied only once the daemon has issued a challenge, so
//! a key file never has to be read for daemons that do not authenticate.

use serde::{Deserialize, Serialize};

use crate::crypto::ClientIdentity;
use crate::error::{ProtocolError, Result};
use crate::messages::{base64_bytes, PROTOCOL_VERSION};
use crate::session::{KeySchedule, PlaceholderKeySchedule, Role, SessionCrypto};

/// `type` tag on the daemon's hello.
pub const HELLO_TYPE: &str = "hello";

/// `type` tag on the daemon's authentication verdict.
pub const AUTH_STATUS_TYPE: &str = "auth_status";

/// First message on every connection, sent by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    /// Message tag, `hello`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Daemon protocol version.
    #[serde(rename = "version", alias = "protocolVersion")]
    pub protocol_version: String,
    /// Bytes to sign; absent when the daemon does not require authentication.
    #[serde(
        rename = "nonce",
        alias = "challenge",
        default,
        with = "base64_bytes::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub challenge: Option<Vec<u8>>,
}

impl HelloMessage {
    /// Creates a hello for the current protocol version.
    pub fn new(challenge: Option<Vec<u8>>) -> Self {
        Self {
            kind: Some(HELLO_TYPE.to_string()),
            protocol_version: PROTOCOL_VERSION.to_string(),
            challenge,
        }
    }
}

/// The client's answer to a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMessage {
    /// Client protocol version.
    #[serde(rename = "version", alias = "protocolVersion")]
    pub protocol_version: String,
    /// Configured identity name the daemon looks up.
    pub identity: String,
    /// Ed25519 signature over the challenge bytes.
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

/// The daemon's verdict on an [`AuthMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
    /// Message tag, `auth_status`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Missing means rejected.
    #[serde(default)]
    pub ok: bool,
}

impl AuthResult {
    /// Creates a verdict message.
    pub fn new(ok: bool) -> Self {
        Self {
            kind: Some(AUTH_STATUS_TYPE.to_string()),
            ok,
        }
    }
}

/// What the client authenticates with.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Name sent in the auth message.
    pub identity: String,
    /// Private key used to sign the challenge.
    pub key: ClientIdentity,
}

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// Connection is open, nothing read yet.
    Connected,
    /// Waiting for the daemon's hello.
    AwaitingHello,
    /// Hello had no challenge. Transient: the machine moves straight on to
    /// `Authenticated`.
    Unauthenticated,
    /// Hello had a challenge but no credentials were given up front.
    AwaitingCredentials,
    /// Auth message sent, waiting for the verdict.
    AwaitingAuthResult,
    /// Handshake complete; a session may be created.
    Authenticated,
    /// Terminal. No request may be sent on this connection.
    Failed,
}

/// What the caller must do after feeding the hello.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeStep {
    /// Send this auth message as one frame, then feed the reply to
    /// [`ClientHandshake::on_auth_result`].
    SendAuth(Vec<u8>),
    /// The daemon issued a challenge; pass credentials to
    /// [`ClientHandshake::provide_credentials`].
    NeedCredentials,
    /// The handshake is complete.
    Complete,
}

/// Client side of the handshake.
pub struct ClientHandshake<K = PlaceholderKeySchedule> {
    phase: HandshakePhase,
    credentials: Option<Credentials>,
    key_schedule: K,
    challenge: Option<Vec<u8>>,
    authenticated: bool,
}

impl ClientHandshake<PlaceholderKeySchedule> {
    /// Creates a handshake keyed with the placeholder schedule.
    pub fn new(credentials: Option<Credentials>) -> Self {
        Self::with_key_schedule(credentials, PlaceholderKeySchedule)
    }
}

impl<K: KeySchedule> ClientHandshake<K> {
    /// Creates a handshake with a custom key schedule.
    pub fn with_key_schedule(credentials: Option<Credentials>, key_schedule: K) -> Self {
        Self {
            phase: HandshakePhase::Connected,
            credentials,
            key_schedule,
            challenge: None,
            authenticated: false,
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Returns true once the handshake has completed successfully.
    pub fn is_complete(&self) -> bool {
        self.phase == HandshakePhase::Authenticated
    }

    /// Returns true if the daemon challenged us and accepted the signature.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Returns true if the session key provides no confidentiality.
    pub fn uses_placeholder_key(&self) -> bool {
        self.key_schedule.is_placeholder()
    }

    /// Begins waiting for the hello.
    pub fn start(&mut self) -> Result<()> {
        self.expect_phase(HandshakePhase::Connected, "start")?;
        self.phase = HandshakePhase::AwaitingHello;
        Ok(())
    }

    /// Processes the daemon's hello frame.
    pub fn on_hello(&mut self, frame: &[u8]) -> Result<HandshakeStep> {
        self.expect_phase(HandshakePhase::AwaitingHello, "receive hello")?;

        let hello: HelloMessage = match serde_json::from_slice(frame) {
            Ok(hello) => hello,
            Err(e) => return Err(self.fail(e.into())),
        };

        if hello.protocol_version != PROTOCOL_VERSION {
            return Err(self.fail(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION.to_string(),
                got: hello.protocol_version,
            }));
        }

        let Some(challenge) = hello.challenge else {
            self.phase = HandshakePhase::Unauthenticated;
            self.phase = HandshakePhase::Authenticated;
            return Ok(HandshakeStep::Complete);
        };

        self.challenge = Some(challenge);
        if self.credentials.is_none() {
            self.phase = HandshakePhase::AwaitingCredentials;
            return Ok(HandshakeStep::NeedCredentials);
        }
        self.sign_challenge().map(HandshakeStep::SendAuth)
    }

    /// Answers a pending challenge with late-loaded credentials.
    ///
    /// Returns the auth message to send. `None` fails the handshake with a
    /// hint on how to configure a key.
    pub fn provide_credentials(&mut self, credentials: Option<Credentials>) -> Result<Vec<u8>> {
        self.expect_phase(HandshakePhase::AwaitingCredentials, "provide credentials")?;

        let Some(credentials) = credentials else {
            return Err(self.fail(ProtocolError::AuthenticationFailed(
                "daemon requires authentication but no private key is configured; \
                 set one with `wininspect config --key <path>` or pass --key"
                    .to_string(),
            )));
        };
        self.credentials = Some(credentials);
        self.sign_challenge()
    }

    /// Processes the daemon's verdict frame.
    pub fn on_auth_result(&mut self, frame: &[u8]) -> Result<()> {
        self.expect_phase(HandshakePhase::AwaitingAuthResult, "receive auth result")?;

        let result: AuthResult = match serde_json::from_slice(frame) {
            Ok(result) => result,
            Err(e) => return Err(self.fail(e.into())),
        };

        if !result.ok {
            let identity = self
                .credentials
                .as_ref()
                .map(|c| c.identity.as_str())
                .unwrap_or_default();
            return Err(self.fail(ProtocolError::AuthenticationFailed(format!(
                "daemon rejected identity {:?}",
                identity
            ))));
        }

        self.authenticated = true;
        self.phase = HandshakePhase::Authenticated;
        Ok(())
    }

    /// Consumes the completed handshake and creates the connection's session.
    pub fn into_session(self) -> Result<SessionCrypto> {
        if self.phase != HandshakePhase::Authenticated {
            return Err(ProtocolError::HandshakeFailed(format!(
                "cannot create a session in phase {:?}",
                self.phase
            )));
        }
        let key = self.key_schedule.session_key(self.challenge.as_deref())?;
        Ok(SessionCrypto::new(&key, Role::Initiator))
    }

    fn sign_challenge(&mut self) -> Result<Vec<u8>> {
        let (Some(credentials), Some(challenge)) = (&self.credentials, &self.challenge) else {
            return Err(self.fail(ProtocolError::HandshakeFailed(
                "no challenge or credentials to sign with".to_string(),
            )));
        };

        let auth = AuthMessage {
            protocol_version: PROTOCOL_VERSION.to_string(),
            identity: credentials.identity.clone(),
            signature: credentials.key.sign(challenge).as_bytes().to_vec(),
        };
        match serde_json::to_vec(&auth) {
            Ok(bytes) => {
                self.phase = HandshakePhase::AwaitingAuthResult;
                Ok(bytes)
            }
            Err(e) => Err(self.fail(ProtocolError::Serialization(e.to_string()))),
        }
    }

    fn expect_phase(&mut self, expected: HandshakePhase, action: &str) -> Result<()> {
        if self.phase == expected {
            return Ok(());
        }
        let err = ProtocolError::HandshakeFailed(format!(
            "cannot {} in phase {:?}",
            action, self.phase
        ));
        Err(self.fail(err))
    }

    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        self.phase = HandshakePhase::Failed;
        err
    }
}

impl<K> std::fmt::Debug for ClientHandshake<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientHandshake")
            .field("phase", &self.phase)
            .field("has_credentials", &self.credentials.is_some())
            .field("authenticated", &self.authenticated)
            .finish_non_exhaustive()
    }
}
