//! Session crypto: authenticated encryption of every post-handshake frame.
//!
//! A [`SessionCrypto`] is created once per successful handshake and owned by
//! that connection alone. It uses AES-256-GCM with counter-derived nonces.
//!
//! ## Wire layout
//!
//! ```text
//! +0   nonce       (12 bytes)
//! +12  tag         (16 bytes)
//! +28  ciphertext  (N bytes)
//! ```
//!
//! The AEAD primitive is driven in detached mode so its output is packed into
//! this order directly, on both the send and receive paths.
//!
//! ## Nonce layout
//!
//! ```text
//! +0   send counter (8 bytes, little-endian u64)
//! +8   role marker  (4 bytes, big-endian u32: 0 = client, 1 = daemon)
//! ```
//!
//! Both ends share one key, so the role marker keeps the two directions in
//! disjoint nonce spaces. The counter never wraps: once exhausted, `encrypt`
//! fails and the session must be dropped.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};

use crate::error::{ProtocolError, Result};

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Fixed header preceding the ciphertext: nonce + tag.
pub const SESSION_HEADER_LEN: usize = NONCE_LEN + TAG_LEN;

/// Which end of the connection a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opens the connection and sends requests (client).
    Initiator,
    /// Accepts the connection and answers requests (daemon).
    Responder,
}

impl Role {
    /// Returns the role at the other end of the connection.
    pub fn peer(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }

    fn marker(self) -> u32 {
        match self {
            Role::Initiator => 0,
            Role::Responder => 1,
        }
    }
}

/// Symmetric key for one session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Creates a key from raw bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

/// Produces the session key once the handshake reaches `Authenticated`.
///
/// This is the seam where a real key agreement plugs in. Implementations
/// receive the challenge the daemon issued, if any.
pub trait KeySchedule {
    /// Derives the key for a new session.
    fn session_key(&self, challenge: Option<&[u8]>) -> Result<SessionKey>;

    /// Returns true if the derived key provides no confidentiality.
    fn is_placeholder(&self) -> bool {
        false
    }
}

/// The all-zero key the current daemon uses.
///
/// No secret is agreed, so sessions keyed this way are integrity-checked
/// framing only. Anyone on the path can read and forge traffic.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderKeySchedule;

impl KeySchedule for PlaceholderKeySchedule {
    fn session_key(&self, _challenge: Option<&[u8]>) -> Result<SessionKey> {
        Ok(SessionKey::from_bytes([0u8; KEY_LEN]))
    }

    fn is_placeholder(&self) -> bool {
        true
    }
}

/// Per-connection AEAD state.
pub struct SessionCrypto {
    cipher: Aes256Gcm,
    role: Role,
    send_counter: u64,
    recv_counter: u64,
    last_peer_counter: Option<u64>,
    out_of_order: u64,
}

impl SessionCrypto {
    /// Creates a session for `role` under `key`, with both counters at zero.
    pub fn new(key: &SessionKey, role: Role) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
            role,
            send_counter: 0,
            recv_counter: 0,
            last_peer_counter: None,
            out_of_order: 0,
        }
    }

    /// Returns the local role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Number of messages encrypted so far; also the next nonce counter.
    pub fn send_counter(&self) -> u64 {
        self.send_counter
    }

    /// Number of messages successfully decrypted so far.
    pub fn recv_counter(&self) -> u64 {
        self.recv_counter
    }

    /// Number of decrypted messages whose counter did not exceed the last one seen.
    pub fn out_of_order_count(&self) -> u64 {
        self.out_of_order
    }

    /// Encrypts `plaintext` into `nonce ‖ tag ‖ ciphertext`.
    ///
    /// Consumes one nonce. Fails with [`ProtocolError::NonceExhausted`] rather
    /// than ever reusing a counter value.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let counter = self.send_counter;
        self.send_counter = counter
            .checked_add(1)
            .ok_or(ProtocolError::NonceExhausted(counter))?;

        let nonce = derive_nonce(counter, self.role);

        let mut output = Vec::with_capacity(SESSION_HEADER_LEN + plaintext.len());
        output.extend_from_slice(&nonce);
        output.extend_from_slice(&[0u8; TAG_LEN]);
        output.extend_from_slice(plaintext);

        let tag = self
            .cipher
            .encrypt_in_place_detached(
                Nonce::from_slice(&nonce),
                b"",
                &mut output[SESSION_HEADER_LEN..],
            )
            .map_err(|e| ProtocolError::Encryption(e.to_string()))?;
        output[NONCE_LEN..SESSION_HEADER_LEN].copy_from_slice(&tag);

        Ok(output)
    }

    /// Verifies and decrypts a `nonce ‖ tag ‖ ciphertext` payload.
    ///
    /// Nothing is returned unless the tag verifies.
    pub fn decrypt(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() < SESSION_HEADER_LEN {
            return Err(ProtocolError::MalformedPacket {
                len: payload.len(),
                min: SESSION_HEADER_LEN,
            });
        }

        let (nonce, rest) = payload.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let (peer_counter, marker) = split_nonce(nonce);
        if marker != self.role.peer().marker() {
            return Err(ProtocolError::DecryptionFailed(format!(
                "nonce role marker {} does not belong to the peer",
                marker
            )));
        }

        let mut plaintext = ciphertext.to_vec();
        self.cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(nonce),
                b"",
                &mut plaintext,
                Tag::from_slice(tag),
            )
            .map_err(|_| {
                ProtocolError::DecryptionFailed("authentication tag mismatch".to_string())
            })?;

        match self.last_peer_counter {
            Some(last) if peer_counter <= last => self.out_of_order += 1,
            _ => self.last_peer_counter = Some(peer_counter),
        }
        self.recv_counter = self.recv_counter.saturating_add(1);

        Ok(plaintext)
    }
}

impl std::fmt::Debug for SessionCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCrypto")
            .field("role", &self.role)
            .field("send_counter", &self.send_counter)
            .field("recv_counter", &self.recv_counter)
            .field("out_of_order", &self.out_of_order)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn derive_nonce(counter: u64, role: Role) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[..8].copy_from_slice(&counter.to_le_bytes());
    nonce[8..].copy_from_slice(&role.marker().to_be_bytes());
    nonce
}

fn split_nonce(nonce: &[u8]) -> (u64, u32) {
    let mut counter = [0u8; 8];
    counter.copy_from_slice(&nonce[..8]);
    let mut marker = [0u8; 4];
    marker.copy_from_slice(&nonce[8..NONCE_LEN]);
    (u64::from_le_bytes(counter), u32::from_be_bytes(marker))
}
