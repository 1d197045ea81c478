//! Client connection to the WinInspect daemon.
//!
//! One connection carries one handshake followed by encrypted request and
//! response frames. Every blocking read is bounded by the read timeout.

use std::time::Duration;

use protocol::{
    build_request, request_id, watch_request, ClientHandshake, FrameCodec, HandshakeStep,
    ProtocolError, Request, Response, Result, SessionCrypto,
};
use serde_json::value::RawValue;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::identity::CredentialSource;
use crate::transport::{recv_frame_timeout, send_frame};

/// Default connect timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default read timeout in seconds.
const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Everything needed to open a connection.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Daemon address as host:port.
    pub address: String,
    /// Key and identity for challenge-response, consulted only when the
    /// daemon issues a challenge.
    pub credentials: CredentialSource,
    /// Bound on TCP connect.
    pub connect_timeout: Duration,
    /// Bound on each frame read.
    pub read_timeout: Duration,
}

impl ClientOptions {
    /// Options for `address` with default timeouts and no credentials.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            credentials: CredentialSource::Anonymous,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
        }
    }
}

/// An established, handshaken connection to the daemon.
pub struct RemoteClient<S = TcpStream> {
    stream: S,
    session: SessionCrypto,
    codec: FrameCodec,
    read_timeout: Duration,
    requests_sent: u64,
    authenticated: bool,
}

impl RemoteClient<TcpStream> {
    /// Connects to the daemon and completes the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Connect`] if the daemon cannot be reached
    /// within the connect timeout, or any handshake error.
    pub async fn connect(options: &ClientOptions) -> Result<Self> {
        debug!(address = %options.address, "connecting to daemon");

        let stream = tokio::time::timeout(
            options.connect_timeout,
            TcpStream::connect(&options.address),
        )
        .await
        .map_err(|_| ProtocolError::Connect {
            addr: options.address.clone(),
            reason: format!("timed out after {:?}", options.connect_timeout),
        })?
        .map_err(|e| ProtocolError::Connect {
            addr: options.address.clone(),
            reason: e.to_string(),
        })?;

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to disable Nagle's algorithm");
        }
        info!(address = %options.address, "connected to daemon");

        Self::handshake(stream, options.credentials.clone(), options.read_timeout).await
    }
}

impl<S> RemoteClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Runs the handshake over an already-open stream.
    ///
    /// A key file in `credentials` is read only if the daemon's hello
    /// carries a challenge.
    pub async fn handshake(
        mut stream: S,
        credentials: CredentialSource,
        read_timeout: Duration,
    ) -> Result<Self> {
        let codec = FrameCodec::new();
        let mut handshake = ClientHandshake::new(credentials.preloaded());
        handshake.start()?;

        let hello = recv_frame_timeout(&mut stream, &codec, read_timeout).await?;
        debug!(len = hello.len(), "received hello");

        let auth = match handshake.on_hello(&hello)? {
            HandshakeStep::SendAuth(auth) => Some(auth),
            HandshakeStep::NeedCredentials => {
                debug!("daemon issued a challenge, loading private key");
                let loaded = credentials
                    .load()
                    .map_err(|e| ProtocolError::InvalidKey(format!("{:#}", e)))?;
                Some(handshake.provide_credentials(loaded)?)
            }
            HandshakeStep::Complete => {
                debug!("daemon did not request authentication");
                None
            }
        };

        if let Some(auth) = auth {
            debug!("sending signed challenge");
            send_frame(&mut stream, &codec, &auth).await?;

            let verdict = recv_frame_timeout(&mut stream, &codec, read_timeout).await?;
            handshake.on_auth_result(&verdict)?;
            info!("authenticated with daemon");
        }

        if handshake.uses_placeholder_key() {
            warn!("session uses the placeholder all-zero key; traffic is not confidential");
        }

        let authenticated = handshake.is_authenticated();
        let session = handshake.into_session()?;

        Ok(Self {
            stream,
            session,
            codec,
            read_timeout,
            requests_sent: 0,
            authenticated,
        })
    }

    /// Returns true if the daemon challenged us and accepted the signature.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Allocates the next connection-scoped request id (`cli-1`, `cli-2`, ...).
    pub fn next_request_id(&mut self) -> String {
        self.requests_sent += 1;
        request_id(self.requests_sent)
    }

    /// Sends one request and waits for its reply.
    ///
    /// Returns the `result` JSON exactly as the daemon sent it.
    pub async fn call(&mut self, request: &Request) -> Result<Box<RawValue>> {
        let plaintext = request.to_json()?;
        let payload = self.session.encrypt(&plaintext)?;
        send_frame(&mut self.stream, &self.codec, &payload).await?;
        debug!(id = %request.id, method = %request.method, "request sent");

        let frame = recv_frame_timeout(&mut self.stream, &self.codec, self.read_timeout).await?;

        let out_of_order = self.session.out_of_order_count();
        let plaintext = self.session.decrypt(&frame)?;
        if self.session.out_of_order_count() > out_of_order {
            warn!(
                recv_counter = self.session.recv_counter(),
                "daemon reply arrived out of order"
            );
        }

        let response = Response::from_json(&plaintext)?;
        debug!(id = %response.id, ok = response.ok, "response received");
        response.into_result(&request.id)
    }

    /// Builds and sends the request for a registry command.
    pub async fn invoke(&mut self, command: &str, args: &[String]) -> Result<Box<RawValue>> {
        let request = build_request(self.next_request_id(), command, args)?;
        self.call(&request).await
    }

    /// Polls for window events on this connection until `polls` diffs have
    /// been delivered, or forever when `polls` is `None`.
    ///
    /// The first poll only establishes the baseline and is not reported.
    pub async fn watch<F>(
        &mut self,
        interval: Duration,
        polls: Option<u64>,
        mut on_event: F,
    ) -> Result<()>
    where
        F: FnMut(Box<RawValue>),
    {
        let baseline = watch_request(self.next_request_id());
        self.call(&baseline).await?;
        debug!("watch baseline established");

        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        let mut delivered = 0u64;
        while polls.is_none_or(|limit| delivered < limit) {
            ticker.tick().await;
            let request = watch_request(self.next_request_id());
            on_event(self.call(&request).await?);
            delivered += 1;
        }
        Ok(())
    }

    /// Closes the write half of the connection.
    pub async fn shutdown(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Runs one command: validate, connect, handshake, exchange, close.
///
/// Argument errors are raised before any connection is attempted.
pub async fn run_command(
    options: &ClientOptions,
    command: &str,
    args: &[String],
) -> Result<Box<RawValue>> {
    let request = build_request(String::new(), command, args)?;
    run_request(options, request).await
}

/// Sends a prepared request on a fresh connection.
///
/// The request id is replaced with the connection's first id.
pub async fn run_request(options: &ClientOptions, mut request: Request) -> Result<Box<RawValue>> {
    let mut client = RemoteClient::connect(options).await?;
    request.id = client.next_request_id();
    let result = client.call(&request).await?;

    if let Err(e) = client.shutdown().await {
        debug!(error = %e, "failed to close connection cleanly");
    }
    Ok(result)
}
