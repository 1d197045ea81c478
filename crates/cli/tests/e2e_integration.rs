//! End-to-end tests: the client against an in-process fake daemon on loopback TCP.

use std::future::Future;
use std::time::Duration;

use protocol::{
    build_request_with, AuthMessage, AuthResult, AuthorizedKey, ClientIdentity, Credentials,
    FrameCodec, HelloMessage, KeySchedule, PlaceholderKeySchedule, ProtocolError, Request,
    RequestOptions, Role, SessionCrypto, Signature,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use wininspect_cli::identity::{generate_identity, load_identity, CredentialSource};
use wininspect_cli::transport::{recv_frame, send_frame};
use wininspect_cli::{run_command, run_request, ClientOptions, RemoteClient};

// ============================================================================
// Fake daemon helpers
// ============================================================================

/// Binds a loopback listener and serves exactly one connection with `handler`.
async fn spawn_daemon<F, Fut, T>(handler: F) -> (String, JoinHandle<T>)
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        handler(stream).await
    });
    (address, handle)
}

fn options(address: &str, credentials: Option<Credentials>) -> ClientOptions {
    let mut options = ClientOptions::new(address);
    options.credentials = credentials.into();
    options.connect_timeout = Duration::from_secs(5);
    options.read_timeout = Duration::from_secs(5);
    options
}

fn key_file_options(address: &str, identity: &str, path: &std::path::Path) -> ClientOptions {
    let mut options = options(address, None);
    options.credentials = CredentialSource::KeyFile {
        identity: identity.to_string(),
        path: path.to_path_buf(),
    };
    options
}

/// Writes a file that cannot be parsed as a private key.
fn stale_key(temp_dir: &TempDir) -> std::path::PathBuf {
    let path = temp_dir.path().join("stale_key");
    std::fs::write(&path, b"stale").unwrap();
    path
}

fn args(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn daemon_session() -> SessionCrypto {
    let key = PlaceholderKeySchedule.session_key(None).unwrap();
    SessionCrypto::new(&key, Role::Responder)
}

async fn send_json<T: serde::Serialize>(stream: &mut TcpStream, value: &T) {
    let bytes = serde_json::to_vec(value).unwrap();
    send_frame(stream, &FrameCodec::new(), &bytes).await.unwrap();
}

/// Reads and decrypts one request.
async fn recv_request(stream: &mut TcpStream, session: &mut SessionCrypto) -> Request {
    let frame = recv_frame(stream, &FrameCodec::new()).await.unwrap();
    Request::from_json(&session.decrypt(&frame).unwrap()).unwrap()
}

/// Encrypts and sends one reply.
async fn send_reply(stream: &mut TcpStream, session: &mut SessionCrypto, reply: Value) {
    let payload = session.encrypt(reply.to_string().as_bytes()).unwrap();
    send_frame(stream, &FrameCodec::new(), &payload).await.unwrap();
}

// ============================================================================
// Unauthenticated daemon
// ============================================================================

#[tokio::test]
async fn test_unauthenticated_command_returns_result_verbatim() {
    let (address, daemon) = spawn_daemon(|mut stream| async move {
        let mut session = daemon_session();
        send_json(&mut stream, &HelloMessage::new(None)).await;

        let request = recv_request(&mut stream, &mut session).await;
        send_reply(
            &mut stream,
            &mut session,
            json!({"id": request.id, "ok": true, "result": {"pid": 4242, "uptime_s": 12}}),
        )
        .await;
        request
    })
    .await;

    let result = run_command(&options(&address, None), "status", &[])
        .await
        .unwrap();
    let request = daemon.await.unwrap();

    assert_eq!(request.id, "cli-1");
    assert_eq!(request.method, "daemon.status");
    assert!(request.params.is_empty());
    assert_eq!(result.get(), r#"{"pid":4242,"uptime_s":12}"#);
}

#[tokio::test]
async fn test_pick_sends_string_coordinates() {
    let (address, daemon) = spawn_daemon(|mut stream| async move {
        let mut session = daemon_session();
        send_json(&mut stream, &HelloMessage::new(None)).await;

        let request = recv_request(&mut stream, &mut session).await;
        send_reply(
            &mut stream,
            &mut session,
            json!({"id": request.id, "ok": true, "result": {"hwnd": "0x10"}}),
        )
        .await;
        request
    })
    .await;

    run_command(&options(&address, None), "pick", &args(&["10", "20"]))
        .await
        .unwrap();
    let request = daemon.await.unwrap();

    assert_eq!(request.method, "window.pickAtPoint");
    assert_eq!(Value::Object(request.params), json!({"x": "10", "y": "20"}));
}

#[tokio::test]
async fn test_unauthenticated_daemon_ignores_broken_key_file() {
    let temp_dir = TempDir::new().unwrap();
    let key_path = stale_key(&temp_dir);

    let (address, daemon) = spawn_daemon(|mut stream| async move {
        let mut session = daemon_session();
        send_json(&mut stream, &HelloMessage::new(None)).await;

        let request = recv_request(&mut stream, &mut session).await;
        send_reply(
            &mut stream,
            &mut session,
            json!({"id": request.id, "ok": true, "result": "up"}),
        )
        .await;
        request
    })
    .await;

    let options = key_file_options(&address, "wininspect-user", &key_path);
    let result = run_command(&options, "status", &[]).await.unwrap();
    let request = daemon.await.unwrap();

    assert_eq!(request.method, "daemon.status");
    assert_eq!(result.get(), r#""up""#);
}

#[tokio::test]
async fn test_snapshot_option_reaches_daemon() {
    let (address, daemon) = spawn_daemon(|mut stream| async move {
        let mut session = daemon_session();
        send_json(&mut stream, &HelloMessage::new(None)).await;

        let request = recv_request(&mut stream, &mut session).await;
        send_reply(
            &mut stream,
            &mut session,
            json!({"id": request.id, "ok": true, "result": []}),
        )
        .await;
        request
    })
    .await;

    let request_options = RequestOptions {
        snapshot_id: Some("s42".to_string()),
    };
    let request = build_request_with("", "top", &[], &request_options).unwrap();
    run_request(&options(&address, None), request).await.unwrap();
    let request = daemon.await.unwrap();

    assert_eq!(request.id, "cli-1");
    assert_eq!(request.method, "window.listTop");
    assert_eq!(
        Value::Object(request.params),
        json!({"snapshot_id": "s42", "canonical": true})
    );
}

#[tokio::test]
async fn test_multiple_requests_on_one_connection() {
    let (address, daemon) = spawn_daemon(|mut stream| async move {
        let mut session = daemon_session();
        send_json(&mut stream, &HelloMessage::new(None)).await;

        let mut ids = Vec::new();
        for n in 0..3 {
            let request = recv_request(&mut stream, &mut session).await;
            send_reply(
                &mut stream,
                &mut session,
                json!({"id": request.id, "ok": true, "result": n}),
            )
            .await;
            ids.push(request.id);
        }
        ids
    })
    .await;

    let mut client = RemoteClient::connect(&options(&address, None)).await.unwrap();
    for n in 0..3 {
        let result = client.invoke("health", &[]).await.unwrap();
        assert_eq!(result.get(), n.to_string());
    }
    client.shutdown().await.unwrap();

    assert_eq!(daemon.await.unwrap(), ["cli-1", "cli-2", "cli-3"]);
}

// ============================================================================
// Authenticated daemon
// ============================================================================

#[tokio::test]
async fn test_authenticated_command() {
    let temp_dir = TempDir::new().unwrap();
    let key_path = temp_dir.path().join("id_wininspect");
    let generated = generate_identity(&key_path).unwrap();
    let authorized = AuthorizedKey::parse(&generated.authorized_key(Some("ci")).to_line()).unwrap();

    let expected_challenge = vec![0xC3u8; 32];
    let (address, daemon) = spawn_daemon(move |mut stream| async move {
        let codec = FrameCodec::new();
        let mut session = daemon_session();
        send_json(&mut stream, &HelloMessage::new(Some(expected_challenge.clone()))).await;

        let auth_frame = recv_frame(&mut stream, &codec).await.unwrap();
        let auth: AuthMessage = serde_json::from_slice(&auth_frame).unwrap();
        let signature = Signature::from_slice(&auth.signature).unwrap();
        let verified = authorized.verify(&expected_challenge, &signature).is_ok();
        send_json(&mut stream, &AuthResult::new(verified)).await;

        let request = recv_request(&mut stream, &mut session).await;
        send_reply(
            &mut stream,
            &mut session,
            json!({"id": request.id, "ok": true, "result": {"title": "Notepad"}}),
        )
        .await;
        (auth, request)
    })
    .await;

    let options = key_file_options(&address, "ci-runner", &key_path);
    let result = run_command(&options, "info", &args(&["0x1234"]))
        .await
        .unwrap();
    let (auth, request) = daemon.await.unwrap();

    assert_eq!(auth.identity, "ci-runner");
    assert_eq!(auth.protocol_version, "1.0.0");
    assert_eq!(request.method, "window.getInfo");
    assert_eq!(
        Value::Object(request.params),
        json!({"hwnd": "0x1234", "canonical": true})
    );
    assert_eq!(result.get(), r#"{"title":"Notepad"}"#);
}

#[tokio::test]
async fn test_authentication_rejected() {
    let (address, daemon) = spawn_daemon(|mut stream| async move {
        send_json(&mut stream, &HelloMessage::new(Some(vec![1u8; 32]))).await;
        let _auth = recv_frame(&mut stream, &FrameCodec::new()).await.unwrap();
        send_json(&mut stream, &AuthResult::new(false)).await;

        // The client must close without sending a request.
        recv_frame(&mut stream, &FrameCodec::new()).await
    })
    .await;

    let credentials = Credentials {
        identity: "stranger".to_string(),
        key: ClientIdentity::generate(),
    };
    let result = run_command(&options(&address, Some(credentials)), "top", &[]).await;

    assert!(matches!(result, Err(ProtocolError::AuthenticationFailed(_))));
    assert!(matches!(
        daemon.await.unwrap(),
        Err(ProtocolError::FrameTruncated { received: 0, .. })
    ));
}

#[tokio::test]
async fn test_inline_credentials_authenticate() {
    let temp_dir = TempDir::new().unwrap();
    let key_path = temp_dir.path().join("id_wininspect");
    generate_identity(&key_path).unwrap();
    let key = load_identity(&key_path).unwrap();
    let authorized = key.authorized_key(None);

    let (address, daemon) = spawn_daemon(move |mut stream| async move {
        let mut session = daemon_session();
        send_json(&mut stream, &HelloMessage::new(Some(vec![0x42u8; 32]))).await;

        let auth_frame = recv_frame(&mut stream, &FrameCodec::new()).await.unwrap();
        let auth: AuthMessage = serde_json::from_slice(&auth_frame).unwrap();
        let signature = Signature::from_slice(&auth.signature).unwrap();
        let verified = authorized.verify(&[0x42u8; 32], &signature).is_ok();
        send_json(&mut stream, &AuthResult::new(verified)).await;

        let request = recv_request(&mut stream, &mut session).await;
        send_reply(
            &mut stream,
            &mut session,
            json!({"id": request.id, "ok": true, "result": true}),
        )
        .await;
    })
    .await;

    let credentials = Credentials {
        identity: "ci-runner".to_string(),
        key,
    };
    let result = run_command(&options(&address, Some(credentials)), "health", &[])
        .await
        .unwrap();
    daemon.await.unwrap();

    assert_eq!(result.get(), "true");
}

#[tokio::test]
async fn test_challenge_with_broken_key_file_sends_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let key_path = stale_key(&temp_dir);

    let (address, daemon) = spawn_daemon(|mut stream| async move {
        send_json(&mut stream, &HelloMessage::new(Some(vec![9u8; 32]))).await;
        recv_frame(&mut stream, &FrameCodec::new()).await
    })
    .await;

    let options = key_file_options(&address, "wininspect-user", &key_path);
    let result = run_command(&options, "top", &[]).await;

    match result {
        Err(ProtocolError::InvalidKey(message)) => {
            assert!(message.contains("stale_key"), "{}", message);
        }
        other => panic!("expected invalid key, got {:?}", other),
    }
    assert!(matches!(
        daemon.await.unwrap(),
        Err(ProtocolError::FrameTruncated { received: 0, .. })
    ));
}

#[tokio::test]
async fn test_challenge_without_key_fails_with_hint() {
    let (address, daemon) = spawn_daemon(|mut stream| async move {
        send_json(&mut stream, &HelloMessage::new(Some(vec![9u8; 32]))).await;
        recv_frame(&mut stream, &FrameCodec::new()).await
    })
    .await;

    let result = run_command(&options(&address, None), "top", &[]).await;

    match result {
        Err(ProtocolError::AuthenticationFailed(message)) => {
            assert!(message.contains("--key"), "{}", message);
        }
        other => panic!("expected authentication failure, got {:?}", other),
    }
    assert!(daemon.await.unwrap().is_err(), "no auth message may be sent");
}

// ============================================================================
// Handshake failures
// ============================================================================

#[tokio::test]
async fn test_version_mismatch_sends_nothing() {
    let (address, daemon) = spawn_daemon(|mut stream| async move {
        let mut hello = HelloMessage::new(Some(vec![5u8; 32]));
        hello.protocol_version = "0.0.1".to_string();
        send_json(&mut stream, &hello).await;

        recv_frame(&mut stream, &FrameCodec::new()).await
    })
    .await;

    let credentials = Credentials {
        identity: "wininspect-user".to_string(),
        key: ClientIdentity::generate(),
    };
    let result = run_command(&options(&address, Some(credentials)), "status", &[]).await;

    assert!(matches!(
        result,
        Err(ProtocolError::VersionMismatch { ref got, .. }) if got == "0.0.1"
    ));
    assert!(matches!(
        daemon.await.unwrap(),
        Err(ProtocolError::FrameTruncated { received: 0, .. })
    ));
}

#[tokio::test]
async fn test_silent_daemon_times_out() {
    let (address, daemon) = spawn_daemon(|stream| async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(stream);
    })
    .await;

    let mut options = options(&address, None);
    options.read_timeout = Duration::from_millis(100);
    let result = run_command(&options, "status", &[]).await;

    assert!(matches!(result, Err(ProtocolError::Timeout(_))));
    daemon.abort();
}

#[tokio::test]
async fn test_daemon_closes_mid_hello() {
    let (address, _daemon) = spawn_daemon(|mut stream| async move {
        use tokio::io::AsyncWriteExt;
        stream.write_all(&100u32.to_le_bytes()).await.unwrap();
        stream.write_all(b"{\"type\"").await.unwrap();
    })
    .await;

    let result = run_command(&options(&address, None), "status", &[]).await;
    assert!(matches!(
        result,
        Err(ProtocolError::FrameTruncated {
            expected: 104,
            received: 11
        })
    ));
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let result = run_command(&options(&address, None), "status", &[]).await;
    assert!(matches!(result, Err(ProtocolError::Connect { .. })));
}

// ============================================================================
// Exchange failures
// ============================================================================

#[tokio::test]
async fn test_method_error_surfaces_code_and_message() {
    let (address, _daemon) = spawn_daemon(|mut stream| async move {
        let mut session = daemon_session();
        send_json(&mut stream, &HelloMessage::new(None)).await;

        let request = recv_request(&mut stream, &mut session).await;
        send_reply(
            &mut stream,
            &mut session,
            json!({
                "id": request.id,
                "ok": false,
                "error": {"code": "NOT_FOUND", "message": "window 0xdead does not exist"}
            }),
        )
        .await;
    })
    .await;

    let result = run_command(&options(&address, None), "info", &args(&["0xdead"])).await;

    match result {
        Err(ProtocolError::Method { code, message }) => {
            assert_eq!(code, "NOT_FOUND");
            assert_eq!(message, "window 0xdead does not exist");
        }
        other => panic!("expected method error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_tampered_reply_is_rejected() {
    let (address, _daemon) = spawn_daemon(|mut stream| async move {
        let mut session = daemon_session();
        send_json(&mut stream, &HelloMessage::new(None)).await;

        let request = recv_request(&mut stream, &mut session).await;
        let reply = json!({"id": request.id, "ok": true, "result": 1}).to_string();
        let mut payload = session.encrypt(reply.as_bytes()).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0x01;
        send_frame(&mut stream, &FrameCodec::new(), &payload)
            .await
            .unwrap();
    })
    .await;

    let result = run_command(&options(&address, None), "status", &[]).await;
    assert!(matches!(result, Err(ProtocolError::DecryptionFailed(_))));
}

// ============================================================================
// Invocation errors
// ============================================================================

#[tokio::test]
async fn test_usage_error_before_any_network_io() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let result = run_command(&options(&address, None), "reg-write", &args(&["/path/only"])).await;

    match result {
        Err(ProtocolError::Usage { command, missing }) => {
            assert_eq!(command, "reg-write");
            assert_eq!(missing, ["name", "type", "data"]);
        }
        other => panic!("expected usage error, got {:?}", other),
    }

    // Nothing ever dialled the listener.
    let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(accepted.is_err());
}

#[tokio::test]
async fn test_surplus_arguments_before_any_network_io() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let result = run_command(
        &options(&address, None),
        "pick",
        &args(&["10", "20", "--tcp", "127.0.0.1:47123"]),
    )
    .await;

    match result {
        Err(ProtocolError::TooManyArguments { command, extra }) => {
            assert_eq!(command, "pick");
            assert_eq!(extra, ["--tcp", "127.0.0.1:47123"]);
        }
        other => panic!("expected too many arguments, got {:?}", other),
    }

    let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(accepted.is_err());
}

#[tokio::test]
async fn test_unknown_command_before_any_network_io() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let result = run_command(&options(&address, None), "defragment", &[]).await;
    assert!(matches!(result, Err(ProtocolError::UnknownCommand(_))));

    let accepted = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
    assert!(accepted.is_err());
}
