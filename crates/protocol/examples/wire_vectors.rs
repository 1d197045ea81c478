//! Generate wire test vectors for daemon interop testing.
//!
//! Run with: cargo run --package protocol --example wire_vectors
//!
//! Every vector is deterministic: fixed key, fixed seed, counters from zero.

use protocol::{
    build_request, ClientIdentity, FrameCodec, HelloMessage, Role, SessionCrypto, SessionKey,
};

fn main() {
    let codec = FrameCodec::new();

    // Test vector 1: framed hello with a challenge
    let hello = HelloMessage::new(Some((0u8..32).collect()));
    let hello_json = serde_json::to_vec(&hello).expect("serialization failed");
    print_test_vector("hello_frame", &codec.encode(&hello_json).expect("frame too large"));

    // Test vector 2: challenge signature from a fixed seed
    let identity = ClientIdentity::from_secret_key_bytes(&[0x11; 32]);
    println!("# {}", identity.authorized_key(Some("vectors")).to_line());
    print_test_vector("challenge_signature", identity.sign(&[0u8; 32]).as_bytes());

    // Test vectors 3-4: first two encrypted requests under the placeholder key
    let mut session = SessionCrypto::new(&SessionKey::from_bytes([0u8; 32]), Role::Initiator);
    let args = vec!["0x1234".to_string()];
    for (n, command) in ["info", "status"].into_iter().enumerate() {
        let id = protocol::request_id(n as u64 + 1);
        let argv: &[String] = if command == "info" { &args[..] } else { &[] };
        let request = build_request(id, command, argv).expect("invalid command");
        let plaintext = request.to_json().expect("serialization failed");
        println!("# {}", String::from_utf8_lossy(&plaintext));
        let payload = session.encrypt(&plaintext).expect("encryption failed");
        print_test_vector(&format!("request_{}_payload", n + 1), &payload);
    }
}

fn print_test_vector(name: &str, bytes: &[u8]) {
    println!("{} = {}", name, hex::encode(bytes));
}
