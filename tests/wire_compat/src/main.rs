fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use mirrorlink_protocol::{Message, MessageType};
    use mirrorlink_transfer::TransferMetadata;

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Parses a fixture, re-serializes it, and compares the JSON values.
    fn roundtrip(name: &str) -> Message {
        let text = load_fixture(name);
        let msg = Message::parse(&text).unwrap_or_else(|e| panic!("failed to parse {name}: {e}"));
        let json = msg
            .to_json()
            .unwrap_or_else(|e| panic!("failed to serialize {name}: {e}"));

        let expected: serde_json::Value = serde_json::from_str(&text).unwrap();
        let actual: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            expected, actual,
            "roundtrip mismatch for {name}:\n  fixture: {expected}\n  ours:    {actual}"
        );
        msg
    }

    #[test]
    fn fixture_file_transfer_init() {
        let msg = roundtrip("file_transfer_init.json");
        assert_eq!(msg.message_type(), MessageType::FileTransferInit);
        let Message::FileTransferInit(init) = msg else {
            panic!("wrong variant");
        };
        assert_eq!(init.size, 150_000);
        assert_eq!(init.mime_type, "image/jpeg");
        assert!(init.checksum.is_some());
    }

    #[test]
    fn fixture_file_transfer_init_without_checksum() {
        let msg = roundtrip("file_transfer_init_no_checksum.json");
        let Message::FileTransferInit(init) = &msg else {
            panic!("wrong variant");
        };
        assert_eq!(init.checksum, None);
        // Absent, never `null`.
        assert!(!msg.to_json().unwrap().contains("checksum"));
    }

    #[test]
    fn fixture_file_chunk() {
        let msg = roundtrip("file_chunk.json");
        let Message::FileChunk(chunk) = msg else {
            panic!("wrong variant");
        };
        assert_eq!(chunk.index, 2);
        assert_eq!(chunk.chunk, "aGVsbG8gd29ybGQ=");
    }

    #[test]
    fn fixture_file_chunk_ack() {
        let msg = roundtrip("file_chunk_ack.json");
        assert_eq!(msg.message_type(), MessageType::FileChunkAck);
        assert_eq!(msg.transfer_id(), "1d3c6f0e-2b7a-4f43-9a55-0c1e8f2b9d10");
    }

    #[test]
    fn fixture_file_transfer_complete() {
        let msg = roundtrip("file_transfer_complete.json");
        let Message::FileTransferComplete(complete) = msg else {
            panic!("wrong variant");
        };
        assert_eq!(complete.name, "IMG_0042.jpg");
    }

    #[test]
    fn fixture_transfer_verified() {
        let msg = roundtrip("transfer_verified.json");
        let Message::TransferVerified(v) = msg else {
            panic!("wrong variant");
        };
        assert!(!v.verified);
    }

    #[test]
    fn metadata_builds_fixture_init() {
        let text = load_fixture("file_transfer_init_no_checksum.json");
        let Message::FileTransferInit(init) = Message::parse(&text).unwrap() else {
            panic!("wrong variant");
        };
        let rebuilt = Message::from(TransferMetadata::from_init(&init).to_init());
        let expected: serde_json::Value = serde_json::from_str(&text).unwrap();
        let actual: serde_json::Value = serde_json::from_str(&rebuilt.to_json().unwrap()).unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn field_order_does_not_matter() {
        let text = r#"{"data":{"index":7,"id":"abc"},"type":"fileChunkAck"}"#;
        let msg = Message::parse(text).unwrap();
        assert_eq!(msg.transfer_id(), "abc");
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let text = r#"{"type":"transferVerified","data":{"id":"abc","verified":true,"extra":1},"seq":9}"#;
        let Message::TransferVerified(v) = Message::parse(text).unwrap() else {
            panic!("wrong variant");
        };
        assert!(v.verified);
    }
}
