fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use carelink_protocol::constants::WS_MAX_MESSAGE_SIZE;
    use carelink_protocol::{ChatMessage, SenderRole, decode_frame};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Parses a fixture as a message, re-serializes it, and compares the JSON
    /// values (order-independent).
    ///
    /// Payloads are raw JSON, so parsing goes through `from_str` rather than
    /// an intermediate `Value`.
    fn roundtrip_test(name: &str) -> ChatMessage {
        let data = read_fixture(name);
        let parsed: ChatMessage = serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized: serde_json::Value = serde_json::from_str(&parsed.to_frame().unwrap())
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));
        let fixture: serde_json::Value = serde_json::from_str(&data).unwrap();

        assert_eq!(fixture["id"], reserialized["id"], "id mismatch for {name}");
        assert_eq!(fixture["payload"], reserialized["payload"], "payload mismatch for {name}");
        assert_eq!(
            fixture["senderRole"], reserialized["senderRole"],
            "role mismatch for {name}"
        );
        let instant = |v: &serde_json::Value| {
            chrono::DateTime::parse_from_rfc3339(v.as_str().unwrap()).unwrap()
        };
        assert_eq!(
            instant(&fixture["timestamp"]),
            instant(&reserialized["timestamp"]),
            "timestamp mismatch for {name}"
        );
        parsed
    }

    // --- Current shape ---

    #[test]
    fn fixture_chat_message() {
        let msg = roundtrip_test("chat_message.json");
        assert_eq!(msg.sender_role(), SenderRole::Doctor);

        #[derive(serde::Deserialize)]
        struct Note {
            text: String,
        }
        let note: Note = msg.parse_payload().unwrap();
        assert_eq!(note.text, "Your lab results are in.");
    }

    #[test]
    fn fixture_chat_message_text_payload() {
        let msg = roundtrip_test("chat_message_text.json");
        assert_eq!(msg.sender_role(), SenderRole::Patient);
        assert_eq!(msg.parse_payload::<String>().unwrap(), "Thanks, doctor!");
    }

    #[test]
    fn current_shape_decodes_as_frame() {
        let data = read_fixture("chat_message.json");
        let msg = decode_frame(data.as_bytes(), WS_MAX_MESSAGE_SIZE).unwrap();
        assert_eq!(msg.id(), "5d1c7a6e-0c1b-4b8e-9f5e-2a4d3c1b0a99");
    }

    // --- Legacy shape ---

    #[test]
    fn fixture_legacy_chat_message() {
        let data = read_fixture("legacy_chat_message.json");
        let msg = decode_frame(data.as_bytes(), WS_MAX_MESSAGE_SIZE).unwrap();

        assert_eq!(msg.id(), "1710408600000");
        assert_eq!(msg.sender_role(), SenderRole::Patient);
        assert_eq!(
            msg.parse_payload::<String>().unwrap(),
            "Is the appointment still on for Friday?"
        );
        assert_eq!(msg.timestamp().to_rfc3339(), "2025-03-14T09:30:00+00:00");
    }

    #[test]
    fn fixture_legacy_doctor_message() {
        let data = read_fixture("legacy_chat_message_doctor.json");
        let msg = decode_frame(data.as_bytes(), WS_MAX_MESSAGE_SIZE).unwrap();

        assert_eq!(msg.id(), "1710408660000");
        assert_eq!(msg.sender_role(), SenderRole::Doctor);
    }

    #[test]
    fn legacy_frames_reencode_in_current_shape() {
        let data = read_fixture("legacy_chat_message.json");
        let msg = decode_frame(data.as_bytes(), WS_MAX_MESSAGE_SIZE).unwrap();
        let value: serde_json::Value = serde_json::from_str(&msg.to_frame().unwrap()).unwrap();

        assert_eq!(value["id"], "1710408600000");
        assert_eq!(value["senderRole"], "patient");
        assert_eq!(value["payload"], "Is the appointment still on for Friday?");
        assert!(value.get("isDoctor").is_none());
        assert!(value.get("text").is_none());
    }

    // --- Field naming ---

    #[test]
    fn outgoing_frames_use_camel_case() {
        let msg = ChatMessage::new(SenderRole::Patient, "hi").unwrap();
        let value: serde_json::Value = serde_json::from_str(&msg.to_frame().unwrap()).unwrap();
        let obj = value.as_object().unwrap();

        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["id", "payload", "senderRole", "timestamp"]);
    }
}
