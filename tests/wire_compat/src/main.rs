fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use pkgdeploy_progress::{EventKind, EventStreamReader, ProgressTranslator};
    use pkgdeploy_protocol::{
        ClientMessage, ErrorCode, ServerMessage, StreamRecord, UploadMetadata,
    };

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Normalizes numbers so that `65` and `65.0` compare equal.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) => serde_json::json!(f),
                None => v.clone(),
            },
            serde_json::Value::Object(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect(),
            ),
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture, re-serializes it and compares the JSON
    /// values (order-independent, float-normalized).
    fn roundtrip_test<T>(name: &str) -> T
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  ours: {reserialized}"
        );
        parsed
    }

    // --- Upload channel frames ---

    #[test]
    fn fixture_upload_metadata() {
        let metadata: UploadMetadata = roundtrip_test("upload_metadata.json");
        assert_eq!(metadata.content_type, "application/x-apple-diskimage");
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn fixture_server_ready() {
        let msg: ServerMessage = roundtrip_test("server_ready.json");
        assert_eq!(msg, ServerMessage::Ready);
    }

    #[test]
    fn fixture_server_progress() {
        let msg: ServerMessage = roundtrip_test("server_progress.json");
        assert!(matches!(
            msg,
            ServerMessage::Progress { progress: Some(p), .. } if p == 42.5
        ));
    }

    #[test]
    fn fixture_server_progress_both_fields() {
        let msg: ServerMessage = roundtrip_test("server_progress_both_fields.json");
        assert_eq!(msg.to_record().numeric_progress(), Some(10.0));
    }

    #[test]
    fn fixture_server_completed() {
        let msg: ServerMessage = roundtrip_test("server_completed.json");
        assert!(matches!(msg, ServerMessage::Completed { data: Some(_) }));
    }

    #[test]
    fn fixture_server_error() {
        let msg: ServerMessage = roundtrip_test("server_error.json");
        let record = msg.to_record();
        let event = ProgressTranslator::new().translate(record);
        assert_eq!(event.kind, EventKind::Error);
        assert_eq!(event.code, Some(ErrorCode::ProcessRunning));
    }

    #[test]
    fn fixture_server_unauthorized() {
        let msg: ServerMessage = roundtrip_test("server_unauthorized.json");
        assert!(msg.is_unauthorized());
        assert_eq!(msg, ServerMessage::unauthorized());
    }

    #[test]
    fn fixture_client_cancel() {
        let msg: ClientMessage = roundtrip_test("client_cancel.json");
        assert_eq!(msg, ClientMessage::Cancel);
    }

    #[test]
    fn unknown_server_type_is_tolerated() {
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"heartbeat","seq":4}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
        assert!(msg.kind().is_none());
    }

    // --- Event-stream records ---

    #[test]
    fn fixture_record_progress() {
        let record: StreamRecord = roundtrip_test("record_progress.json");
        assert_eq!(record.numeric_progress(), Some(40.0));
        assert!(!record.is_terminal());
    }

    #[test]
    fn fixture_record_completed() {
        let record: StreamRecord = roundtrip_test("record_completed.json");
        assert!(record.is_terminal());
        assert_eq!(record.payload(), Some(&serde_json::json!({"installed": true})));
    }

    #[test]
    fn fixture_record_error() {
        let record: StreamRecord = roundtrip_test("record_error.json");
        assert!(record.is_terminal());
        let event = ProgressTranslator::new().translate(record);
        assert_eq!(event.code, Some(ErrorCode::FileNotFound));
    }

    #[test]
    fn install_transcript_translates_in_order() {
        let body = read_fixture("install_transcript.txt");
        let mut reader = EventStreamReader::new();
        let mut payloads = Vec::new();
        // Uneven chunks split lines and records mid-way.
        for chunk in body.as_bytes().chunks(7) {
            payloads.extend(reader.feed(chunk));
        }
        payloads.extend(reader.finish());
        assert_eq!(payloads.len(), 4);

        let mut translator = ProgressTranslator::new();
        let events: Vec<_> = payloads
            .iter()
            .map(|p| translator.translate_str(p).unwrap())
            .collect();

        let percents: Vec<_> = events.iter().map(|e| e.percent).collect();
        assert_eq!(percents, vec![Some(10.0), Some(55.0), Some(55.0), Some(100.0)]);

        assert_eq!(events[0].message.as_deref(), Some("Preparing"));
        assert_eq!(events[2].message.as_deref(), Some("Copying files"));
        assert_eq!(events[2].details.as_deref(), Some("Editor.app\nInfo.plist"));

        assert_eq!(events[3].kind, EventKind::Completed);
        assert_eq!(
            events[3].payload,
            Some(serde_json::json!({"path": "/Applications/Editor.app"}))
        );
    }
}
