use std::time::Duration;

/// Settings for [`StreamedOperationClient`](crate::StreamedOperationClient).
#[derive(Debug, Clone)]
pub struct OperationClientConfig {
    /// Server root, e.g. `http://host:8080`. A trailing `/` is ignored.
    pub base_url: String,
    /// Applies to establishing the connection only; the event stream
    /// itself may run for minutes.
    pub connect_timeout: Duration,
}

impl Default for OperationClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".into(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl OperationClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}
