use std::time::Instant;

use hyper::Method;
use tracing::info;

/// Diagnostics collected while one inbound request is handled.
///
/// Entries are emitted as a single event when the log is dropped.
#[derive(Debug)]
pub struct RequestLog {
    id: String,
    method: Method,
    uri: String,
    client: String,
    started: Instant,
    entries: Vec<String>,
}

impl RequestLog {
    pub fn new(
        id: impl Into<String>,
        method: Method,
        uri: impl Into<String>,
        client: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            method,
            uri: uri.into(),
            client: client.into(),
            started: Instant::now(),
            entries: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add(&mut self, entry: impl Into<String>) {
        self.entries.push(entry.into());
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

impl Drop for RequestLog {
    fn drop(&mut self) {
        info!(
            id = %self.id,
            method = %self.method,
            uri = %self.uri,
            client = %self.client,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "{}",
            self.entries.join(" ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_keep_order() {
        let mut log = RequestLog::new("abc", Method::GET, "http://example.test/", "127.0.0.1");
        log.add("try:1/2");
        log.add(format!("status:{}", 503));
        log.add("try:2/2");

        assert_eq!(log.id(), "abc");
        assert_eq!(log.entries(), &["try:1/2", "status:503", "try:2/2"]);
    }
}
