use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Outbound result message for the hosting application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMessage {
    pub test_code: String,
    pub test_name: String,
    pub student_name: String,
    pub score: u32,
    pub total: u32,
}

/// Fire-and-forget delivery to the host application.
///
/// No acknowledgement is expected; implementations log their own failures.
pub trait HostChannel: Send + Sync {
    fn send(&self, message: &HostMessage);
}

/// Writes each message as one JSON line, e.g. to stdout of an embedding process.
pub struct JsonLinesHost<W: Write + Send> {
    out: Mutex<W>,
}

impl<W: Write + Send> JsonLinesHost<W> {
    #[must_use]
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

impl<W: Write + Send> HostChannel for JsonLinesHost<W> {
    fn send(&self, message: &HostMessage) {
        let line = match serde_json::to_string(message) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "could not encode host message");
                return;
            }
        };
        let Ok(mut out) = self.out.lock() else {
            tracing::warn!("host channel writer is poisoned");
            return;
        };
        if let Err(err) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            tracing::warn!(error = %err, "host channel write failed");
        }
    }
}

/// Keeps sent messages in memory, for testing and prototyping.
#[derive(Clone, Default)]
pub struct MemoryHost {
    sent: Arc<Mutex<Vec<HostMessage>>>,
}

impl MemoryHost {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<HostMessage> {
        self.sent.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl HostChannel for MemoryHost {
    fn send(&self, message: &HostMessage) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> HostMessage {
        HostMessage {
            test_code: "T1".into(),
            test_name: "Algebra".into(),
            student_name: "Ali".into(),
            score: 4,
            total: 5,
        }
    }

    #[test]
    fn json_lines_host_writes_one_line_per_message() {
        let host = JsonLinesHost::new(Vec::new());
        host.send(&message());
        host.send(&message());

        let out = host.out.into_inner().unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: HostMessage = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed, message());
    }

    #[test]
    fn memory_host_records_messages() {
        let host = MemoryHost::new();
        host.send(&message());
        assert_eq!(host.sent(), vec![message()]);
    }
}
