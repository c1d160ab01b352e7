//! One request/response pair in flight.

use log::warn;
use serde_json::Value;

use crate::error::{FaultCode, Status};
use crate::quad::Ticks;

/// A command: the parsed request root, the resumable status, and the array
/// cursor for batched requests.
///
/// A command is created per transport message and lives until its terminal
/// response is emitted. While any busy status is set, the transport must
/// re-invoke the dispatcher with the same command; the status enum *is*
/// the explicit cross-call operation state.
#[derive(Debug, Clone)]
pub struct Command {
    request: Value,
    status: Status,
    cursor: usize,
    t_created: Ticks,
    t_last: Ticks,
}

impl Command {
    /// Parse one newline-delimited request. A malformed line yields a
    /// command already carrying the parse fault; processing it emits the
    /// error response.
    pub fn parse(line: &str, now: Ticks) -> Self {
        match serde_json::from_str::<Value>(line) {
            Ok(request) => Self {
                request,
                status: Status::BusyParsed,
                cursor: 0,
                t_created: now,
                t_last: now,
            },
            Err(e) => {
                warn!("request parse failed: {}", e);
                Self {
                    request: Value::Null,
                    status: Status::fault(FaultCode::JsonParse, ""),
                    cursor: 0,
                    t_created: now,
                    t_last: now,
                }
            }
        }
    }

    /// Wrap an already-parsed request value.
    pub fn from_value(request: Value, now: Ticks) -> Self {
        Self { request, status: Status::BusyParsed, cursor: 0, t_created: now, t_last: now }
    }

    /// Current status.
    #[inline]
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Replace the status.
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Array element cursor.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Advance to the next array element.
    pub fn advance_cursor(&mut self) {
        self.cursor += 1;
    }

    /// Tick of the last dispatcher activity.
    #[inline]
    pub fn last_active(&self) -> Ticks {
        self.t_last
    }

    /// Record dispatcher activity.
    pub fn touch(&mut self, now: Ticks) {
        self.t_last = now;
    }

    /// Take the request root out for processing; restore with
    /// [`Command::put_request`].
    pub(crate) fn take_request(&mut self) -> Value {
        core::mem::replace(&mut self.request, Value::Null)
    }

    /// Restore the request root.
    pub(crate) fn put_request(&mut self, request: Value) {
        self.request = request;
    }

    /// The request root.
    #[inline]
    pub fn request(&self) -> &Value {
        &self.request
    }

    /// The body a response should echo: the whole object, or the array
    /// element most recently processed.
    pub fn response_body(&self) -> &Value {
        match &self.request {
            Value::Array(arr) if !arr.is_empty() => {
                let i = self.cursor.min(arr.len() - 1);
                &arr[i]
            }
            other => other,
        }
    }

    /// Build the response for the current state: `{"s": code, "r": body,
    /// ["e": key,] "t": elapsed}`.
    pub fn response(&self, now: Ticks) -> Value {
        response_value(&self.status, self.response_body(), now - self.t_created)
    }
}

/// Assemble a response envelope.
pub(crate) fn response_value(status: &Status, body: &Value, elapsed: Ticks) -> Value {
    let mut out = super::JsonMap::new();
    out.insert("s".to_string(), Value::from(status.code()));
    out.insert("r".to_string(), body.clone());
    if let Some(key) = status.fault_key() {
        out.insert("e".to_string(), Value::from(key));
    }
    out.insert("t".to_string(), Value::from(elapsed));
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_ok() {
        let cmd = Command::parse(r#"{"sys":""}"#, 5);
        assert_eq!(*cmd.status(), Status::BusyParsed);
        assert!(cmd.request().is_object());
    }

    #[test]
    fn test_parse_garbage_faults() {
        let cmd = Command::parse("{not json", 0);
        assert_eq!(cmd.status().fault_code(), Some(FaultCode::JsonParse));
    }

    #[test]
    fn test_response_shape() {
        let mut cmd = Command::parse(r#"{"x":1}"#, 100);
        cmd.set_status(Status::Ok);
        let resp = cmd.response(350);
        assert_eq!(resp["s"], 0);
        assert_eq!(resp["t"], 250);
        assert_eq!(resp["r"], json!({"x": 1}));
        assert!(resp.get("e").is_none());
    }

    #[test]
    fn test_response_carries_fault_key() {
        let mut cmd = Command::parse(r#"{"bogus":1}"#, 0);
        cmd.set_status(Status::fault(FaultCode::UnrecognizedName, "bogus"));
        let resp = cmd.response(10);
        assert_eq!(resp["e"], "bogus");
        assert_eq!(resp["s"], FaultCode::UnrecognizedName as i32);
    }

    #[test]
    fn test_array_body_follows_cursor() {
        let cmd = Command::parse(r#"[{"a1":1},{"b1":2}]"#, 0);
        assert_eq!(*cmd.response_body(), json!({"a1": 1}));
        let mut cmd = cmd;
        cmd.advance_cursor();
        assert_eq!(*cmd.response_body(), json!({"b1": 2}));
        cmd.advance_cursor();
        assert_eq!(*cmd.response_body(), json!({"b1": 2}));
    }
}
