//! Shell Responses
//!
//! Every interaction with a shell session resolves to a [`Reply`]: a status
//! code, a human message, and an optional value. The session layer renders
//! a reply in one of two ways:
//!
//! - **echo mode**: line-oriented text with ANSI color, for humans
//! - **json mode**: one envelope object per line, for programs
//!
//! The core returns plain structured results; color is strictly an
//! output-side concern and lives here.

use serde::Serialize;

use crate::codec::value::Value;

/// Session status codes.
///
/// Negative codes are informational, positive ones are failures (with the
/// exception of `Exit`, which is an orderly success).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    ModeChanged,
    Authorized,
    NotAuthorized,
    Response,
    Timeout,
    AuthorizeAgain,
    CommandNotFound,
    CommandMismatch,
    UnexpectedError,
    KeyNotExist,
    Exit,
    FullRoom,
    SizeLimit,
}

impl Status {
    /// The numeric wire code.
    pub fn code(self) -> i32 {
        match self {
            Status::ModeChanged => -3,
            Status::Authorized => -2,
            Status::NotAuthorized => -1,
            Status::Response => 0,
            Status::Timeout => 1,
            Status::AuthorizeAgain => 2,
            Status::CommandNotFound => 3,
            Status::CommandMismatch => 4,
            Status::UnexpectedError => 5,
            Status::KeyNotExist => 6,
            Status::Exit => 7,
            Status::FullRoom => 8,
            Status::SizeLimit => 9,
        }
    }

    /// The symbolic name used in JSON envelopes.
    pub fn symbol(self) -> &'static str {
        match self {
            Status::ModeChanged => "mode_changed",
            Status::Authorized => "authorized",
            Status::NotAuthorized => "not_authorized",
            Status::Response => "response",
            Status::Timeout => "timeout",
            Status::AuthorizeAgain => "authorize_again",
            Status::CommandNotFound => "command_not_found",
            Status::CommandMismatch => "command_mismatch",
            Status::UnexpectedError => "unexpected_error",
            Status::KeyNotExist => "key_not_exist",
            Status::Exit => "exit",
            Status::FullRoom => "full_room",
            Status::SizeLimit => "size_limit",
        }
    }

    /// Whether the code counts as a success.
    pub fn success(self) -> bool {
        matches!(
            self,
            Status::ModeChanged
                | Status::Authorized
                | Status::NotAuthorized
                | Status::Response
                | Status::Exit
        )
    }
}

/// A structured response on its way to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// What produced this reply (a command name, or `auth`, `attribute`…).
    pub action: String,

    /// Human-readable message text, uncolored.
    pub message: String,

    /// Optional payload value.
    pub value: Option<Value>,

    /// Outcome status.
    pub status: Status,

    /// Whether echo mode should print the value under the message.
    pub print_value: bool,
}

impl Reply {
    /// A plain successful response.
    pub fn ok(action: impl Into<String>, message: impl Into<String>) -> Reply {
        Reply {
            action: action.into(),
            message: message.into(),
            value: None,
            status: Status::Response,
            print_value: false,
        }
    }

    /// A successful response carrying a printable value.
    pub fn with_value(action: impl Into<String>, message: impl Into<String>, value: Value) -> Reply {
        Reply {
            action: action.into(),
            message: message.into(),
            value: Some(value),
            status: Status::Response,
            print_value: true,
        }
    }

    /// A response with an explicit status and no value.
    pub fn status(action: impl Into<String>, message: impl Into<String>, status: Status) -> Reply {
        Reply {
            action: action.into(),
            message: message.into(),
            value: None,
            status,
            print_value: false,
        }
    }
}

/// The JSON envelope, one per line on the wire.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    action: &'a str,
    message_text: &'a str,
    value: serde_json::Value,
    status_code: i32,
    status: &'static str,
    success: bool,
}

/// Renders a reply as a single JSON line (without the newline).
pub fn render_json(reply: &Reply) -> String {
    let envelope = Envelope {
        action: &reply.action,
        message_text: &reply.message,
        value: reply
            .value
            .as_ref()
            .map(Value::to_json)
            .unwrap_or(serde_json::Value::Null),
        status_code: reply.status.code(),
        status: reply.status.symbol(),
        success: reply.status.success(),
    };
    // A reply is built from already-valid pieces; serialization of this
    // shape cannot fail.
    serde_json::to_string(&envelope).unwrap_or_else(|_| "{}".to_string())
}

/// ANSI escape codes used by the echo renderer.
pub mod ansi {
    pub const RESET: &str = "\x1b[0m";
    pub const RED: &str = "\x1b[31m";
    pub const GREEN: &str = "\x1b[32m";
    pub const YELLOW: &str = "\x1b[33m";
    pub const CYAN: &str = "\x1b[36m";

    /// Clear screen and home the cursor.
    pub const CLEAR: &str = "\x1b[2J\x1b[H";
}

/// Renders a reply as echo-mode text (without the trailing prompt).
pub fn render_echo(reply: &Reply, use_colors: bool) -> String {
    let mut out = String::new();

    if !reply.message.is_empty() {
        if use_colors && !reply.status.success() {
            out.push_str(ansi::RED);
            out.push_str(&reply.message);
            out.push_str(ansi::RESET);
        } else {
            out.push_str(&reply.message);
        }
    }

    if reply.print_value {
        if let Some(value) = &reply.value {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&value.to_string());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_symbol_success_table() {
        let table: [(Status, i32, &str, bool); 13] = [
            (Status::ModeChanged, -3, "mode_changed", true),
            (Status::Authorized, -2, "authorized", true),
            (Status::NotAuthorized, -1, "not_authorized", true),
            (Status::Response, 0, "response", true),
            (Status::Timeout, 1, "timeout", false),
            (Status::AuthorizeAgain, 2, "authorize_again", false),
            (Status::CommandNotFound, 3, "command_not_found", false),
            (Status::CommandMismatch, 4, "command_mismatch", false),
            (Status::UnexpectedError, 5, "unexpected_error", false),
            (Status::KeyNotExist, 6, "key_not_exist", false),
            (Status::Exit, 7, "exit", true),
            (Status::FullRoom, 8, "full_room", false),
            (Status::SizeLimit, 9, "size_limit", false),
        ];
        for (status, code, symbol, success) in table {
            assert_eq!(status.code(), code);
            assert_eq!(status.symbol(), symbol);
            assert_eq!(status.success(), success);
        }
    }

    #[test]
    fn test_json_envelope_shape() {
        let reply = Reply::with_value("get", "", Value::Int(5));
        let json: serde_json::Value = serde_json::from_str(&render_json(&reply)).unwrap();
        assert_eq!(json["action"], "get");
        assert_eq!(json["value"], 5);
        assert_eq!(json["status_code"], 0);
        assert_eq!(json["status"], "response");
        assert_eq!(json["success"], true);

        let reply = Reply::status("get", "key doesn't exist", Status::KeyNotExist);
        let json: serde_json::Value = serde_json::from_str(&render_json(&reply)).unwrap();
        assert_eq!(json["status_code"], 6);
        assert_eq!(json["success"], false);
        assert_eq!(json["value"], serde_json::Value::Null);
    }

    #[test]
    fn test_echo_rendering() {
        let reply = Reply::with_value("get", "", Value::from("v1"));
        assert_eq!(render_echo(&reply, false), "v1");

        let reply = Reply::ok("set", "1 entry inserted");
        assert_eq!(render_echo(&reply, false), "1 entry inserted");

        let reply = Reply::status("get", "key doesn't exist", Status::KeyNotExist);
        assert_eq!(render_echo(&reply, false), "key doesn't exist");
        let colored = render_echo(&reply, true);
        assert!(colored.starts_with(ansi::RED));
        assert!(colored.ends_with(ansi::RESET));
    }
}
