//! Daemon protocol: request/response types for client-daemon communication.
//!
//! One JSON object per line in each direction. Requests that act on a
//! project name it with `project`, which may be the registered root or
//! any path inside it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Request from client to daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum Request {
    /// Register a project (idempotent)
    #[serde(rename = "register")]
    Register { project_root: PathBuf, library_path: PathBuf },

    /// Reindex one file, or run a full incremental scan when `file` is absent
    #[serde(rename = "parse")]
    Reparse {
        project: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<PathBuf>,
    },

    /// Number of bulk indexing jobs not yet finished
    #[serde(rename = "queue_size")]
    QueueSize { project: PathBuf },

    /// Block until the bulk indexer is idle
    #[serde(rename = "wait")]
    Wait { project: PathBuf },

    /// Raw index entries whose key starts with `starts_with`
    #[serde(rename = "search")]
    Search { project: PathBuf, starts_with: String },

    /// Symbol names starting with `prefix`
    #[serde(rename = "match")]
    Match {
        project: PathBuf,
        prefix: String,
        #[serde(default = "default_match_limit")]
        limit: usize,
    },

    /// Builtin include directory in use
    #[serde(rename = "builtin_header_path")]
    BuiltinHeaderPath { project: PathBuf },

    /// Compiler invocation for a file
    #[serde(rename = "file_args")]
    FileArgs { project: PathBuf, file: PathBuf },

    /// Reparse an unsaved buffer. `invocation` is the argv as a JSON string array.
    #[serde(rename = "parse_current_file")]
    ParseCurrentFile {
        project: PathBuf,
        invocation: String,
        file: PathBuf,
        content: String,
    },

    /// Drop the live session of a closed buffer
    #[serde(rename = "unload_current_file")]
    UnloadCurrentFile { project: PathBuf, file: PathBuf },

    /// Declaration referenced at a position of a live buffer
    #[serde(rename = "usr_under_cursor")]
    UsrUnderCursor {
        project: PathBuf,
        file: PathBuf,
        line: usize,
        column: usize,
    },

    /// Scope label of a line of a live buffer
    #[serde(rename = "current_scope")]
    CurrentScope { project: PathBuf, file: PathBuf, line: usize },

    /// Check if daemon is alive
    #[serde(rename = "ping")]
    Ping,

    /// Flush every project and stop the daemon
    #[serde(rename = "shutdown")]
    Shutdown,
}

fn default_match_limit() -> usize {
    20
}

/// Response from daemon to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum Response {
    /// Successful response with JSON data
    #[serde(rename = "ok")]
    Ok { data: serde_json::Value },

    /// The request failed
    #[serde(rename = "error")]
    Error { message: String },

    /// Pong response (daemon is alive)
    #[serde(rename = "pong")]
    Pong,

    /// Shutdown acknowledgment
    #[serde(rename = "goodbye")]
    Goodbye,
}

impl Response {
    pub fn ok<T: Serialize>(data: T) -> Self {
        Response::Ok {
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error { message: msg.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request = Request::Reparse {
            project: PathBuf::from("/src/app"),
            file: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"command":"parse","project":"/src/app"}"#);

        let parsed: Request =
            serde_json::from_str(r#"{"command":"match","project":"/src/app","prefix":"vec"}"#).unwrap();
        assert_eq!(
            parsed,
            Request::Match {
                project: PathBuf::from("/src/app"),
                prefix: "vec".to_string(),
                limit: 20,
            }
        );
    }

    #[test]
    fn test_parse_current_file_wire_format() {
        let line = r#"{"command":"parse_current_file","project":"/src/app","invocation":"[\"clang++\",\"-c\",\"a.cpp\"]","file":"/src/app/a.cpp","content":"int x;\n"}"#;
        let parsed: Request = serde_json::from_str(line).unwrap();
        let expected = Request::ParseCurrentFile {
            project: PathBuf::from("/src/app"),
            invocation: r#"["clang++","-c","a.cpp"]"#.to_string(),
            file: PathBuf::from("/src/app/a.cpp"),
            content: "int x;\n".to_string(),
        };
        assert_eq!(parsed, expected);

        let json = serde_json::to_value(&expected).unwrap();
        assert_eq!(json["command"], "parse_current_file");
        assert_eq!(json["invocation"], r#"["clang++","-c","a.cpp"]"#);
    }

    #[test]
    fn test_response_wire_format() {
        let json = serde_json::to_string(&Response::ok(3)).unwrap();
        assert_eq!(json, r#"{"status":"ok","data":3}"#);
        let json = serde_json::to_string(&Response::error("boom")).unwrap();
        assert_eq!(json, r#"{"status":"error","message":"boom"}"#);
    }
}
