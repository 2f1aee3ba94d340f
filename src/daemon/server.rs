//! Daemon server: Unix socket server that handles client requests.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use crate::registry::ProjectRegistry;

use super::protocol::{Request, Response};

/// What `current_scope` answers for a line outside every named scope.
pub const NO_SCOPE: &str = "(no scope)";

/// Default socket path, one per user.
pub fn default_socket_path() -> PathBuf {
    let dir = std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir);
    // SAFETY: getuid has no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    dir.join(format!("ctrlk-{}.sock", uid))
}

/// PID file that sits next to the socket.
pub fn pid_path(socket: &Path) -> PathBuf {
    socket.with_extension("pid")
}

/// Start the daemon server and block until a shutdown request.
pub fn start_daemon(socket: &Path, registry: Arc<ProjectRegistry>) -> Result<()> {
    let pid_file = pid_path(socket);

    if let Some(parent) = socket.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Remove stale socket if exists
    if socket.exists() {
        std::fs::remove_file(socket)?;
    }

    std::fs::write(&pid_file, std::process::id().to_string())?;

    let listener = UnixListener::bind(socket)
        .with_context(|| format!("binding {}", socket.display()))?;
    info!(socket = %socket.display(), "daemon listening");

    let shutdown = Arc::new(AtomicBool::new(false));

    for stream in listener.incoming() {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        match stream {
            Ok(stream) => {
                let registry = Arc::clone(&registry);
                let shutdown = Arc::clone(&shutdown);
                let socket = socket.to_path_buf();

                thread::spawn(move || {
                    if let Err(e) = handle_client(stream, &registry, &shutdown) {
                        debug!(error = %e, "client handler error");
                    }
                    if shutdown.load(Ordering::Acquire) {
                        // Wake the accept loop so it sees the flag.
                        let _ = UnixStream::connect(&socket);
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "accept error");
            }
        }
    }

    info!("daemon shutting down, waiting for indexers");
    registry.wait_until_idle();
    let _ = std::fs::remove_file(socket);
    let _ = std::fs::remove_file(&pid_file);

    Ok(())
}

/// Handle a single client connection.
fn handle_client(stream: UnixStream, registry: &ProjectRegistry, shutdown: &AtomicBool) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;

    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Ok(());
    }

    let response = match serde_json::from_str::<Request>(&line) {
        Ok(request) => {
            debug!(?request, "received request");
            process_request(request, registry, shutdown)
        }
        Err(e) => {
            warn!(error = %e, "malformed request");
            Response::error(format!("malformed request: {}", e))
        }
    };

    let response_json = serde_json::to_string(&response)?;
    writeln!(writer, "{}", response_json)?;

    Ok(())
}

/// Process a request and return a response.
pub fn process_request(request: Request, registry: &ProjectRegistry, shutdown: &AtomicBool) -> Response {
    macro_rules! project {
        ($path:expr) => {
            match registry.get(&$path) {
                Ok(project) => project,
                Err(e) => return Response::error(e.to_string()),
            }
        };
    }

    match request {
        Request::Ping => Response::Pong,

        Request::Shutdown => {
            shutdown.store(true, Ordering::Release);
            Response::Goodbye
        }

        Request::Register {
            project_root,
            library_path,
        } => match registry.register(&project_root, &library_path) {
            Ok(project) => Response::ok(serde_json::json!({
                "project_root": project.root(),
                "builtin_header_path": project.builtin_include_path(),
            })),
            Err(e) => Response::error(e.to_string()),
        },

        Request::Reparse { project, file } => {
            let project = project!(project);
            match project.reparse(file.as_deref()) {
                Ok(report) => Response::ok(report),
                Err(e) => Response::error(e.to_string()),
            }
        }

        Request::QueueSize { project } => Response::ok(project!(project).pending_job_count()),

        Request::Wait { project } => {
            let project = project!(project);
            project.wait_until_idle();
            Response::ok(project.pending_job_count())
        }

        Request::Search { project, starts_with } => Response::ok(project!(project).search(&starts_with)),

        Request::Match { project, prefix, limit } => {
            Response::ok(project!(project).match_names(&prefix, limit))
        }

        Request::BuiltinHeaderPath { project } => Response::ok(project!(project).builtin_include_path()),

        Request::FileArgs { project, file } => match project!(project).file_args(&file) {
            Ok(found) => Response::ok(found),
            Err(e) => Response::error(e.to_string()),
        },

        Request::ParseCurrentFile {
            project,
            invocation,
            file,
            content,
        } => match project!(project).submit_live_parse(&invocation, &file, content) {
            Ok(()) => Response::ok(serde_json::Value::Null),
            Err(e) => Response::error(e.to_string()),
        },

        Request::UnloadCurrentFile { project, file } => Response::ok(project!(project).unload_live(&file)),

        Request::UsrUnderCursor {
            project,
            file,
            line,
            column,
        } => Response::ok(project!(project).resolve_symbol_at(&file, line, column)),

        Request::CurrentScope { project, file, line } => Response::ok(
            project!(project)
                .scope_at(&file, line)
                .unwrap_or_else(|| NO_SCOPE.to_string()),
        ),
    }
}

/// Check if daemon is running by checking PID file and process.
pub fn is_daemon_running(socket: &Path) -> bool {
    let pid_file = pid_path(socket);

    if !pid_file.exists() {
        return false;
    }

    if let Ok(pid_str) = std::fs::read_to_string(&pid_file) {
        if let Ok(pid) = pid_str.trim().parse::<i32>() {
            // Signal 0 only checks that the process exists.
            unsafe {
                return libc::kill(pid, 0) == 0;
            }
        }
    }

    false
}

/// Send a request to the daemon and get a response.
pub fn send_request(socket: &Path, request: &Request) -> Result<Response> {
    let mut stream = UnixStream::connect(socket)
        .with_context(|| format!("connecting to {}", socket.display()))?;

    let request_json = serde_json::to_string(request)?;
    writeln!(stream, "{}", request_json)?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: Response = serde_json::from_str(&response_line)?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_and_shutdown() {
        let registry = ProjectRegistry::new();
        let shutdown = AtomicBool::new(false);
        assert_eq!(process_request(Request::Ping, &registry, &shutdown), Response::Pong);
        assert!(!shutdown.load(Ordering::Acquire));
        assert_eq!(process_request(Request::Shutdown, &registry, &shutdown), Response::Goodbye);
        assert!(shutdown.load(Ordering::Acquire));
    }

    #[test]
    fn test_unknown_project_is_error() {
        let registry = ProjectRegistry::new();
        let shutdown = AtomicBool::new(false);
        let response = process_request(
            Request::QueueSize {
                project: PathBuf::from("/nowhere"),
            },
            &registry,
            &shutdown,
        );
        match response {
            Response::Error { message } => assert!(message.contains("/nowhere")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_register_without_manifest_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ProjectRegistry::new();
        let shutdown = AtomicBool::new(false);
        let response = process_request(
            Request::Register {
                project_root: dir.path().to_path_buf(),
                library_path: dir.path().to_path_buf(),
            },
            &registry,
            &shutdown,
        );
        assert!(matches!(response, Response::Error { .. }));
        assert!(registry.roots().is_empty());
    }

    #[test]
    fn test_pid_path_next_to_socket() {
        assert_eq!(pid_path(Path::new("/run/user/1/ctrlk-1.sock")), PathBuf::from("/run/user/1/ctrlk-1.pid"));
    }
}
