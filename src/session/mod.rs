//! Live-edit sessions: parsed ASTs of buffers currently open in an editor.
//!
//! Parse requests go through one FIFO channel to a single worker thread,
//! so at most one live parse runs at a time and requests for the same
//! buffer land in submission order. Readers only touch the session map,
//! never the worker.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

use crate::ast::{self, sanitize_buffer, ParseOptions, TranslationUnit, UnsavedFile};
use crate::clock::Clock;
use crate::error::Result;
use crate::resolve::{compute_scope_table, usr_under_cursor, SymbolLocation};

/// How long a session lives after its last successful parse.
const SESSION_TTL_HOURS: i64 = 10;

/// One parsed buffer with its derived scope table.
#[derive(Debug)]
pub struct LiveSession {
    tu: TranslationUnit,
    expires_at: DateTime<Utc>,
    scopes: Vec<String>,
}

impl LiveSession {
    pub fn translation_unit(&self) -> &TranslationUnit {
        &self.tu
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Scope label of a 1-based line, `None` when the line is in no named scope.
    pub fn scope_at(&self, line: usize) -> Option<&str> {
        self.scopes
            .get(line)
            .map(String::as_str)
            .filter(|label| !label.is_empty())
    }

    pub fn usr_at(&self, line: usize, column: usize) -> Option<SymbolLocation> {
        usr_under_cursor(&self.tu, line, column)
    }
}

#[derive(Debug)]
struct ParseRequest {
    args: Vec<String>,
    file: PathBuf,
    content: String,
}

#[derive(Debug)]
enum WorkItem {
    Parse(ParseRequest),
    /// Answered once every item queued before it has been handled.
    Flush(Sender<()>),
}

type SessionMap = Arc<RwLock<HashMap<PathBuf, Arc<LiveSession>>>>;

/// Front end the worker parses buffers with.
pub type ParseFn = fn(&[String], &[UnsavedFile<'_>], ParseOptions) -> Result<TranslationUnit>;

pub struct LiveEditCache {
    sessions: SessionMap,
    sender: Option<Sender<WorkItem>>,
    worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for LiveEditCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveEditCache")
            .field("sessions", &self.session_count())
            .finish()
    }
}

impl LiveEditCache {
    /// Start the cache and its parse worker.
    pub fn start(clock: Arc<dyn Clock>) -> Result<Self> {
        Self::start_with_parser(clock, ast::parse)
    }

    /// Like [`LiveEditCache::start`], parsing with `parser`.
    pub fn start_with_parser(clock: Arc<dyn Clock>, parser: ParseFn) -> Result<Self> {
        let sessions: SessionMap = Arc::new(RwLock::new(HashMap::new()));
        let (sender, receiver) = mpsc::channel();

        let worker_sessions = Arc::clone(&sessions);
        let worker = thread::Builder::new()
            .name("ctrlk-live-parse".to_string())
            .spawn(move || run_worker(receiver, worker_sessions, clock, parser))?;

        Ok(Self {
            sessions,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    /// Queue a reparse of `file` from an unsaved buffer. Never blocks on the parse.
    pub fn submit_parse(&self, args: Vec<String>, file: PathBuf, content: String) {
        let request = ParseRequest { args, file, content };
        let sent = self
            .sender
            .as_ref()
            .map(|sender| sender.send(WorkItem::Parse(request)).is_ok())
            .unwrap_or(false);
        if !sent {
            warn!("live parse worker is gone, request dropped");
        }
    }

    /// Block until every request queued so far has been processed.
    pub fn sync(&self) {
        let Some(sender) = &self.sender else {
            return;
        };
        let (done, wait) = mpsc::channel();
        if sender.send(WorkItem::Flush(done)).is_ok() {
            let _ = wait.recv();
        }
    }

    pub fn get_session(&self, file: &Path) -> Option<Arc<LiveSession>> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(file).cloned()
    }

    /// Drop the session for `file`, expired or not.
    pub fn unload(&self, file: &Path) -> bool {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(file).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl Drop for LiveEditCache {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(receiver: Receiver<WorkItem>, sessions: SessionMap, clock: Arc<dyn Clock>, parser: ParseFn) {
    debug!("live parse worker started");
    for item in receiver {
        match item {
            WorkItem::Parse(request) => {
                evict_expired(&sessions, clock.now());
                parse_into(&sessions, clock.as_ref(), parser, request);
            }
            WorkItem::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("live parse worker stopped");
}

fn evict_expired(sessions: &SessionMap, now: DateTime<Utc>) {
    let mut sessions = sessions.write().unwrap_or_else(|e| e.into_inner());
    let before = sessions.len();
    sessions.retain(|_, session| session.expires_at > now);
    let evicted = before - sessions.len();
    if evicted > 0 {
        info!(evicted, "expired live sessions evicted");
    }
}

fn parse_into(sessions: &SessionMap, clock: &dyn Clock, parser: ParseFn, request: ParseRequest) {
    let content = sanitize_buffer(&request.content);
    let unsaved = [UnsavedFile {
        path: &request.file,
        content: &content,
    }];
    let tu = match parser(&request.args, &unsaved, ParseOptions::default()) {
        Ok(tu) => tu,
        Err(e) => {
            warn!(file = %request.file.display(), error = %e, "live parse failed, keeping previous session");
            return;
        }
    };

    let scopes = tu
        .cursor_for_file(&request.file)
        .map(compute_scope_table)
        .unwrap_or_default();
    let session = Arc::new(LiveSession {
        tu,
        expires_at: clock.now() + Duration::hours(SESSION_TTL_HOURS),
        scopes,
    });

    let mut sessions = sessions.write().unwrap_or_else(|e| e.into_inner());
    sessions.insert(request.file.clone(), session);
    debug!(file = %request.file.display(), "live session stored");
}
