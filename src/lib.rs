//! # ctrlk
//!
//! Background indexing for C/C++ source trees, with live-edit symbol
//! resolution for editors.
//!
//! A [`Project`] is registered once per source tree. It reads the
//! tree's `compile_commands.json`, keeps a persistent symbol index up to
//! date through a background bulk indexer, and holds parsed ASTs of the
//! buffers an editor has open so that "what is under my cursor" and
//! "which scope is this line in" are answered without a reparse.
//!
//! ## Key Features
//!
//! - **Incremental**: only sources whose files or headers changed are reindexed
//! - **Header aware**: a changed header reindexes the source that includes it
//! - **Live buffers**: unsaved editor content is parsed on a dedicated worker
//! - **Persistent**: the index survives restarts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ctrlk::ProjectRegistry;
//! use std::path::Path;
//!
//! let registry = ProjectRegistry::new();
//! let project = registry
//!     .register(Path::new("."), Path::new("/usr/lib/llvm-17/lib"))
//!     .unwrap();
//!
//! // Queue every stale translation unit, then wait for the index.
//! project.reparse(None).unwrap();
//! project.wait_until_idle();
//! println!("{:?}", project.match_names("Vec", 10));
//! ```

pub mod ast;
pub mod clock;
pub mod compdb;
pub mod config;
pub mod daemon;
pub mod error;
pub mod indexer;
pub mod project;
pub mod registry;
pub mod resolve;
pub mod session;
pub mod store;

// Re-exports for convenience
pub use error::{CtrlkError, Result};

pub use ast::{Cursor, CursorKind, ParseOptions, TranslationUnit};
pub use compdb::CompilationDatabase;
pub use config::Config;
pub use indexer::{BulkIndexer, Indexer, ParseJob};
pub use project::{Environment, FileArgs, Project, ScanReport};
pub use registry::ProjectRegistry;
pub use resolve::{compute_scope_table, usr_under_cursor, SymbolLocation};
pub use session::{LiveEditCache, LiveSession};
pub use store::IndexStore;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_parse_cpp_code() {
        // Parse a C++ source string through the full query pipeline
        let source = r#"#include <string>

namespace net {

class Socket {
public:
    int open(int port);
    void close();
private:
    int fd_;
};

int Socket::open(int port) {
    fd_ = port;
    return fd_;
}

}  // namespace net

int main() {
    net::Socket socket;
    return socket.open(8080);
}
"#;
        let tu = TranslationUnit::from_source(
            PathBuf::from("/work/net.cpp"),
            source.to_string(),
            vec!["clang++".to_string(), "-c".to_string(), "net.cpp".to_string()],
            ParseOptions::default(),
        )
        .unwrap();

        let names: Vec<&str> = tu.declarations().map(|d| d.name()).collect();
        assert!(names.contains(&"net"), "Should find namespace net");
        assert!(names.contains(&"Socket"), "Should find class Socket");
        assert!(names.contains(&"open"), "Should find method open");
        assert!(names.contains(&"fd_"), "Should find field fd_");
        assert!(names.contains(&"main"), "Should find fn main");

        let scopes = compute_scope_table(tu.cursor());
        assert_eq!(scopes[4], "net");
        assert_eq!(scopes[6], "net::Socket");
        assert_eq!(scopes[14], "net::open");
        assert_eq!(scopes[21], "main");

        // `Socket` in `net::Socket socket;`
        let found = usr_under_cursor(&tu, 21, 10).unwrap();
        assert_eq!(found.usr, "c:@N@net@S@Socket");
        assert_eq!(found.line, 5);

        // `open` in `socket.open(8080)`
        let found = usr_under_cursor(&tu, 22, 19).unwrap();
        assert_eq!(found.usr, "c:@N@net@S@Socket@F@open#");
    }
}
