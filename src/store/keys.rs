//! Key layout of the persistent index.
//!
//! Keys are `%%%`-separated. The `h` and `f` families are read by the
//! staleness scan and must keep their exact shape.

pub const SEPARATOR: &str = "%%%";

/// `h%%%<header>` → originating source file.
pub const HEADER_PREFIX: &str = "h%%%";
/// `f%%%<file>` → modification time (epoch seconds) recorded at index time.
pub const MTIME_PREFIX: &str = "f%%%";
/// `s%%%<name>%%%<usr>` → empty. Name index for prefix search.
pub const NAME_PREFIX: &str = "s%%%";
/// `u%%%<usr>%%%<file>%%%<line>%%%<col>` → cursor kind.
pub const USR_PREFIX: &str = "u%%%";
/// `o%%%<file>%%%<usr>%%%<line>%%%<col>` → name. What a file contributed.
pub const OWNER_PREFIX: &str = "o%%%";

pub fn header_key(header: &str) -> String {
    format!("{HEADER_PREFIX}{header}")
}

pub fn mtime_key(file: &str) -> String {
    format!("{MTIME_PREFIX}{file}")
}

pub fn name_key(name: &str, usr: &str) -> String {
    format!("{NAME_PREFIX}{name}{SEPARATOR}{usr}")
}

pub fn usr_key(usr: &str, file: &str, line: usize, column: usize) -> String {
    format!("{USR_PREFIX}{usr}{SEPARATOR}{file}{SEPARATOR}{line}{SEPARATOR}{column}")
}

pub fn owner_key(file: &str, usr: &str, line: usize, column: usize) -> String {
    format!("{OWNER_PREFIX}{file}{SEPARATOR}{usr}{SEPARATOR}{line}{SEPARATOR}{column}")
}

/// Prefix covering every `o%%%` key of one file.
pub fn owner_prefix(file: &str) -> String {
    format!("{OWNER_PREFIX}{file}{SEPARATOR}")
}

/// The `n`th `%%%`-separated part of `key`; part 0 is the family letter.
pub fn extract_part(key: &str, n: usize) -> Option<&str> {
    key.split(SEPARATOR).nth(n)
}
