//! Engine configuration (`engine.ini`).
//!
//! The format is a flat list of `key = value` settings:
//!
//! | Key                    | Value                                         |
//! |------------------------|-----------------------------------------------|
//! | `libraries`            | comma-separated standard libraries to load    |
//! | `memory_limit`         | bytes per session, `K`/`M`/`G` suffix, `0` = unlimited |
//! | `chunk_name`           | name reported for eval fragments              |
//! | `register_environment` | populate the `ENV` table (`1`/`0`, `on`/`off`) |
//! | `log_errors`           | forward uncaught errors to the host log       |
//! | Lines starting with `;` or `#` | comment, ignored                      |
//!
//! Built-in defaults live in [`DEFAULT_INI`] and are applied before any user
//! file, which only needs to list the settings it changes.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use mlua::StdLib;

use crate::error::Result;

/// Defaults applied to every engine before user settings.
pub const DEFAULT_INI: &str = "\
; hostlua engine defaults
libraries = coroutine, table, string, utf8, math, os, io
memory_limit = 0
chunk_name = hostlua-engine
register_environment = 1
log_errors = 1
";

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "HOSTLUA_INI";

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading a config file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// A standard library that may be opened in each session.
///
/// The base library is always present and `debug` is never offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Library {
    Coroutine,
    Table,
    Io,
    Os,
    String,
    Utf8,
    Math,
    Package,
}

impl Library {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "coroutine" => Library::Coroutine,
            "table" => Library::Table,
            "io" => Library::Io,
            "os" => Library::Os,
            "string" => Library::String,
            "utf8" => Library::Utf8,
            "math" => Library::Math,
            "package" => Library::Package,
            _ => return None,
        })
    }

    fn std_lib(self) -> StdLib {
        match self {
            Library::Coroutine => StdLib::COROUTINE,
            Library::Table => StdLib::TABLE,
            Library::Io => StdLib::IO,
            Library::Os => StdLib::OS,
            Library::String => StdLib::STRING,
            Library::Utf8 => StdLib::UTF8,
            Library::Math => StdLib::MATH,
            Library::Package => StdLib::PACKAGE,
        }
    }
}

/// Settings shared by every context an engine starts.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub libraries: Vec<Library>,
    /// Per-session allocation limit in bytes; `None` means unlimited.
    pub memory_limit: Option<usize>,
    pub chunk_name: String,
    pub register_environment: bool,
    pub log_errors: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut config = EngineConfig {
            libraries: Vec::new(),
            memory_limit: None,
            chunk_name: String::new(),
            register_environment: false,
            log_errors: false,
        };
        config.apply_str(DEFAULT_INI);
        config
    }
}

impl EngineConfig {
    /// Parse settings on top of the built-in defaults.
    ///
    /// Bad lines are skipped and reported; the remaining settings still apply.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = EngineConfig::default();
        let errors = config.apply_str(s);
        (config, errors)
    }

    /// Read and parse a config file from disk.
    pub fn load_file(path: &Path) -> Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Load the user config if one exists, else the built-in defaults.
    pub fn discover() -> Result<(Self, Vec<ConfigError>)> {
        match config_path() {
            Some(path) if path.exists() => Self::load_file(&path),
            _ => Ok((Self::default(), Vec::new())),
        }
    }

    /// Apply `key = value` lines to `self`, returning per-line errors.
    pub fn apply_str(&mut self, s: &str) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                errors.push(ConfigError {
                    line: lineno,
                    message: format!("expected `key = value`, got `{line}`"),
                });
                continue;
            };

            if let Err(message) = self.apply_setting(key.trim(), value.trim()) {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        errors
    }

    /// The library set in the form the interpreter expects.
    pub(crate) fn std_libs(&self) -> StdLib {
        self.libraries
            .iter()
            .fold(StdLib::NONE, |libs, lib| libs | lib.std_lib())
    }

    pub fn has_library(&self, lib: Library) -> bool {
        self.libraries.contains(&lib)
    }

    fn apply_setting(&mut self, key: &str, value: &str) -> std::result::Result<(), String> {
        match key {
            "libraries" => self.libraries = parse_libraries(value)?,
            "memory_limit" => self.memory_limit = parse_size(value)?,
            "chunk_name" => {
                if value.is_empty() {
                    return Err("chunk_name must not be empty".to_owned());
                }
                self.chunk_name = value.to_owned();
            }
            "register_environment" => self.register_environment = parse_flag(key, value)?,
            "log_errors" => self.log_errors = parse_flag(key, value)?,
            _ => return Err(format!("unknown setting `{key}`")),
        }
        Ok(())
    }
}

// ── Value parsers ─────────────────────────────────────────────────────────────

fn parse_libraries(value: &str) -> std::result::Result<Vec<Library>, String> {
    let mut libs = Vec::new();
    for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        // base is implicit
        if name == "base" {
            continue;
        }
        let lib = Library::from_name(name).ok_or_else(|| format!("unknown library `{name}`"))?;
        if !libs.contains(&lib) {
            libs.push(lib);
        }
    }
    Ok(libs)
}

/// Parse a byte size such as `512K` or `64M`; zero or negative means no limit.
fn parse_size(value: &str) -> std::result::Result<Option<usize>, String> {
    let value = value.trim();
    let (digits, scale) = match value.char_indices().last() {
        Some((i, 'k' | 'K')) => (&value[..i], 1usize << 10),
        Some((i, 'm' | 'M')) => (&value[..i], 1usize << 20),
        Some((i, 'g' | 'G')) => (&value[..i], 1usize << 30),
        _ => (value, 1),
    };
    let n: i64 = digits
        .trim()
        .parse()
        .map_err(|_| format!("invalid size `{value}`"))?;
    if n <= 0 {
        return Ok(None);
    }
    let n = usize::try_from(n).map_err(|_| format!("size `{value}` is too large"))?;
    n.checked_mul(scale)
        .map(Some)
        .ok_or_else(|| format!("size `{value}` is too large"))
}

fn parse_flag(key: &str, value: &str) -> std::result::Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "on" | "yes" | "true" => Ok(true),
        "0" | "off" | "no" | "false" | "" => Ok(false),
        _ => Err(format!("`{key}` expects a boolean, got `{value}`")),
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Locate the user config file.
///
/// Priority: `$HOSTLUA_INI` → `<config dir>/hostlua/engine.ini`.
pub fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        return Some(PathBuf::from(p));
    }
    ProjectDirs::from("", "", "hostlua").map(|dirs| dirs.config_dir().join("engine.ini"))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
