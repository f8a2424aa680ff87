//! Host callbacks for script output, logging and response headers.
//!
//! A [`Context`](crate::Context) routes every `print`/`echo`, `error_log` and
//! `header` call made by its scripts to the [`Host`] it was created with.
//! [`BufferedHost`] records everything in memory; [`StdioHost`] is the
//! command-line flavour.

use std::cell::RefCell;
use std::io::Write;

use indexmap::IndexMap;

/// Callbacks the embedding application implements for a context.
pub trait Host {
    /// Receive script output. Returns the number of bytes accepted.
    fn write(&self, bytes: &[u8]) -> usize;

    /// Receive a log line (uncaught errors, `error_log`).
    fn log(&self, message: &str);

    /// Receive a header mutation. `header` is the raw `Name: value` line for
    /// [`HeaderOp::Add`]/[`HeaderOp::Replace`] and the bare name for
    /// [`HeaderOp::Delete`].
    fn set_header(&self, op: HeaderOp, header: &str);
}

/// How a header line changes the header set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderOp {
    Add,
    Replace,
    Delete,
}

// ── Headers ───────────────────────────────────────────────────────────────────

/// Multi-valued header map with case-insensitive, canonicalised names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: IndexMap<String, Vec<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a raw header line.
    ///
    /// The line is split at the first `:` and both halves trimmed. Add and
    /// Replace ignore lines without a value; Delete only needs the name.
    pub fn apply(&mut self, op: HeaderOp, line: &str) {
        let mut parts = line.splitn(2, ':').map(str::trim);
        let name = parts.next().unwrap_or_default();
        let value = parts.next().filter(|v| !v.is_empty());

        if name.is_empty() {
            return;
        }

        match (op, value) {
            (HeaderOp::Replace, Some(value)) => self.set(name, value),
            (HeaderOp::Add, Some(value)) => self.add(name, value),
            (HeaderOp::Delete, _) => self.remove(name),
            _ => {}
        }
    }

    /// Replace all values of `name` with `value`.
    pub fn set(&mut self, name: &str, value: &str) {
        self.entries.insert(canonical_name(name), vec![value.to_owned()]);
    }

    /// Append `value` to the values of `name`.
    pub fn add(&mut self, name: &str, value: &str) {
        self.entries
            .entry(canonical_name(name))
            .or_default()
            .push(value.to_owned());
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.shift_remove(&canonical_name(name));
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&canonical_name(name))
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// Every value of `name`, in the order they were added.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&canonical_name(name))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Canonical header name: `x-request-id` → `X-Request-Id`.
fn canonical_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for ch in name.chars() {
        if upper {
            out.extend(ch.to_uppercase());
        } else {
            out.extend(ch.to_lowercase());
        }
        upper = ch == '-';
    }
    out
}

// ── BufferedHost ──────────────────────────────────────────────────────────────

/// A [`Host`] that keeps output, log lines and headers in memory.
#[derive(Debug, Default)]
pub struct BufferedHost {
    output: RefCell<Vec<u8>>,
    log: RefCell<Vec<String>>,
    headers: RefCell<Headers>,
}

impl BufferedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output written so far, decoded lossily.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.output.borrow()).into_owned()
    }

    /// Drain and return the output written so far.
    pub fn take_output(&self) -> String {
        let bytes = std::mem::take(&mut *self.output.borrow_mut());
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn log_lines(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn take_log(&self) -> Vec<String> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    pub fn headers(&self) -> Headers {
        self.headers.borrow().clone()
    }
}

impl Host for BufferedHost {
    fn write(&self, bytes: &[u8]) -> usize {
        self.output.borrow_mut().extend_from_slice(bytes);
        bytes.len()
    }

    fn log(&self, message: &str) {
        self.log.borrow_mut().push(message.to_owned());
    }

    fn set_header(&self, op: HeaderOp, header: &str) {
        self.headers.borrow_mut().apply(op, header);
    }
}

// ── StdioHost ─────────────────────────────────────────────────────────────────

/// A [`Host`] writing output to stdout and log lines to stderr.
///
/// Output is flushed on every write; headers are only collected.
#[derive(Debug, Default)]
pub struct StdioHost {
    headers: RefCell<Headers>,
}

impl StdioHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn headers(&self) -> Headers {
        self.headers.borrow().clone()
    }
}

impl Host for StdioHost {
    fn write(&self, bytes: &[u8]) -> usize {
        let mut out = std::io::stdout().lock();
        match out.write_all(bytes).and_then(|()| out.flush()) {
            Ok(()) => bytes.len(),
            Err(_) => 0,
        }
    }

    fn log(&self, message: &str) {
        eprintln!("{}", message.trim_end());
    }

    fn set_header(&self, op: HeaderOp, header: &str) {
        self.headers.borrow_mut().apply(op, header);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
