//! The typed value bridge.
//!
//! A [`Value`] owns one handle to a datum living inside a [`Session`].  Its
//! [`Kind`] is derived from the datum on demand: tables are classified as
//! List, Map or Object every time they are inspected, so a List that gains a
//! string key becomes a Map.
//!
//! Ownership follows Rust moves.  Transfer operations ([`Value::append`],
//! [`Value::set_by_index`], [`Value::set_by_key`], [`Value::set_property`],
//! [`Context::bind`](crate::Context::bind)) consume their argument; every
//! read returns a new, independently owned `Value`.  Dropping a `Value`
//! releases its handle.
//!
//! Host keys are zero-based.  Index `k` addresses table key `k + 1`.

mod coerce;
mod host;
mod kind;

use std::fmt;

use mlua::prelude::*;

pub use host::{HostValue, Key};
pub use kind::{Kind, Scalar};

use crate::error::{Error, Result};
use crate::session::Session;

/// Forward-only iteration state.
struct Cursor {
    keys: Vec<LuaValue>,
    pos: usize,
}

/// One interpreter datum plus the session it belongs to.
pub struct Value {
    datum: LuaValue,
    session: Session,
    cursor: Option<Cursor>,
}

impl Value {
    /// Wrap a datum, rejecting kinds the bridge cannot represent.
    pub(crate) fn new(session: &Session, datum: LuaValue) -> Result<Value> {
        session.classify(&datum)?;
        Ok(Value::from_parts(session.clone(), datum))
    }

    pub(crate) fn from_parts(session: Session, datum: LuaValue) -> Value {
        Value {
            datum,
            session,
            cursor: None,
        }
    }

    /// Give up ownership of the native datum.
    pub(crate) fn into_datum(self) -> LuaValue {
        self.datum
    }

    pub(crate) fn datum(&self) -> &LuaValue {
        &self.datum
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn kind(&self) -> Kind {
        self.session.classify(&self.datum).unwrap_or(Kind::Null)
    }

    pub fn is_null(&self) -> bool {
        self.datum.is_nil()
    }

    fn table(&self) -> Option<&LuaTable> {
        match &self.datum {
            LuaValue::Table(t) => Some(t),
            _ => None,
        }
    }

    fn sibling(&self, datum: LuaValue) -> Result<Value> {
        Value::new(&self.session, datum)
    }

    // ── Size and keys ────────────────────────────────────────────────────────

    /// Entry count of a List, Map or Object; 0 for Null; 1 for any scalar.
    ///
    /// A table that cannot be walked counts as empty, never partially.
    pub fn size(&self) -> usize {
        match &self.datum {
            LuaValue::Nil => 0,
            LuaValue::Table(t) => {
                let mut n = 0;
                t.for_each::<LuaValue, LuaValue>(|_, _| {
                    n += 1;
                    Ok(())
                })
                .map_or(0, |()| n)
            }
            LuaValue::UserData(_) => 0,
            _ => 1,
        }
    }

    /// The keys of this value as a List, in iteration order.
    ///
    /// Scalars have the single key `0`; Null has none.
    pub fn keys(&self) -> Result<Value> {
        let keys: Vec<LuaValue> = match &self.datum {
            LuaValue::Nil | LuaValue::UserData(_) => Vec::new(),
            LuaValue::Table(_) => self.raw_keys()?.into_iter().map(host_key).collect(),
            _ => vec![LuaValue::Integer(0)],
        };
        self.session.list_from(keys)
    }

    /// Raw table keys in visiting order: ascending for Lists, `next` order
    /// otherwise.
    fn raw_keys(&self) -> Result<Vec<LuaValue>> {
        let Some(table) = self.table() else {
            return Ok(Vec::new());
        };
        if self.kind() == Kind::List {
            let len = i64::try_from(table.raw_len()).unwrap_or(i64::MAX);
            return Ok((1..=len).map(LuaValue::Integer).collect());
        }
        let mut keys = Vec::new();
        table.for_each::<LuaValue, LuaValue>(|k, _| {
            keys.push(k);
            Ok(())
        })?;
        Ok(keys)
    }

    // ── Cursor ───────────────────────────────────────────────────────────────

    /// Rewind the cursor to the first entry.
    pub fn reset_cursor(&mut self) -> Result<()> {
        let keys = self.raw_keys()?;
        self.cursor = Some(Cursor { keys, pos: 0 });
        Ok(())
    }

    /// The next entry's value, or Null once the cursor is exhausted.
    ///
    /// A scalar yields a copy of itself on every call.
    pub fn next_value(&mut self) -> Result<Value> {
        let Some(table) = self.table().cloned() else {
            return Ok(match self.datum {
                LuaValue::Nil | LuaValue::UserData(_) => self.session.create_null(),
                _ => self.clone(),
            });
        };
        if self.cursor.is_none() {
            self.reset_cursor()?;
        }
        let key = match self.cursor.as_mut() {
            Some(cursor) if cursor.pos < cursor.keys.len() => {
                cursor.pos += 1;
                cursor.keys[cursor.pos - 1].clone()
            }
            _ => return Ok(self.session.create_null()),
        };
        self.sibling(table.raw_get(key)?)
    }

    // ── Element access ───────────────────────────────────────────────────────

    /// Element at a zero-based index; Null when absent.
    ///
    /// A scalar answers index 0 with a copy of itself.
    pub fn get_by_index(&self, index: i64) -> Result<Value> {
        match &self.datum {
            LuaValue::Table(t) => match index.checked_add(1) {
                Some(key) => self.sibling(t.raw_get(key)?),
                None => Ok(self.session.create_null()),
            },
            LuaValue::Nil | LuaValue::UserData(_) => Ok(self.session.create_null()),
            _ if index == 0 => Ok(self.clone()),
            _ => Ok(self.session.create_null()),
        }
    }

    /// Element or property under a string key; Null when absent.
    pub fn get_by_key(&self, key: &str) -> Result<Value> {
        match self.table() {
            Some(t) => self.sibling(t.raw_get(key)?),
            None => Ok(self.session.create_null()),
        }
    }

    // ── Mutation ─────────────────────────────────────────────────────────────

    /// Append after the highest integer key.
    pub fn append(&self, value: Value) -> Result<()> {
        let table = self.collection("list or map")?;
        self.session.check_owned(&value)?;
        let next = next_index(table)?;
        table.raw_set(next, value.into_datum())?;
        Ok(())
    }

    /// Store `value` at a zero-based index.  Storing Null removes the entry.
    pub fn set_by_index(&self, index: i64, value: Value) -> Result<()> {
        let table = self.collection("list or map")?;
        self.session.check_owned(&value)?;
        table.raw_set(script_key(index), value.into_datum())?;
        Ok(())
    }

    /// Store `value` under a string key.  Storing Null removes the entry.
    pub fn set_by_key(&self, key: &str, value: Value) -> Result<()> {
        let table = self.collection("list or map")?;
        self.session.check_owned(&value)?;
        table.raw_set(key, value.into_datum())?;
        Ok(())
    }

    /// Store a property on an Object's property bag.
    pub fn set_property(&self, key: &str, value: Value) -> Result<()> {
        let kind = self.kind();
        let table = match self.table() {
            Some(t) if kind == Kind::Object => t,
            _ => {
                return Err(Error::KindMismatch {
                    expected: "object",
                    found: kind,
                })
            }
        };
        self.session.check_owned(&value)?;
        table.raw_set(key, value.into_datum())?;
        Ok(())
    }

    fn collection(&self, expected: &'static str) -> Result<&LuaTable> {
        let kind = self.kind();
        match self.table() {
            Some(t) if matches!(kind, Kind::List | Kind::Map) => Ok(t),
            _ => Err(Error::KindMismatch {
                expected,
                found: kind,
            }),
        }
    }

    // ── Views ────────────────────────────────────────────────────────────────

    /// Every element in iteration order.  Scalars become a one-element
    /// sequence, Null an empty one.
    pub fn values(&self) -> Result<Vec<Value>> {
        match &self.datum {
            LuaValue::Table(t) => self
                .raw_keys()?
                .into_iter()
                .map(|k| self.sibling(t.raw_get(k)?))
                .collect(),
            LuaValue::Nil | LuaValue::UserData(_) => Ok(Vec::new()),
            _ => Ok(vec![self.clone()]),
        }
    }

    /// Every `(key, value)` pair in iteration order.  Scalars become
    /// `{0: value}`.
    pub fn entries(&self) -> Result<Vec<(Key, Value)>> {
        match &self.datum {
            LuaValue::Table(t) => self
                .raw_keys()?
                .into_iter()
                .map(|k| {
                    let value = self.sibling(t.raw_get(k.clone())?)?;
                    Ok((self.host_key_of(k)?, value))
                })
                .collect(),
            LuaValue::Nil | LuaValue::UserData(_) => Ok(Vec::new()),
            _ => Ok(vec![(Key::Index(0), self.clone())]),
        }
    }

    fn host_key_of(&self, key: LuaValue) -> Result<Key> {
        match host_key(key) {
            LuaValue::Integer(i) => Ok(Key::Index(i)),
            LuaValue::String(s) => Ok(Key::Name(String::from(s.to_string_lossy()))),
            other @ (LuaValue::Number(_) | LuaValue::Boolean(_)) => {
                let name = self.sibling(other)?.as_string();
                Ok(Key::Name(name))
            }
            other => Err(Error::UnsupportedValueType(other.type_name())),
        }
    }
}

impl Clone for Value {
    /// Another handle to the same datum, with a fresh cursor.
    fn clone(&self) -> Self {
        Value::from_parts(self.session.clone(), self.datum.clone())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Kind::Long => write!(f, "Long({})", self.as_long()),
            Kind::Double => write!(f, "Double({})", self.as_double()),
            Kind::Bool => write!(f, "Bool({})", self.as_bool()),
            Kind::String => write!(f, "String({:?})", self.as_string()),
            kind => write!(f, "{kind:?}(size {})", self.size()),
        }
    }
}

/// Table key → host key (integers shift down by one).
fn host_key(key: LuaValue) -> LuaValue {
    match key {
        LuaValue::Integer(i) => i
            .checked_sub(1)
            .map_or(LuaValue::Integer(i), LuaValue::Integer),
        other => other,
    }
}

/// Host index → table key.
fn script_key(index: i64) -> LuaValue {
    match index.checked_add(1) {
        Some(key) => LuaValue::Integer(key),
        None => LuaValue::Number(index as f64 + 1.0),
    }
}

/// One past the highest positive integer key.
fn next_index(table: &LuaTable) -> LuaResult<i64> {
    let mut max: i64 = 0;
    table.for_each::<LuaValue, LuaValue>(|k, _| {
        if let LuaValue::Integer(i) = k {
            max = max.max(i);
        }
        Ok(())
    })?;
    Ok(max.saturating_add(1))
}
