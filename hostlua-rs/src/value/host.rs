//! Host-native value trees and their conversion to and from session values.

use std::fmt;

use indexmap::IndexMap;
use mlua::prelude::*;

use super::{Kind, Value};
use crate::error::{Error, Result};
use crate::session::Session;

/// Deepest nesting converted in either direction.
pub const MAX_DEPTH: usize = 128;

/// A zero-based index or a string key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Index(i64),
    Name(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{i}"),
            Key::Name(s) => f.write_str(s),
        }
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Index(i)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Name(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Name(s)
    }
}

/// An owned, interpreter-independent value tree.
///
/// Map equality ignores entry order.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Null,
    Long(i64),
    Double(f64),
    Bool(bool),
    String(String),
    List(Vec<HostValue>),
    Map(IndexMap<Key, HostValue>),
    Object(IndexMap<String, HostValue>),
}

impl HostValue {
    pub fn kind(&self) -> Kind {
        match self {
            HostValue::Null => Kind::Null,
            HostValue::Long(_) => Kind::Long,
            HostValue::Double(_) => Kind::Double,
            HostValue::Bool(_) => Kind::Bool,
            HostValue::String(_) => Kind::String,
            HostValue::List(_) => Kind::List,
            HostValue::Map(_) => Kind::Map,
            HostValue::Object(_) => Kind::Object,
        }
    }

    /// Build the native datum for this tree inside `session`.
    pub(crate) fn into_lua_datum(self, session: &Session, depth: usize) -> Result<LuaValue> {
        if depth > MAX_DEPTH {
            return Err(Error::NestingTooDeep(MAX_DEPTH));
        }
        let lua = session.lua();
        Ok(match self {
            HostValue::Null => LuaValue::Nil,
            HostValue::Long(v) => LuaValue::Integer(v),
            HostValue::Double(v) => LuaValue::Number(v),
            HostValue::Bool(v) => LuaValue::Boolean(v),
            HostValue::String(v) => LuaValue::String(lua.create_string(&v)?),
            HostValue::List(items) => {
                let table = lua.create_table()?;
                for (i, item) in items.into_iter().enumerate() {
                    table.raw_set(i + 1, item.into_lua_datum(session, depth + 1)?)?;
                }
                LuaValue::Table(table)
            }
            HostValue::Map(entries) => {
                let table = lua.create_table()?;
                for (key, item) in entries {
                    let datum = item.into_lua_datum(session, depth + 1)?;
                    match key {
                        Key::Index(i) => match i.checked_add(1) {
                            Some(k) => table.raw_set(k, datum)?,
                            // no room to shift, keep the number as text
                            None => table.raw_set(i.to_string(), datum)?,
                        },
                        Key::Name(name) => table.raw_set(name, datum)?,
                    }
                }
                LuaValue::Table(table)
            }
            HostValue::Object(props) => {
                let object = session.create_object()?.into_datum();
                if let LuaValue::Table(table) = &object {
                    for (name, item) in props {
                        table.raw_set(name, item.into_lua_datum(session, depth + 1)?)?;
                    }
                }
                object
            }
        })
    }
}

impl Value {
    /// Convert into an owned host tree.
    ///
    /// Fails with [`Error::NestingTooDeep`] on self-referencing tables.
    pub fn to_host(&self) -> Result<HostValue> {
        self.to_host_at(0)
    }

    fn to_host_at(&self, depth: usize) -> Result<HostValue> {
        if depth > MAX_DEPTH {
            return Err(Error::NestingTooDeep(MAX_DEPTH));
        }
        Ok(match self.kind() {
            Kind::Null => HostValue::Null,
            Kind::Long => HostValue::Long(self.as_long()),
            Kind::Double => HostValue::Double(self.as_double()),
            Kind::Bool => HostValue::Bool(self.as_bool()),
            Kind::String => HostValue::String(self.as_string()),
            Kind::List => HostValue::List(
                self.values()?
                    .iter()
                    .map(|v| v.to_host_at(depth + 1))
                    .collect::<Result<_>>()?,
            ),
            Kind::Map => HostValue::Map(
                self.entries()?
                    .into_iter()
                    .map(|(k, v)| Ok((k, v.to_host_at(depth + 1)?)))
                    .collect::<Result<_>>()?,
            ),
            Kind::Object => HostValue::Object(
                self.entries()?
                    .into_iter()
                    .map(|(k, v)| Ok((k.to_string(), v.to_host_at(depth + 1)?)))
                    .collect::<Result<_>>()?,
            ),
        })
    }
}

// ── Conversions from Rust values ──────────────────────────────────────────────

impl From<i64> for HostValue {
    fn from(v: i64) -> Self {
        HostValue::Long(v)
    }
}

impl From<i32> for HostValue {
    fn from(v: i32) -> Self {
        HostValue::Long(v.into())
    }
}

impl From<f64> for HostValue {
    fn from(v: f64) -> Self {
        HostValue::Double(v)
    }
}

impl From<bool> for HostValue {
    fn from(v: bool) -> Self {
        HostValue::Bool(v)
    }
}

impl From<&str> for HostValue {
    fn from(v: &str) -> Self {
        HostValue::String(v.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(v: String) -> Self {
        HostValue::String(v)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(HostValue::Null, Into::into)
    }
}

impl<T: Into<HostValue>> From<Vec<T>> for HostValue {
    fn from(items: Vec<T>) -> Self {
        HostValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<Key>, V: Into<HostValue>> From<IndexMap<K, V>> for HostValue {
    fn from(entries: IndexMap<K, V>) -> Self {
        HostValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
