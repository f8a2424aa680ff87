//! The single interpreter adapter.
//!
//! Everything the bridge needs from Lua goes through [`Session`]: state
//! creation, chunk compilation and execution, classification of native data
//! and global binding.  The rest of the crate never inspects interpreter
//! internals directly.
//!
//! | Primitive          | Meaning                                          |
//! |--------------------|--------------------------------------------------|
//! | `compile`          | source bytes → callable chunk                    |
//! | `execute`          | run a chunk, keep its first return value         |
//! | `classify`         | native datum → [`Kind`]                          |
//! | `bind_symbol`      | set a global in the session                      |
//!
//! Host keys are zero-based; a host index `k` addresses table key `k + 1`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use mlua::prelude::*;
use mlua::LuaOptions;
use tracing::debug;

use crate::builtins;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::receiver::{self, ClassEntry};
use crate::value::{HostValue, Kind, Scalar, Value};

/// Largest array part pre-allocated for a capacity hint.
const MAX_PREALLOC: usize = 1 << 16;

/// Lua-side helpers compiled once per session.
const HELPERS: &str = r#"
local getmetatable, setmetatable, rawget = getmetatable, setmetatable, rawget
local pcall, tostring, type = pcall, tostring, type

local object_meta = { __name = "object" }
local helpers = {}

function helpers.new_object()
  return setmetatable({}, object_meta)
end

function helpers.has_metatable(t)
  return getmetatable(t) ~= nil
end

function helpers.stringify(v)
  local mt = getmetatable(v)
  if type(mt) ~= "table" or rawget(mt, "__tostring") == nil then
    return nil
  end
  local ok, s = pcall(tostring, v)
  if ok and type(s) == "string" then
    return s
  end
  return nil
end

function helpers.make_class(name, construct)
  return setmetatable({ new = construct }, {
    __name = name,
    __call = function(_, ...) return construct(...) end,
    __tostring = function() return name end,
  })
end

return helpers
"#;

struct Helpers {
    new_object: LuaFunction,
    has_metatable: LuaFunction,
    stringify: LuaFunction,
    make_class: LuaFunction,
}

pub(crate) struct SessionInner {
    // Lua handles are released before the state itself.
    helpers: Helpers,
    classes: RefCell<HashMap<String, (u64, LuaTable)>>,
    chunk_name: String,
    lua: Lua,
}

/// Weak back-reference stored in the Lua app data so callbacks can find
/// their session without keeping it alive.
struct SessionLink(Weak<SessionInner>);

/// One interpreter state and the factory for every [`Value`] living in it.
///
/// Cloning is cheap and yields another handle to the same state.  A session
/// is confined to the thread that opened it.
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("chunk_name", &self.inner.chunk_name)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a fresh interpreter state configured by `config`.
    ///
    /// Any failure while setting the state up is an allocation failure.
    pub(crate) fn open(config: &EngineConfig) -> Result<Session> {
        Self::build(config).map_err(|e| match e {
            Error::Allocation(_) => e,
            other => Error::Allocation(other.to_string()),
        })
    }

    fn build(config: &EngineConfig) -> Result<Session> {
        let lua = Lua::new_with(config.std_libs(), LuaOptions::new())
            .map_err(|e| Error::Allocation(e.to_string()))?;
        if let Some(limit) = config.memory_limit {
            lua.set_memory_limit(limit)
                .map_err(|e| Error::Allocation(e.to_string()))?;
        }

        let table: LuaTable = lua.load(HELPERS).set_name("=hostlua-helpers").eval()?;
        let helpers = Helpers {
            new_object: table.get("new_object")?,
            has_metatable: table.get("has_metatable")?,
            stringify: table.get("stringify")?,
            make_class: table.get("make_class")?,
        };

        let inner = Rc::new(SessionInner {
            helpers,
            classes: RefCell::new(HashMap::new()),
            chunk_name: config.chunk_name.clone(),
            lua,
        });
        inner.lua.set_app_data(SessionLink(Rc::downgrade(&inner)));

        let session = Session { inner };
        builtins::register(&session, config)?;
        debug!(chunk_name = %config.chunk_name, "session opened");
        Ok(session)
    }

    /// Recover the session owning `lua` from inside a callback.
    pub(crate) fn from_lua(lua: &Lua) -> LuaResult<Session> {
        lua.app_data_ref::<SessionLink>()
            .and_then(|link| link.0.upgrade())
            .map(|inner| Session { inner })
            .ok_or_else(|| LuaError::RuntimeError("interpreter session is closed".to_owned()))
    }

    pub(crate) fn lua(&self) -> &Lua {
        &self.inner.lua
    }

    pub(crate) fn chunk_name(&self) -> &str {
        &self.inner.chunk_name
    }

    /// Whether both handles refer to the same interpreter state.
    pub fn same_as(&self, other: &Session) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Fail with [`Error::ForeignValue`] unless `value` lives in this session.
    pub(crate) fn check_owned(&self, value: &Value) -> Result<()> {
        if self.same_as(value.session()) {
            Ok(())
        } else {
            Err(Error::ForeignValue)
        }
    }

    // ── Value constructors ───────────────────────────────────────────────────

    pub fn create_null(&self) -> Value {
        Value::from_parts(self.clone(), LuaValue::Nil)
    }

    /// Create a Long, Double, Bool or String value.
    pub fn create_scalar(&self, scalar: impl Into<Scalar>) -> Result<Value> {
        let datum = match scalar.into() {
            Scalar::Long(v) => LuaValue::Integer(v),
            Scalar::Double(v) => LuaValue::Number(v),
            Scalar::Bool(v) => LuaValue::Boolean(v),
            Scalar::String(v) => LuaValue::String(self.lua().create_string(&v)?),
        };
        Ok(Value::from_parts(self.clone(), datum))
    }

    /// Create an empty list.  `capacity` is only a pre-allocation hint.
    pub fn create_list(&self, capacity: usize) -> Result<Value> {
        let narr = capacity.min(MAX_PREALLOC);
        let table = self
            .lua()
            .create_table_with_capacity(narr.try_into().unwrap_or_default(), 0)?;
        Ok(Value::from_parts(self.clone(), LuaValue::Table(table)))
    }

    /// Create an empty map.
    ///
    /// An empty table has no keys to tell the two apart, so the new value
    /// classifies as an empty List until a non-sequence key is stored.
    pub fn create_map(&self) -> Result<Value> {
        let table = self.lua().create_table()?;
        Ok(Value::from_parts(self.clone(), LuaValue::Table(table)))
    }

    /// Create an empty object with a property bag.
    pub fn create_object(&self) -> Result<Value> {
        let table: LuaTable = self.inner.helpers.new_object.call(())?;
        Ok(Value::from_parts(self.clone(), LuaValue::Table(table)))
    }

    /// Convert a whole host value tree into a session value.
    pub fn create(&self, host: impl Into<HostValue>) -> Result<Value> {
        let datum = host.into().into_lua_datum(self, 0)?;
        Ok(Value::from_parts(self.clone(), datum))
    }

    /// Collect positional arguments into a List value.
    pub(crate) fn list_from(&self, items: Vec<LuaValue>) -> Result<Value> {
        let table = self.lua().create_sequence_from(items)?;
        Value::new(self, LuaValue::Table(table))
    }

    // ── Adapter primitives ───────────────────────────────────────────────────

    /// Compile `source` into a callable chunk reported under `name`.
    pub(crate) fn compile(&self, name: &str, source: &[u8]) -> LuaResult<LuaFunction> {
        self.lua()
            .load(source)
            .set_name(format!("={name}"))
            .into_function()
    }

    /// Run a compiled chunk; the first returned value, or nil.
    pub(crate) fn execute(&self, chunk: &LuaFunction) -> LuaResult<LuaValue> {
        chunk.call::<LuaValue>(())
    }

    /// Classify a native datum.
    pub(crate) fn classify(&self, datum: &LuaValue) -> Result<Kind> {
        match datum {
            LuaValue::Nil => Ok(Kind::Null),
            LuaValue::Integer(_) => Ok(Kind::Long),
            LuaValue::Number(_) => Ok(Kind::Double),
            LuaValue::Boolean(_) => Ok(Kind::Bool),
            LuaValue::String(_) => Ok(Kind::String),
            LuaValue::Table(t) => Ok(self.table_kind(t)),
            LuaValue::UserData(_) => Ok(Kind::Object),
            other => Err(Error::UnsupportedValueType(other.type_name())),
        }
    }

    /// Set a global without triggering metamethods.
    pub(crate) fn bind_symbol(&self, name: &str, datum: LuaValue) -> LuaResult<()> {
        self.lua().globals().raw_set(name, datum)
    }

    // ── Table inspection ─────────────────────────────────────────────────────

    fn table_kind(&self, table: &LuaTable) -> Kind {
        let has_meta = self
            .inner
            .helpers
            .has_metatable
            .call::<bool>(table.clone())
            .unwrap_or_default();
        if has_meta {
            Kind::Object
        } else if is_sequence(table) {
            Kind::List
        } else {
            Kind::Map
        }
    }

    /// `__tostring` result for objects that define one.
    ///
    /// Userdata metatables are hidden from `getmetatable`, so their
    /// `__tostring` is looked up from the Rust side.
    pub(crate) fn stringify(&self, datum: &LuaValue) -> Option<String> {
        let text = match datum {
            LuaValue::UserData(ud) => {
                let tostring: LuaFunction = ud.metatable().ok()?.get("__tostring").ok()?;
                tostring.call::<LuaString>(ud.clone()).ok()?
            }
            _ => self
                .inner
                .helpers
                .stringify
                .call::<Option<LuaString>>(datum.clone())
                .ok()
                .flatten()?,
        };
        Some(String::from(text.to_string_lossy()))
    }

    // ── Receiver classes ─────────────────────────────────────────────────────

    /// Script-side class table for a registered receiver, built on first use
    /// and rebuilt when the name was redefined.
    pub(crate) fn class_table(&self, entry: &Arc<ClassEntry>) -> LuaResult<LuaTable> {
        if let Some((serial, table)) = self.inner.classes.borrow().get(entry.name()) {
            if *serial == entry.serial() {
                return Ok(table.clone());
            }
        }

        let construct = receiver::constructor(self.lua(), Arc::clone(entry))?;
        let table: LuaTable = self
            .inner
            .helpers
            .make_class
            .call((entry.name(), construct))?;
        self.inner
            .classes
            .borrow_mut()
            .insert(entry.name().to_owned(), (entry.serial(), table.clone()));
        Ok(table)
    }

    /// Drop the cached class table for a name that is no longer registered.
    pub(crate) fn forget_class(&self, name: &str) {
        self.inner.classes.borrow_mut().remove(name);
    }
}

/// Whether the raw keys of `table` are exactly `1..=n`.
fn is_sequence(table: &LuaTable) -> bool {
    let mut count: i64 = 0;
    let mut max: i64 = 0;
    let mut sequence = true;
    let scanned = table.for_each::<LuaValue, LuaValue>(|key, _| {
        count += 1;
        match key {
            LuaValue::Integer(i) if i >= 1 => max = max.max(i),
            _ => sequence = false,
        }
        Ok(())
    });
    scanned.is_ok() && sequence && max == count
}
