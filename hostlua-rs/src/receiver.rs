//! Host objects exposed to scripts as classes.
//!
//! [`define`] registers a class name together with an opaque [`Identity`]
//! and a [`ReceiverHandler`].  Every session resolves registered names
//! lazily as globals, so scripts can write:
//!
//! ```lua
//! local obj = Greeter("hi")      -- or Greeter.new("hi"): ReceiverHandler::new_instance
//! print(obj.name)                -- exists, then get
//! obj.name = "other"             -- set
//! print(obj:hello("there"))      -- call
//! print(exists(obj, "name", 1))  -- exists in mode 0, 1 or 2
//! ```
//!
//! Reading a member the handler does not report through
//! [`ReceiverHandler::exists`] yields a method bound to the instance, not
//! nil, so `obj.optional == nil` is false for any undeclared name.  Scripts
//! test for optional members with `exists(obj, "optional")`.
//!
//! The class table is process-global.  The lock is held only while the
//! table changes, never while a handler runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use mlua::prelude::*;
use tracing::{debug, warn};

use crate::error::{script_error, Error, Result};
use crate::session::Session;
use crate::value::{Kind, Value};

/// Opaque token naming a host object.  The bridge never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity(u64);

impl Identity {
    pub const fn new(token: u64) -> Self {
        Identity(token)
    }

    pub const fn token(self) -> u64 {
        self.0
    }
}

/// Callbacks implementing a receiver class.
///
/// Values passed in belong to `session`; values returned must be created
/// from the same session.
pub trait ReceiverHandler: Send + Sync {
    /// Called when a script instantiates the class.  Returning `None` fails
    /// the construction.  The default keeps the class identity.
    fn new_instance(&self, session: &Session, identity: Identity, args: Value) -> Option<Identity> {
        let _ = (session, args);
        Some(identity)
    }

    /// Read a member; `None` reads as Null.  Only called for members
    /// [`exists`](ReceiverHandler::exists) reports; any other name reads as a
    /// bound method.
    fn get(&self, session: &Session, identity: Identity, member: &str) -> Option<Value>;

    /// Write a member.  There is no way to report a rejected write.
    fn set(&self, session: &Session, identity: Identity, member: &str, value: Value);

    /// Whether the member exists at all.
    fn exists(&self, session: &Session, identity: Identity, member: &str) -> bool;

    /// Invoke a method with its positional arguments as a List; `None`
    /// returns Null.
    ///
    /// A nil argument leaves a hole, which turns `args` into a Map keyed by
    /// position: `obj:m(1, nil, 3)` arrives with size 2.  Read arguments with
    /// [`Value::get_by_index`], which answers Null for a hole.
    fn call(&self, session: &Session, identity: Identity, method: &str, args: Value)
        -> Option<Value>;
}

/// What [`exists`](Instance::exists) checks beyond presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistsMode {
    /// Present and not Null.
    NonNull = 0,
    /// Present and truthy.
    Truthy = 1,
    /// Present at all.
    Declared = 2,
}

impl ExistsMode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ExistsMode::NonNull),
            1 => Some(ExistsMode::Truthy),
            2 => Some(ExistsMode::Declared),
            _ => None,
        }
    }
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// One registered class.
pub(crate) struct ClassEntry {
    name: String,
    serial: u64,
    identity: Identity,
    handler: Arc<dyn ReceiverHandler>,
}

impl ClassEntry {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Distinguishes successive definitions of the same name.
    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }
}

static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<ClassEntry>>>> = OnceLock::new();
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

fn registry() -> MutexGuard<'static, HashMap<String, Arc<ClassEntry>>> {
    REGISTRY
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Register a class under `name`.
pub fn define(name: &str, identity: Identity, handler: Arc<dyn ReceiverHandler>) -> Result<()> {
    if name.is_empty() {
        return Err(Error::EmptyReceiverName);
    }
    let mut classes = registry();
    if classes.contains_key(name) {
        return Err(Error::DuplicateReceiver(name.to_owned()));
    }
    let entry = ClassEntry {
        name: name.to_owned(),
        serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
        identity,
        handler,
    };
    classes.insert(name.to_owned(), Arc::new(entry));
    debug!(class = name, identity = identity.token(), "receiver defined");
    Ok(())
}

/// Unregister `name`.  Returns whether it was registered.
///
/// Instances created earlier keep working against the old handler.
pub fn destroy(name: &str) -> bool {
    let removed = registry().remove(name).is_some();
    if removed {
        debug!(class = name, "receiver destroyed");
    }
    removed
}

pub fn is_defined(name: &str) -> bool {
    registry().contains_key(name)
}

pub(crate) fn lookup(name: &str) -> Option<Arc<ClassEntry>> {
    registry().get(name).cloned()
}

// ── Instances ─────────────────────────────────────────────────────────────────

/// A script-side instance of a receiver class.
#[derive(Clone)]
pub(crate) struct Instance {
    class: Arc<ClassEntry>,
    identity: Option<Identity>,
}

impl Instance {
    /// Ask the handler for an instance identity.
    pub(crate) fn construct(session: &Session, class: Arc<ClassEntry>, args: Value) -> Instance {
        let identity = class.handler.new_instance(session, class.identity, args);
        Instance { class, identity }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.identity.is_some()
    }

    fn identity(&self) -> Result<Identity> {
        self.identity
            .ok_or_else(|| Error::ReceiverNotInitialized(self.class.name.clone()))
    }

    pub(crate) fn get(&self, session: &Session, member: &str) -> Result<Value> {
        let identity = self.identity()?;
        match self.class.handler.get(session, identity, member) {
            Some(value) => {
                session.check_owned(&value)?;
                Ok(value)
            }
            None => Ok(session.create_null()),
        }
    }

    pub(crate) fn set(&self, session: &Session, member: &str, value: Value) -> Result<()> {
        let identity = self.identity()?;
        self.class.handler.set(session, identity, member, value);
        Ok(())
    }

    /// Presence first; the value is fetched only when `mode` inspects it.
    pub(crate) fn exists(&self, session: &Session, member: &str, mode: ExistsMode) -> Result<bool> {
        let identity = self.identity()?;
        if !self.class.handler.exists(session, identity, member) {
            return Ok(false);
        }
        match mode {
            ExistsMode::Declared => Ok(true),
            ExistsMode::Truthy => Ok(self.get(session, member)?.as_bool()),
            ExistsMode::NonNull => Ok(self.get(session, member)?.kind() != Kind::Null),
        }
    }

    pub(crate) fn call(&self, session: &Session, method: &str, args: Value) -> Result<Value> {
        let identity = self.identity()?;
        match self.class.handler.call(session, identity, method, args) {
            Some(value) => {
                session.check_owned(&value)?;
                Ok(value)
            }
            None => Ok(session.create_null()),
        }
    }
}

impl LuaUserData for Instance {
    fn add_methods<M: LuaUserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_function(
            LuaMetaMethod::Index,
            |lua, (ud, member): (LuaAnyUserData, String)| {
                let session = Session::from_lua(lua)?;
                let this = Instance::clone(&*ud.borrow::<Instance>()?);

                if this
                    .exists(&session, &member, ExistsMode::Declared)
                    .map_err(script_error)?
                {
                    let value = this.get(&session, &member).map_err(script_error)?;
                    return Ok(value.into_datum());
                }

                // Not a property: hand back a method bound to this instance.
                let method = lua.create_function(move |lua, args: LuaMultiValue| {
                    let session = Session::from_lua(lua)?;
                    let mut args: Vec<LuaValue> = args.into_iter().collect();
                    if matches!(args.first(), Some(LuaValue::UserData(first)) if *first == ud) {
                        args.remove(0);
                    }
                    let args = session.list_from(args).map_err(script_error)?;
                    this.call(&session, &member, args)
                        .map(Value::into_datum)
                        .map_err(script_error)
                })?;
                Ok(LuaValue::Function(method))
            },
        );

        methods.add_meta_method(
            LuaMetaMethod::NewIndex,
            |lua, this, (member, value): (String, LuaValue)| {
                let session = Session::from_lua(lua)?;
                let value = Value::new(&session, value).map_err(script_error)?;
                this.set(&session, &member, value).map_err(script_error)
            },
        );

        methods.add_meta_method(LuaMetaMethod::ToString, |_, this, ()| {
            Ok(format!("{} instance", this.class.name))
        });
    }
}

// ── Script surface ────────────────────────────────────────────────────────────

/// The constructor installed as `Class(...)` and `Class.new(...)`.
pub(crate) fn constructor(lua: &Lua, class: Arc<ClassEntry>) -> LuaResult<LuaFunction> {
    lua.create_function(move |lua, args: LuaMultiValue| {
        let session = Session::from_lua(lua)?;
        let args = session
            .list_from(args.into_iter().collect())
            .map_err(script_error)?;
        let instance = Instance::construct(&session, Arc::clone(&class), args);
        if !instance.is_initialized() {
            warn!(class = %class.name, "receiver construction rejected");
            return Err(script_error(Error::ReceiverConstruction(class.name.clone())));
        }
        lua.create_userdata(instance)
    })
}

/// Global-name fallback: a registered class name resolves to its class table.
pub(crate) fn resolver(lua: &Lua) -> LuaResult<LuaFunction> {
    lua.create_function(|lua, name: LuaValue| {
        let LuaValue::String(name) = name else {
            return Ok(LuaValue::Nil);
        };
        let name = String::from(name.to_string_lossy());
        let session = Session::from_lua(lua)?;
        match lookup(&name) {
            Some(entry) => session.class_table(&entry).map(LuaValue::Table),
            None => {
                session.forget_class(&name);
                Ok(LuaValue::Nil)
            }
        }
    })
}

/// `exists(target, member [, mode])`.
///
/// Receiver instances ask their handler; plain tables check raw presence.
pub(crate) fn exists_function(lua: &Lua) -> LuaResult<LuaFunction> {
    lua.create_function(
        |lua, (target, member, mode): (LuaValue, String, Option<i64>)| {
            let mode = ExistsMode::from_code(mode.unwrap_or(2)).ok_or_else(|| {
                LuaError::RuntimeError(
                    "bad argument #3 to 'exists' (mode must be 0, 1 or 2)".to_owned(),
                )
            })?;
            match target {
                LuaValue::UserData(ud) if ud.is::<Instance>() => {
                    let session = Session::from_lua(lua)?;
                    let this = Instance::clone(&*ud.borrow::<Instance>()?);
                    this.exists(&session, &member, mode).map_err(script_error)
                }
                LuaValue::Table(table) => {
                    let value: LuaValue = table.raw_get(member)?;
                    Ok(match mode {
                        ExistsMode::Declared | ExistsMode::NonNull => !value.is_nil(),
                        ExistsMode::Truthy => !matches!(value, LuaValue::Nil | LuaValue::Boolean(false)),
                    })
                }
                _ => Ok(false),
            }
        },
    )
}
