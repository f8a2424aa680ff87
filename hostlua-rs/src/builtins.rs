//! Global functions installed in every session.
//!
//! | Lua function                  | Effect                                     |
//! |-------------------------------|--------------------------------------------|
//! | `print(...)`                  | tab-joined line to the host output         |
//! | `echo(...)`                   | concatenated text, no newline              |
//! | `io.write(...)`               | same as `echo` (io library only)           |
//! | `header(line [, replace])`    | replace (default) or add a response header |
//! | `header_remove(name)`         | delete a response header                   |
//! | `error_log(message)`          | line to the host log                       |
//! | `exit([status])`, `os.exit`   | stop the script (early termination)        |
//! | `exists(obj, member [, mode])`| member test, see [`crate::receiver`]       |
//! | `ENV`                         | process environment (when enabled)         |
//!
//! `exit` raises an error carrying no information; the request's exit flag
//! is what marks it.  The prelude rewraps `pcall`, `xpcall`, `load` and
//! `coroutine.resume` so a protected call cannot swallow it, and installs
//! the global fallback that resolves receiver class names.

use mlua::prelude::*;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::host::HeaderOp;
use crate::receiver;
use crate::request;
use crate::session::Session;

const PRELUDE: &str = r#"
local terminated, resolve = ...
local pcall, xpcall, load, error, setmetatable = pcall, xpcall, load, error, setmetatable

local function rethrow(ok, ...)
  if not ok and terminated() then
    error((...), 0)
  end
  return ok, ...
end

_G.pcall = function(f, ...)
  return rethrow(pcall(f, ...))
end

_G.xpcall = function(f, handler, ...)
  return rethrow(xpcall(f, function(err)
    if terminated() then
      return err
    end
    return handler(err)
  end, ...))
end

-- load runs its reader in protected mode
_G.load = function(...)
  local chunk, err = load(...)
  if chunk == nil and terminated() then
    error(err, 0)
  end
  return chunk, err
end

if coroutine then
  local resume = coroutine.resume
  coroutine.resume = function(co, ...)
    return rethrow(resume(co, ...))
  end
end

setmetatable(_G, {
  __index = function(_, name)
    return resolve(name)
  end,
})
"#;

/// Error message of the termination signal.
const EXIT_SIGNAL: &str = "exit";

pub(crate) fn register(session: &Session, config: &EngineConfig) -> Result<()> {
    let lua = session.lua();
    let globals = lua.globals();

    // print(...) → "a\tb\n"
    globals.set(
        "print",
        lua.create_function(|lua, args: LuaMultiValue| {
            let mut line = join(lua, args, b"\t")?;
            line.push(b'\n');
            request::write(&line);
            Ok(())
        })?,
    )?;

    // echo(...) → "ab"
    let echo = lua.create_function(|lua, args: LuaMultiValue| {
        request::write(&join(lua, args, b"")?);
        Ok(())
    })?;
    globals.set("echo", echo.clone())?;
    if let Ok(io) = globals.get::<LuaTable>("io") {
        io.set("write", echo)?;
    }

    // header(line [, replace = true])
    globals.set(
        "header",
        lua.create_function(|_, (line, replace): (String, Option<bool>)| {
            let op = if replace.unwrap_or(true) {
                HeaderOp::Replace
            } else {
                HeaderOp::Add
            };
            request::set_header(op, &line);
            Ok(())
        })?,
    )?;

    globals.set(
        "header_remove",
        lua.create_function(|_, name: String| {
            request::set_header(HeaderOp::Delete, &name);
            Ok(())
        })?,
    )?;

    globals.set(
        "error_log",
        lua.create_function(|_, message: String| {
            request::log(&message);
            Ok(())
        })?,
    )?;

    let exit = lua.create_function(|_, status: Option<LuaValue>| -> LuaResult<()> {
        let code = exit_code(status.unwrap_or(LuaValue::Nil))?;
        request::terminate(code);
        Err(LuaError::RuntimeError(EXIT_SIGNAL.to_owned()))
    })?;
    globals.set("exit", exit.clone())?;
    if let Ok(os) = globals.get::<LuaTable>("os") {
        os.set("exit", exit)?;
    }

    globals.set("exists", receiver::exists_function(lua)?)?;

    if config.register_environment {
        let env = lua.create_table()?;
        for (key, value) in std::env::vars_os() {
            env.raw_set(&*key.to_string_lossy(), &*value.to_string_lossy())?;
        }
        globals.set("ENV", env)?;
    }

    let terminated = lua.create_function(|_, ()| Ok(request::exit_status().is_some()))?;
    lua.load(PRELUDE)
        .set_name("=hostlua-prelude")
        .call::<()>((terminated, receiver::resolver(lua)?))?;

    Ok(())
}

/// Convert every argument with the global `tostring` and join the results.
fn join(lua: &Lua, args: LuaMultiValue, sep: &[u8]) -> LuaResult<Vec<u8>> {
    let tostring: LuaFunction = lua.globals().get("tostring")?;
    let mut out = Vec::new();
    for (i, arg) in args.into_iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(sep);
        }
        let text: LuaString = tostring.call(arg)?;
        out.extend_from_slice(&text.as_bytes());
    }
    Ok(out)
}

/// Exit status for `exit(status)`.
///
/// A string is written to the output and exits with 0; booleans follow
/// `os.exit` (true → 0, false → 1).
fn exit_code(status: LuaValue) -> LuaResult<i32> {
    Ok(match status {
        LuaValue::Nil => 0,
        LuaValue::Integer(i) => i.clamp(i32::MIN.into(), i32::MAX.into()) as i32,
        LuaValue::Number(f) => f as i32,
        LuaValue::Boolean(ok) => i32::from(!ok),
        LuaValue::String(s) => {
            request::write(&s.as_bytes());
            0
        }
        other => {
            return Err(LuaError::RuntimeError(format!(
                "bad argument #1 to 'exit' (number or string expected, got {})",
                other.type_name()
            )))
        }
    })
}
