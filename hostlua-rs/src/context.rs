//! Per-request interpreter sessions.
//!
//! A [`Context`] is created from an [`Engine`], runs any number of
//! [`exec`](Context::exec), [`eval`](Context::eval) and
//! [`bind`](Context::bind) calls, and is torn down exactly once by
//! [`destroy`](Context::destroy) or by being dropped.
//!
//! A script that calls `exit` is not an error: both `exec` and `eval` report
//! it as [`Status::EarlyTermination`].

use std::path::Path;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::host::Host;
use crate::request::{self, RequestGuard};
use crate::session::Session;
use crate::value::{HostValue, Value};

use mlua::prelude::*;

/// How a script run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Status<T = ()> {
    /// Ran to completion.
    Ok(T),
    /// The script stopped itself with this exit code.
    EarlyTermination(i32),
}

impl<T> Status<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok(_))
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Status::Ok(_) => None,
            Status::EarlyTermination(code) => Some(*code),
        }
    }

    /// The completion value, if the script ran to completion.
    pub fn value(self) -> Option<T> {
        match self {
            Status::Ok(v) => Some(v),
            Status::EarlyTermination(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Status<U> {
        match self {
            Status::Ok(v) => Status::Ok(f(v)),
            Status::EarlyTermination(code) => Status::EarlyTermination(code),
        }
    }
}

/// One interpreter session bound to one host.
///
/// Only one Context may be alive per thread.
pub struct Context<'e> {
    session: Session,
    engine: &'e Engine,
    // Released last so the session is gone before the slot frees up.
    _request: RequestGuard,
}

impl<'e> Context<'e> {
    /// Claim the thread's request slot for `host` and open a session.
    pub fn new(engine: &'e Engine, host: Rc<dyn Host>) -> Result<Context<'e>> {
        let request = RequestGuard::start(host)?;
        let session = Session::open(engine.config())?;
        debug!("context started");
        Ok(Context {
            session,
            engine,
            _request: request,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn engine(&self) -> &'e Engine {
        self.engine
    }

    /// Shorthand for [`Session::create`].
    pub fn create(&self, host: impl Into<HostValue>) -> Result<Value> {
        self.session.create(host)
    }

    /// Run a script file.
    ///
    /// A leading `#!` line is skipped.  Unreadable or unparsable files are
    /// execution failures.
    pub fn exec(&self, path: impl AsRef<Path>) -> Result<Status> {
        let path = path.as_ref();
        let source = std::fs::read(path)
            .map_err(|e| self.report(Error::Execution(format!("{}: {e}", path.display()))))?;
        let chunk = self
            .session
            .compile(&path.display().to_string(), strip_shebang(&source))
            .map_err(|e| self.report(Error::Execution(e.to_string())))?;
        Ok(self.run(&chunk)?.map(|_| ()))
    }

    /// Evaluate a source fragment and return its value.
    ///
    /// The fragment is tried as an expression first, then as a statement
    /// block.  A fragment that yields nothing evaluates to Null.
    pub fn eval(&self, source: &str) -> Result<Status<Value>> {
        let name = self.session.chunk_name().to_owned();
        let chunk = match self
            .session
            .compile(&name, format!("return {source}").as_bytes())
        {
            Ok(chunk) => chunk,
            Err(_) => self
                .session
                .compile(&name, source.as_bytes())
                .map_err(|e| self.report(Error::Compile(e.to_string())))?,
        };
        match self.run(&chunk)? {
            Status::Ok(datum) => Ok(Status::Ok(Value::new(&self.session, datum)?)),
            Status::EarlyTermination(code) => Ok(Status::EarlyTermination(code)),
        }
    }

    /// Make `value` a global named `name`.
    pub fn bind(&self, name: &str, value: Value) -> Result<()> {
        self.session.check_owned(&value)?;
        self.session.bind_symbol(name, value.into_datum())?;
        Ok(())
    }

    /// Tear the context down.
    pub fn destroy(self) {
        debug!("context destroyed");
    }

    fn run(&self, chunk: &LuaFunction) -> Result<Status<LuaValue>> {
        request::clear_exit();
        let result = self.session.execute(chunk);
        if let Some(code) = request::exit_status() {
            debug!(code, "script terminated early");
            return Ok(Status::EarlyTermination(code));
        }
        result
            .map(Status::Ok)
            .map_err(|e| self.report(Error::Execution(e.to_string())))
    }

    /// Forward a failure to the host log when enabled.
    fn report(&self, err: Error) -> Error {
        warn!(error = %err, "script failed");
        if self.engine.config().log_errors {
            request::log(&err.to_string());
        }
        err
    }
}

fn strip_shebang(source: &[u8]) -> &[u8] {
    if source.starts_with(b"#") {
        // keep the newline so line numbers still match
        let end = source
            .iter()
            .position(|&b| b == b'\n')
            .unwrap_or(source.len());
        &source[end..]
    } else {
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::BufferedHost;
    use crate::value::Kind;

    fn setup() -> (Engine, Rc<BufferedHost>) {
        (Engine::init().unwrap(), Rc::new(BufferedHost::new()))
    }

    #[test]
    fn bind_then_eval() {
        let (engine, host) = setup();
        let ctx = Context::new(&engine, host).unwrap();
        ctx.bind("x", ctx.session().create_scalar(5).unwrap()).unwrap();
        let value = ctx.eval("return x + 1;").unwrap().value().unwrap();
        assert_eq!(value.kind(), Kind::Long);
        assert_eq!(value.as_long(), 6);
    }

    #[test]
    fn eval_expression_and_statements() {
        let (engine, host) = setup();
        let ctx = Context::new(&engine, host).unwrap();
        assert_eq!(ctx.eval("1 + 2").unwrap().value().unwrap().as_long(), 3);
        let nothing = ctx.eval("local y = 1").unwrap().value().unwrap();
        assert!(nothing.is_null());
    }

    #[test]
    fn compile_failure_is_distinct() {
        let (engine, host) = setup();
        let ctx = Context::new(&engine, host.clone()).unwrap();
        assert!(matches!(ctx.eval("return +"), Err(Error::Compile(_))));
        assert!(matches!(ctx.eval("error('boom')"), Err(Error::Execution(_))));
        assert_eq!(host.log_lines().len(), 2);
    }

    #[test]
    fn exit_in_eval() {
        let (engine, host) = setup();
        let ctx = Context::new(&engine, host.clone()).unwrap();
        assert_eq!(ctx.eval("exit(4)").unwrap().exit_code(), Some(4));
        // the next run starts clean
        assert!(ctx.eval("1").unwrap().is_ok());
        assert_eq!(ctx.eval("os.exit(false)").unwrap().exit_code(), Some(1));
        assert!(host.log_lines().is_empty());
    }

    #[test]
    fn exit_survives_pcall() {
        let (engine, host) = setup();
        let ctx = Context::new(&engine, host.clone()).unwrap();
        let status = ctx
            .eval("pcall(exit, 7) print('unreachable')")
            .unwrap();
        assert_eq!(status.exit_code(), Some(7));
        assert_eq!(host.output(), "");

        let status = ctx
            .eval("local co = coroutine.create(function() exit(2) end) coroutine.resume(co) print('no')")
            .unwrap();
        assert_eq!(status.exit_code(), Some(2));
        assert_eq!(host.output(), "");
    }

    #[test]
    fn exit_survives_load_reader() {
        let (engine, host) = setup();
        let ctx = Context::new(&engine, host.clone()).unwrap();
        let status = ctx
            .eval("load(function() exit(3) end) echo('after-exit')")
            .unwrap();
        assert_eq!(status.exit_code(), Some(3));
        assert_eq!(host.output(), "");

        // ordinary reader errors still come back as values
        let value = ctx
            .eval("select(2, load(function() error('bad reader') end))")
            .unwrap()
            .value()
            .unwrap();
        assert!(value.as_string().contains("bad reader"), "{value:?}");
        assert_eq!(
            ctx.eval("load('return 2')()").unwrap().value().unwrap().as_long(),
            2
        );
    }

    #[test]
    fn pcall_still_catches_errors() {
        let (engine, host) = setup();
        let ctx = Context::new(&engine, host).unwrap();
        let value = ctx
            .eval("select('#', pcall(error, 'x')) == 2 and not pcall(error, 'x')")
            .unwrap()
            .value()
            .unwrap();
        assert!(value.as_bool());
    }

    #[test]
    fn output_and_headers_reach_host() {
        let (engine, host) = setup();
        let ctx = Context::new(&engine, host.clone()).unwrap();
        ctx.eval("print('a', 1, true) echo('b', 'c') io.write('d')").unwrap();
        assert_eq!(host.output(), "a\t1\ttrue\nbcd");

        ctx.eval("header('X-Testing: Hello')").unwrap();
        ctx.eval("header('X-Testing: World', false)").unwrap();
        assert_eq!(host.headers().get_all("X-Testing"), ["Hello", "World"]);
        ctx.eval("header_remove('X-Testing')").unwrap();
        assert!(host.headers().is_empty());

        ctx.eval("error_log('careful')").unwrap();
        assert_eq!(host.log_lines(), vec!["careful".to_owned()]);
    }

    #[test]
    fn exit_with_message() {
        let (engine, host) = setup();
        let ctx = Context::new(&engine, host.clone()).unwrap();
        assert_eq!(ctx.eval("exit('bye')").unwrap().exit_code(), Some(0));
        assert_eq!(host.output(), "bye");
    }

    #[test]
    fn second_context_on_thread_fails() {
        let (engine, host) = setup();
        let first = Context::new(&engine, host.clone()).unwrap();
        assert!(matches!(
            Context::new(&engine, host.clone()),
            Err(Error::RequestStartup(_))
        ));
        first.destroy();
        assert!(Context::new(&engine, host).is_ok());
    }

    #[test]
    fn errors_are_not_logged_when_disabled() {
        let (mut config, _) = crate::config::EngineConfig::load_str("log_errors = 0");
        config.chunk_name = "quiet".to_owned();
        let engine = Engine::with_config(config).unwrap();
        let host = Rc::new(BufferedHost::new());
        let ctx = Context::new(&engine, host.clone()).unwrap();
        let err = ctx.eval("error('boom')").unwrap_err();
        assert!(err.to_string().contains("quiet"));
        assert!(host.log_lines().is_empty());
    }

    #[test]
    fn shebang_is_skipped() {
        assert_eq!(strip_shebang(b"#!/usr/bin/env hostlua\nprint(1)"), b"\nprint(1)");
        assert_eq!(strip_shebang(b"print(1)"), b"print(1)");
    }
}
