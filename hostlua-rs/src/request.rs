//! The per-thread "current request" that built-in script functions report to.
//!
//! A [`RequestGuard`] claims the slot for the lifetime of one Context.  While
//! it is held, `print`, `header`, `error_log` and `exit` reach the Context's
//! [`Host`]; with no active request they are silently discarded.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::host::{HeaderOp, Host};

struct Request {
    host: Rc<dyn Host>,
    exit_status: Cell<Option<i32>>,
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<Request>>> = const { RefCell::new(None) };
}

/// Exclusive claim on the calling thread's request slot.
pub(crate) struct RequestGuard {
    _not_send: PhantomData<Rc<()>>,
}

impl RequestGuard {
    /// Claim the slot for `host`.  Fails when another request is active.
    pub(crate) fn start(host: Rc<dyn Host>) -> Result<Self> {
        CURRENT.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_some() {
                return Err(Error::RequestStartup(
                    "another context is already active on this thread".to_owned(),
                ));
            }
            *slot = Some(Rc::new(Request {
                host,
                exit_status: Cell::new(None),
            }));
            Ok(RequestGuard {
                _not_send: PhantomData,
            })
        })
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        let _ = CURRENT.try_with(|slot| slot.borrow_mut().take());
    }
}

/// Snapshot of the active request, so no borrow is held across host calls.
fn current() -> Option<Rc<Request>> {
    CURRENT
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

#[cfg(test)]
fn is_active() -> bool {
    current().is_some()
}

pub(crate) fn write(bytes: &[u8]) -> usize {
    current().map_or(0, |req| req.host.write(bytes))
}

pub(crate) fn log(message: &str) {
    if let Some(req) = current() {
        req.host.log(message);
    }
}

pub(crate) fn set_header(op: HeaderOp, header: &str) {
    if let Some(req) = current() {
        req.host.set_header(op, header);
    }
}

/// Record that the script asked to stop with `code`.
pub(crate) fn terminate(code: i32) {
    if let Some(req) = current() {
        req.exit_status.set(Some(code));
    }
}

pub(crate) fn exit_status() -> Option<i32> {
    current().and_then(|req| req.exit_status.get())
}

pub(crate) fn clear_exit() {
    if let Some(req) = current() {
        req.exit_status.set(None);
    }
}
