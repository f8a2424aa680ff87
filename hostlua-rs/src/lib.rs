//! Embedded Lua 5.4 sessions for host applications.
//!
//! | Piece                 | Role                                               |
//! |-----------------------|----------------------------------------------------|
//! | [`Engine`]            | process-wide bootstrap, owns the [`EngineConfig`]  |
//! | [`Context`]           | one session per request: `exec`, `eval`, `bind`    |
//! | [`Value`]             | typed handle to one interpreter datum              |
//! | [`receiver`]          | host objects exposed to scripts as classes         |
//! | [`Host`]              | output, log and header callbacks                   |
//!
//! ```
//! use std::rc::Rc;
//! use hostlua::{BufferedHost, Engine, Kind};
//!
//! let engine = Engine::init()?;
//! let ctx = engine.new_context(Rc::new(BufferedHost::new()))?;
//! ctx.bind("x", ctx.session().create_scalar(5)?)?;
//!
//! let result = ctx.eval("return x + 1;")?.value().unwrap();
//! assert_eq!(result.kind(), Kind::Long);
//! assert_eq!(result.as_long(), 6);
//! # Ok::<(), hostlua::Error>(())
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod host;
pub mod receiver;
pub mod session;
pub mod value;

mod builtins;
mod request;

use std::sync::Once;

pub use config::EngineConfig;
pub use context::{Context, Status};
pub use engine::Engine;
pub use error::{Error, Result};
pub use host::{BufferedHost, HeaderOp, Headers, Host, StdioHost};
pub use receiver::{ExistsMode, Identity, ReceiverHandler};
pub use session::Session;
pub use value::{HostValue, Key, Kind, Scalar, Value};

static TRACING_INIT: Once = Once::new();

/// Install a `tracing` formatter filtered by `RUST_LOG`.
///
/// Does nothing unless `RUST_LOG` is set; later calls are no-ops.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}
