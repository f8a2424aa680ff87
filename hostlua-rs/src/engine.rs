//! Process-wide interpreter bootstrap.

use std::rc::Rc;

use tracing::info;

use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::Result;
use crate::host::Host;
use crate::session::Session;

/// The substrate every [`Context`] runs on.
///
/// Contexts borrow the engine, so [`Engine::shutdown`] cannot run while any
/// of them is alive.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    /// Start with the built-in defaults.
    pub fn init() -> Result<Engine> {
        Self::with_config(EngineConfig::default())
    }

    /// Start with `config`.
    ///
    /// A throwaway session is opened to prove the configuration works;
    /// failure is an allocation failure.
    pub fn with_config(config: EngineConfig) -> Result<Engine> {
        drop(Session::open(&config)?);
        info!(
            libraries = ?config.libraries,
            memory_limit = ?config.memory_limit,
            "engine started"
        );
        Ok(Engine { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a context writing to `host`.
    pub fn new_context(&self, host: Rc<dyn Host>) -> Result<Context<'_>> {
        Context::new(self, host)
    }

    pub fn shutdown(self) {
        info!("engine shut down");
    }
}
