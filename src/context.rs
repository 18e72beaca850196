use std::sync::Arc;

use crate::{CompilerPool, Config};

/// The runtime object passed to every loading entry point.
///
/// It owns the configuration and the single compiler pool for the runtime it
/// is used on. Cloning is cheap and shares the pool.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    config: Config,
    pool: CompilerPool,
}

impl Context {
    pub fn new(config: Config) -> Self {
        let pool = CompilerPool::from_config(&config);
        Context {
            inner: Arc::new(ContextInner { config, pool }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn pool(&self) -> &CompilerPool {
        &self.inner.pool
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new(Config::from_env())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.inner.config)
            .field("workers", &self.inner.pool.num_workers())
            .finish()
    }
}
