//! The top-level bridge: an environment plus the modules installed in it.

use hostbridge_core::{
    BridgeError, BridgeResult, Environment, EnvironmentConfig, ExecutionContext, FromHost, GcStats,
};
use hostbridge_module::Module;
use hostbridge_modules::default_modules;
use rustc_hash::FxHashSet;
use thiserror::Error;

/// Errors from setting up a [`Bridge`].
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("module '{name}' is already installed")]
    DuplicateModule { name: String },

    #[error("failed to load module '{name}': {source}")]
    LoadFailed {
        name: String,
        #[source]
        source: BridgeError,
    },

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Owns an [`Environment`] and the modules loaded into it.
///
/// Installing a module loads it immediately: its classes are registered
/// and its exports bound on `globalThis[name]`.
pub struct Bridge {
    env: Environment,
    modules: Vec<Module>,
    names: FxHashSet<String>,
}

impl Bridge {
    pub fn new(config: EnvironmentConfig) -> Result<Self, SetupError> {
        Ok(Self {
            env: Environment::new(config)?,
            modules: Vec::new(),
            names: FxHashSet::default(),
        })
    }

    /// A bridge with `geometry`, `example` and `capture` installed.
    pub fn with_default_modules(config: EnvironmentConfig) -> Result<Self, SetupError> {
        let mut bridge = Self::new(config)?;
        for module in default_modules() {
            bridge.install(module)?;
        }
        Ok(bridge)
    }

    /// Load `module` into the environment and keep it.
    pub fn install(&mut self, module: Module) -> Result<(), SetupError> {
        if self.names.contains(module.name()) {
            return Err(SetupError::DuplicateModule {
                name: module.name().to_string(),
            });
        }

        self.env
            .enter(|cx: &ExecutionContext| module.load(cx).map(drop))
            .map_err(|source| SetupError::LoadFailed {
                name: module.name().to_string(),
                source,
            })?;

        tracing::debug!(module = module.name(), "module installed");
        self.names.insert(module.name().to_string());
        self.modules.push(module);
        Ok(())
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn get_module(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|module| module.name() == name)
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Enter the environment; see [`Environment::enter`].
    pub fn enter<R>(&self, f: impl FnOnce(&ExecutionContext) -> BridgeResult<R>) -> BridgeResult<R> {
        self.env.enter(f)
    }

    /// Evaluate a host expression and convert its result.
    pub fn eval<T: FromHost>(&self, source: &str) -> BridgeResult<T> {
        self.env.enter(|cx: &ExecutionContext| {
            let value = cx.run(source)?;
            T::from_host(cx, value)
        })
    }

    /// Drive pending async work as far as it can go without blocking.
    pub fn run_until_stalled(&self) -> BridgeResult<()> {
        self.env.run_until_stalled()
    }

    /// Drive pending async work to completion.
    pub fn run_until_idle(&self) -> BridgeResult<()> {
        self.env.run_until_idle()
    }

    pub fn collect_garbage(&self) -> BridgeResult<GcStats> {
        self.env.collect_garbage()
    }

    /// Tear the environment down, cancelling outstanding async work.
    pub fn shutdown(&self) {
        self.env.teardown();
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("environment", &self.env)
            .field("modules", &self.modules.iter().map(Module::name).collect::<Vec<_>>())
            .finish()
    }
}
