//! Environments: one host instance bound to the thread that created it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use futures::executor::{LocalPool, LocalSpawner};
use rustc_hash::FxHashMap;

use crate::class::ClassRegistry;
use crate::config::EnvironmentConfig;
use crate::context::{self, ExecutionContext};
use crate::error::{BridgeError, BridgeResult, HostException};
use crate::handle::{RootTable, ScopeStack};
use crate::host::object::{HostObject, ObjectKind, PropertyFlags};
use crate::host::{Heap, HostValue, ObjectId, SymbolId, SymbolTable};
use crate::native_fn::{CallContext, NativeFn};

static NEXT_ENV_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique environment identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EnvId(u64);

impl EnvId {
    fn next() -> Self {
        EnvId(NEXT_ENV_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of the thread an environment is confined to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThreadToken(ThreadId);

impl ThreadToken {
    pub fn current() -> Self {
        ThreadToken(thread::current().id())
    }

    pub fn is_current(&self) -> bool {
        self.0 == thread::current().id()
    }
}

/// Symbols exposed as properties of `globalThis.Symbol`.
pub const WELL_KNOWN_SYMBOLS: &[&str] = &[
    "asyncIterator",
    "hasInstance",
    "isConcatSpreadable",
    "iterator",
    "match",
    "matchAll",
    "replace",
    "search",
    "species",
    "split",
    "toPrimitive",
    "toStringTag",
    "unscopables",
];

/// Statistics of one collection cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcStats {
    /// Objects reclaimed.
    pub freed: usize,
    /// Native payloads finalized among them.
    pub finalized: usize,
    /// Objects still alive afterwards.
    pub live: usize,
}

pub(crate) struct EnvInner {
    pub(crate) id: EnvId,
    pub(crate) owner: ThreadToken,
    pub(crate) config: EnvironmentConfig,
    pub(crate) heap: RefCell<Heap>,
    pub(crate) symbols: RefCell<SymbolTable>,
    pub(crate) roots: RefCell<RootTable>,
    pub(crate) scopes: RefCell<ScopeStack>,
    pub(crate) classes: RefCell<ClassRegistry>,
    pub(crate) well_known: RefCell<FxHashMap<Box<str>, SymbolId>>,
    pub(crate) global: ObjectId,
    pub(crate) torn_down: Cell<bool>,
    pub(crate) entry_depth: Cell<usize>,
    pub(crate) pool: RefCell<LocalPool>,
    pub(crate) spawner: RefCell<LocalSpawner>,
}

impl EnvInner {
    pub(crate) fn check_thread(&self) -> BridgeResult<()> {
        if self.owner.is_current() {
            Ok(())
        } else {
            debug_assert!(false, "environment {:?} used off its owning thread", self.id);
            Err(BridgeError::WrongThread)
        }
    }

    pub(crate) fn check_live(&self) -> BridgeResult<()> {
        if self.torn_down.get() {
            return Err(BridgeError::EnvironmentTornDown);
        }
        self.check_thread()
    }

    /// Mark from the global object, persistent roots and open scopes, then
    /// finalize swept payloads once every borrow is released.
    #[cfg_attr(feature = "profiling", profiling::function)]
    pub(crate) fn collect(&self) -> GcStats {
        let mut roots = vec![self.global];
        roots.extend(self.roots.borrow().values().filter_map(HostValue::as_object));
        roots.extend(self.scopes.borrow().values().filter_map(HostValue::as_object));
        roots.extend(self.classes.borrow().rooted_objects());

        let freed = self.heap.borrow_mut().collect(roots);
        let live = self.heap.borrow().live_count();

        let mut stats = GcStats {
            freed: freed.len(),
            finalized: 0,
            live,
        };
        for object in freed {
            if let ObjectKind::Wrapped(wrapped) = object.kind {
                if let Some(finalizer) = &wrapped.finalizer {
                    finalizer(&wrapped.payload);
                }
                self.classes.borrow_mut().record_finalized(wrapped.class, &wrapped.payload);
                tracing::trace!(class = ?wrapped.class, "payload finalized");
                stats.finalized += 1;
            }
        }

        tracing::debug!(
            env = ?self.id,
            freed = stats.freed,
            finalized = stats.finalized,
            live = stats.live,
            "garbage collection finished"
        );
        stats
    }
}

/// A host instance: heap, symbols, roots, classes and a local task executor,
/// confined to the creating thread.
///
/// Dropping the environment tears it down, cancelling outstanding
/// completions.
pub struct Environment {
    inner: Rc<EnvInner>,
}

impl Environment {
    pub fn new(config: EnvironmentConfig) -> BridgeResult<Self> {
        let mut heap = Heap::new(config.max_objects());
        let global = heap.allocate(HostObject::ordinary())?;
        let pool = LocalPool::new();
        let spawner = pool.spawner();

        let inner = Rc::new(EnvInner {
            id: EnvId::next(),
            owner: ThreadToken::current(),
            config,
            heap: RefCell::new(heap),
            symbols: RefCell::new(SymbolTable::new()),
            roots: RefCell::new(RootTable::default()),
            scopes: RefCell::new(ScopeStack::new()),
            classes: RefCell::new(ClassRegistry::default()),
            well_known: RefCell::new(FxHashMap::default()),
            global,
            torn_down: Cell::new(false),
            entry_depth: Cell::new(0),
            pool: RefCell::new(pool),
            spawner: RefCell::new(spawner),
        });

        let env = Environment { inner };
        env.enter(install_globals)?;
        tracing::debug!(env = ?env.id(), "environment created");
        Ok(env)
    }

    pub fn id(&self) -> EnvId {
        self.inner.id
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.inner.config
    }

    /// Make this environment the current context and run `f` in a fresh
    /// handle scope.
    ///
    /// The context and scope are popped on every exit path. When the
    /// outermost entry returns and a GC threshold is configured, a
    /// collection may run.
    pub fn enter<R>(
        &self,
        f: impl FnOnce(&ExecutionContext) -> BridgeResult<R>,
    ) -> BridgeResult<R> {
        context::enter(&self.inner, f)
    }

    /// Poll spawned tasks until none can make progress.
    pub fn run_until_stalled(&self) -> BridgeResult<()> {
        self.inner.check_live()?;
        let mut pool = self
            .inner
            .pool
            .try_borrow_mut()
            .map_err(|_| BridgeError::Reentrant { what: "task executor" })?;
        pool.run_until_stalled();
        Ok(())
    }

    /// Run spawned tasks until all of them completed. Blocks the thread
    /// while a task waits on something outside the environment.
    pub fn run_until_idle(&self) -> BridgeResult<()> {
        self.inner.check_live()?;
        let mut pool = self
            .inner
            .pool
            .try_borrow_mut()
            .map_err(|_| BridgeError::Reentrant { what: "task executor" })?;
        pool.run();
        Ok(())
    }

    /// Cancel every outstanding task and refuse further entry.
    ///
    /// Completions still held elsewhere observe the teardown and no-op.
    pub fn teardown(&self) {
        if self.inner.torn_down.replace(true) {
            return;
        }
        let fresh = LocalPool::new();
        let fresh_spawner = fresh.spawner();
        let cancelled = match self.inner.pool.try_borrow_mut() {
            Ok(mut pool) => Some(std::mem::replace(&mut *pool, fresh)),
            Err(_) => None,
        };
        *self.inner.spawner.borrow_mut() = fresh_spawner;
        drop(cancelled);
        tracing::debug!(env = ?self.id(), "environment torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.get()
    }

    /// Run a collection outside of any entry.
    pub fn collect_garbage(&self) -> BridgeResult<GcStats> {
        self.inner.check_thread()?;
        Ok(self.inner.collect())
    }

    pub fn live_objects(&self) -> usize {
        self.inner.heap.borrow().live_count()
    }

    pub(crate) fn inner(&self) -> &Rc<EnvInner> {
        &self.inner
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.inner.id)
            .field("torn_down", &self.inner.torn_down.get())
            .finish()
    }
}

/// `globalThis` and the `Symbol` function with its well-known members.
fn install_globals(cx: &ExecutionContext) -> BridgeResult<()> {
    let global = cx.global()?;
    cx.define_value(global, "globalThis", global, PropertyFlags::HIDDEN)?;

    let symbol = cx.function(
        "Symbol",
        NativeFn::new(|call: &mut CallContext<'_>| {
            let description: Option<String> = call.arg(0)?;
            let symbol = call.context().symbol(description.as_deref())?;
            call.set_return(symbol);
            Ok(())
        }),
    )?;

    for name in WELL_KNOWN_SYMBOLS {
        let well_known = cx.symbol(Some(&format!("Symbol.{name}")))?;
        cx.define_value(symbol, *name, well_known, PropertyFlags::empty())?;
    }

    let symbol_for = cx.function(
        "for",
        NativeFn::new(|call: &mut CallContext<'_>| {
            let key: String = call.arg(0)?;
            let symbol = call.context().symbol_for(&key)?;
            call.set_return(symbol);
            Ok(())
        }),
    )?;
    cx.define_value(symbol, "for", symbol_for, PropertyFlags::HIDDEN)?;

    let key_for = cx.function(
        "keyFor",
        NativeFn::new(|call: &mut CallContext<'_>| {
            let cx = call.context();
            let value = call.arg_handle(0)?;
            if !matches!(cx.value(value)?, HostValue::Symbol(_)) {
                return Err(BridgeError::Thrown(HostException::type_error(format!(
                    "{} is not a symbol",
                    cx.describe(value)?
                ))));
            }
            let key = cx.symbol_key_for(value)?;
            call.set_return_value(&key)?;
            Ok(())
        }),
    )?;
    cx.define_value(symbol, "keyFor", key_for, PropertyFlags::HIDDEN)?;

    cx.define_value(global, "Symbol", symbol, PropertyFlags::HIDDEN)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = Environment::new(EnvironmentConfig::default()).unwrap();
        let b = Environment::new(EnvironmentConfig::default()).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn thread_token() {
        let token = ThreadToken::current();
        assert!(token.is_current());
        let other = thread::spawn(ThreadToken::current).join().unwrap();
        assert!(!other.is_current());
    }

    #[test]
    fn globals_survive_collection() {
        let env = Environment::new(EnvironmentConfig::default()).unwrap();
        let before = env.live_objects();
        let stats = env.collect_garbage().unwrap();
        assert_eq!(stats.freed, 0);
        assert_eq!(env.live_objects(), before);
    }

    #[test]
    fn teardown_refuses_entry() {
        let env = Environment::new(EnvironmentConfig::default()).unwrap();
        env.teardown();
        assert!(env.is_torn_down());
        assert!(matches!(
            env.enter(|_cx: &ExecutionContext| Ok(())),
            Err(BridgeError::EnvironmentTornDown)
        ));
        assert!(matches!(
            env.run_until_stalled(),
            Err(BridgeError::EnvironmentTornDown)
        ));
    }

    #[test]
    fn auto_collect_at_outermost_exit() {
        let env = Environment::new(EnvironmentConfig::new().with_gc_threshold(4)).unwrap();
        let baseline = env.live_objects();
        env.enter(|cx: &ExecutionContext| {
            for _ in 0..8 {
                cx.object()?;
            }
            Ok(())
        })
        .unwrap();
        assert_eq!(env.live_objects(), baseline);
    }

    #[test]
    fn object_limit_applies() {
        let env = Environment::new(EnvironmentConfig::new().with_max_objects(64)).unwrap();
        let result: BridgeResult<()> = env.enter(|cx: &ExecutionContext| {
            loop {
                cx.object()?;
            }
        });
        assert!(matches!(result, Err(BridgeError::ResourceExhausted { resource: "objects", limit: 64 })));
    }
}
