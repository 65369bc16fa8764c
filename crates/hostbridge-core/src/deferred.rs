//! Host promises settled from native code.
//!
//! [`ExecutionContext::deferred`] creates a pending promise together with a
//! [`Deferred`] completion. The completion holds only a persistent reference,
//! so it can travel across suspension points of a native future. Settling it
//! re-enters the environment; if the environment has been torn down in the
//! meantime, settling is a logged no-op that reports `EnvironmentTornDown`.

use std::fmt;
use std::future::Future;

use futures::task::LocalSpawnExt;

use crate::context::{self, ExecutionContext};
use crate::convert::ToHost;
use crate::error::{BridgeError, BridgeResult};
use crate::handle::{Persistent, ValueHandle};
use crate::host::object::{HostObject, ObjectKind, PromiseSlot};
use crate::host::HostValue;

/// Observable state of a host promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromiseState {
    Pending,
    Fulfilled(ValueHandle),
    Rejected(ValueHandle),
}

/// One-shot completion of a host promise.
pub struct Deferred {
    promise: Persistent,
}

impl Deferred {
    /// Fulfil the promise with `value`. A failed conversion rejects it instead.
    pub fn resolve<V: ToHost + ?Sized>(self, value: &V) -> BridgeResult<()> {
        self.settle(|cx: &ExecutionContext| match value.to_host(cx) {
            Ok(handle) => Ok((handle, true)),
            Err(err) => Ok((cx.error_object(&err)?, false)),
        })
    }

    /// Reject the promise with the host error object for `error`.
    pub fn reject(self, error: &BridgeError) -> BridgeResult<()> {
        self.settle(|cx: &ExecutionContext| Ok((cx.error_object(error)?, false)))
    }

    /// Reject the promise with an arbitrary value.
    pub fn reject_with<V: ToHost + ?Sized>(self, value: &V) -> BridgeResult<()> {
        self.settle(|cx: &ExecutionContext| Ok((value.to_host(cx)?, false)))
    }

    /// Resolve or reject from a native result.
    pub fn complete<V: ToHost>(self, result: BridgeResult<V>) -> BridgeResult<()> {
        match result {
            Ok(value) => self.resolve(&value),
            Err(err) => self.reject(&err),
        }
    }

    /// Whether settling could still reach the environment.
    pub fn is_alive(&self) -> bool {
        self.promise.is_alive()
    }

    fn settle(
        self,
        make: impl FnOnce(&ExecutionContext) -> BridgeResult<(ValueHandle, bool)>,
    ) -> BridgeResult<()> {
        let Some(env) = self.promise.environment().upgrade() else {
            tracing::warn!("completion arrived after its environment was dropped");
            return Err(BridgeError::EnvironmentTornDown);
        };
        if env.torn_down.get() {
            tracing::warn!(env = ?env.id, "completion arrived after teardown");
            return Err(BridgeError::EnvironmentTornDown);
        }

        context::enter(&env, |cx: &ExecutionContext| {
            let promise = self.promise.get(cx)?;
            let (value, fulfilled) = make(cx)?;
            let value = cx.value(value)?;
            let HostValue::Object(id) = cx.value(promise)? else {
                return Err(BridgeError::InvalidObject);
            };
            let mut heap = cx.env.heap.borrow_mut();
            if let ObjectKind::Promise(slot) = &mut heap.get_mut(id)?.kind
                && *slot == PromiseSlot::Pending
            {
                *slot = if fulfilled {
                    PromiseSlot::Fulfilled(value)
                } else {
                    PromiseSlot::Rejected(value)
                };
            }
            Ok(())
        })
    }
}

impl fmt::Debug for Deferred {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred").field("promise", &self.promise).finish()
    }
}

impl ExecutionContext {
    /// A pending promise and the completion that settles it.
    pub fn deferred(&self) -> BridgeResult<(Deferred, ValueHandle)> {
        let id = self
            .env
            .heap
            .borrow_mut()
            .allocate(HostObject::new(ObjectKind::Promise(PromiseSlot::Pending), None))?;
        let promise = self.alloc(HostValue::Object(id))?;
        let deferred = Deferred {
            promise: self.persist(promise)?,
        };
        Ok((deferred, promise))
    }

    pub fn promise_state(&self, promise: ValueHandle) -> BridgeResult<PromiseState> {
        let HostValue::Object(id) = self.value(promise)? else {
            return Err(crate::ConversionError::type_mismatch("promise", self.value_type(promise)?.name()).into());
        };
        let slot = match &self.env.heap.borrow().get(id)?.kind {
            ObjectKind::Promise(slot) => slot.clone(),
            _ => {
                return Err(crate::ConversionError::type_mismatch("promise", "object").into());
            }
        };
        Ok(match slot {
            PromiseSlot::Pending => PromiseState::Pending,
            PromiseSlot::Fulfilled(value) => PromiseState::Fulfilled(self.alloc(value)?),
            PromiseSlot::Rejected(value) => PromiseState::Rejected(self.alloc(value)?),
        })
    }

    /// Run `future` on the environment's local executor.
    ///
    /// The future must not capture handles or contexts; carry `Persistent`
    /// or `Deferred` values across suspension points instead.
    pub fn spawn_local(&self, future: impl Future<Output = ()> + 'static) -> BridgeResult<()> {
        self.env.check_live()?;
        self.env
            .spawner
            .borrow()
            .spawn_local(future)
            .map_err(|_| BridgeError::EnvironmentTornDown)
    }

    /// Create a promise settled by the result of `future`.
    pub fn promise_from_future<V, F>(&self, future: F) -> BridgeResult<ValueHandle>
    where
        V: ToHost + 'static,
        F: Future<Output = BridgeResult<V>> + 'static,
    {
        let (deferred, promise) = self.deferred()?;
        self.spawn_local(async move {
            let result = future.await;
            if let Err(err) = deferred.complete(result) {
                tracing::debug!(error = %err, "promise completion dropped");
            }
        })?;
        Ok(promise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExceptionKind;
    use crate::{Environment, EnvironmentConfig};

    fn env() -> Environment {
        Environment::new(EnvironmentConfig::default()).unwrap()
    }

    #[test]
    fn resolve_fulfils_promise() {
        let env = env();
        env.enter(|cx: &ExecutionContext| {
            let (deferred, promise) = cx.deferred()?;
            assert_eq!(cx.promise_state(promise)?, PromiseState::Pending);
            deferred.resolve("done")?;
            let PromiseState::Fulfilled(value) = cx.promise_state(promise)? else {
                panic!("promise not fulfilled");
            };
            assert_eq!(cx.as_string(value)?, "done");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn reject_uses_error_object() {
        let env = env();
        env.enter(|cx: &ExecutionContext| {
            let (deferred, promise) = cx.deferred()?;
            deferred.reject(&BridgeError::unsupported("capture"))?;
            let PromiseState::Rejected(reason) = cx.promise_state(promise)? else {
                panic!("promise not rejected");
            };
            assert!(cx.is_error(reason)?);
            let name = cx.get(reason, "name")?;
            assert_eq!(cx.as_string(name)?, ExceptionKind::Error.name());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn promise_survives_collection_while_pending() {
        let env = env();
        let deferred = env
            .enter(|cx: &ExecutionContext| Ok(cx.deferred()?.0))
            .unwrap();
        env.collect_garbage().unwrap();
        assert!(deferred.is_alive());
        deferred.resolve(&1).unwrap();
    }

    #[test]
    fn spawned_future_settles_promise() {
        let env = env();
        let promise = env
            .enter(|cx: &ExecutionContext| {
                let promise = cx.promise_from_future(async { Ok::<_, BridgeError>(40 + 2) })?;
                cx.persist(promise)
            })
            .unwrap();

        env.run_until_stalled().unwrap();
        env.enter(|cx: &ExecutionContext| {
            let promise = promise.get(cx)?;
            let PromiseState::Fulfilled(value) = cx.promise_state(promise)? else {
                panic!("promise not fulfilled");
            };
            assert_eq!(cx.as_number(value)?, 42.0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn teardown_cancels_completion() {
        let env = env();
        let deferred = env
            .enter(|cx: &ExecutionContext| Ok(cx.deferred()?.0))
            .unwrap();
        env.teardown();
        assert!(!deferred.is_alive());
        assert!(matches!(
            deferred.resolve(&1),
            Err(BridgeError::EnvironmentTornDown)
        ));
    }

    #[test]
    fn completion_after_drop_is_inert() {
        let env = env();
        let deferred = env
            .enter(|cx: &ExecutionContext| Ok(cx.deferred()?.0))
            .unwrap();
        drop(env);
        assert!(matches!(
            deferred.reject(&BridgeError::StaleHandle),
            Err(BridgeError::EnvironmentTornDown)
        ));
    }

    #[test]
    fn settled_promise_ignores_second_settlement() {
        let env = env();
        env.enter(|cx: &ExecutionContext| {
            let (first, promise) = cx.deferred()?;
            first.resolve(&1)?;
            let (second, _) = cx.deferred()?;
            second.resolve(&2)?;
            let PromiseState::Fulfilled(value) = cx.promise_state(promise)? else {
                panic!("promise not fulfilled");
            };
            assert_eq!(cx.as_number(value)?, 1.0);
            Ok(())
        })
        .unwrap();
    }
}
