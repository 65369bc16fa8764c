//! Scoped value handles and persistent roots.
//!
//! A [`ValueHandle`] is only meaningful while the handle scope that issued
//! it is open. Scopes form a stack per environment; each carries a unique
//! generation, and a handle records the generation it was issued in. Reading
//! a handle whose generation is no longer on the stack fails with
//! [`BridgeError::StaleHandle`].
//!
//! Values that must survive their scope are promoted to a [`Persistent`],
//! which roots the value until it is dropped.

use std::fmt;
use std::marker::PhantomData;
use std::rc::Weak;

use crate::context::ExecutionContext;
use crate::env::{EnvId, EnvInner};
use crate::error::{BridgeError, BridgeResult};
use crate::host::HostValue;

// ============================================================================
// ValueHandle
// ============================================================================

/// Scoped reference to a host value.
///
/// Copyable and cheap. Not `Send`: handles are confined to the thread of the
/// environment that issued them.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueHandle {
    env: EnvId,
    scope: u64,
    index: u32,
    _confined: PhantomData<*const ()>,
}

impl ValueHandle {
    pub(crate) fn new(env: EnvId, scope: u64, index: u32) -> Self {
        Self {
            env,
            scope,
            index,
            _confined: PhantomData,
        }
    }

    pub(crate) fn env(&self) -> EnvId {
        self.env
    }

    pub(crate) fn scope(&self) -> u64 {
        self.scope
    }

    pub(crate) fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Debug for ValueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueHandle({:?}@{}#{})", self.env, self.scope, self.index)
    }
}

// ============================================================================
// Scope stack
// ============================================================================

struct ScopeFrame {
    generation: u64,
    values: Vec<HostValue>,
}

/// Stack of open handle scopes. Generations increase monotonically, so the
/// frame list stays sorted and lookups can binary search.
pub(crate) struct ScopeStack {
    frames: Vec<ScopeFrame>,
    next_generation: u64,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            next_generation: 1,
        }
    }

    pub fn push(&mut self) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.frames.push(ScopeFrame {
            generation,
            values: Vec::new(),
        });
        generation
    }

    /// Close the scope `generation` and anything opened after it.
    pub fn pop(&mut self, generation: u64) {
        if let Some(pos) = self
            .frames
            .iter()
            .rposition(|frame| frame.generation == generation)
        {
            self.frames.truncate(pos);
        }
    }

    /// Store `value` in the innermost scope.
    pub fn alloc(&mut self, value: HostValue) -> Option<(u64, u32)> {
        let frame = self.frames.last_mut()?;
        let index = frame.values.len() as u32;
        frame.values.push(value);
        Some((frame.generation, index))
    }

    pub fn read(&self, generation: u64, index: u32) -> Option<&HostValue> {
        let pos = self
            .frames
            .binary_search_by_key(&generation, |frame| frame.generation)
            .ok()?;
        self.frames[pos].values.get(index as usize)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Every value held by an open scope.
    pub fn values(&self) -> impl Iterator<Item = &HostValue> {
        self.frames.iter().flat_map(|frame| frame.values.iter())
    }
}

// ============================================================================
// Persistent roots
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RootId(u32);

/// Values kept alive independently of any scope.
#[derive(Default)]
pub(crate) struct RootTable {
    slots: Vec<Option<HostValue>>,
    free: Vec<u32>,
}

impl RootTable {
    pub fn add(&mut self, value: HostValue) -> RootId {
        if let Some(index) = self.free.pop() {
            self.slots[index as usize] = Some(value);
            RootId(index)
        } else {
            self.slots.push(Some(value));
            RootId(self.slots.len() as u32 - 1)
        }
    }

    pub fn get(&self, id: RootId) -> Option<&HostValue> {
        self.slots.get(id.0 as usize)?.as_ref()
    }

    pub fn remove(&mut self, id: RootId) {
        if let Some(slot) = self.slots.get_mut(id.0 as usize)
            && slot.take().is_some()
        {
            self.free.push(id.0);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &HostValue> {
        self.slots.iter().flatten()
    }
}

/// A host value rooted beyond any handle scope.
///
/// Obtained through [`ExecutionContext::persist`]. The value stays reachable
/// for the collector until the `Persistent` is dropped. A persistent whose
/// environment is gone is inert.
pub struct Persistent {
    env: Weak<EnvInner>,
    env_id: EnvId,
    root: RootId,
    _confined: PhantomData<*const ()>,
}

impl Persistent {
    pub(crate) fn new(env: Weak<EnvInner>, env_id: EnvId, root: RootId) -> Self {
        Self {
            env,
            env_id,
            root,
            _confined: PhantomData,
        }
    }

    /// A fresh handle to the rooted value in the current scope of `cx`.
    pub fn get(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        if cx.environment_id() != self.env_id {
            return Err(BridgeError::ForeignHandle);
        }
        let value = cx
            .env
            .roots
            .borrow()
            .get(self.root)
            .cloned()
            .ok_or(BridgeError::StaleHandle)?;
        cx.alloc(value)
    }

    /// Whether the owning environment still exists and has not been torn down.
    pub fn is_alive(&self) -> bool {
        self.env
            .upgrade()
            .is_some_and(|env| !env.torn_down.get())
    }

    pub(crate) fn environment(&self) -> &Weak<EnvInner> {
        &self.env
    }
}

impl Drop for Persistent {
    fn drop(&mut self) {
        let Some(env) = self.env.upgrade() else {
            return;
        };
        match env.roots.try_borrow_mut() {
            Ok(mut roots) => roots.remove(self.root),
            Err(_) => tracing::warn!(root = ?self.root, "persistent released while roots were borrowed; leaking root"),
        }
    }
}

impl fmt::Debug for Persistent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Persistent")
            .field("env", &self.env_id)
            .field("root", &self.root)
            .finish()
    }
}
