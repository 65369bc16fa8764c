//! Per-environment class registry and wrapped native payloads.
//!
//! A native type becomes a host class by registering a constructor function
//! and a prototype for it. Each host object made by that class owns exactly
//! one payload, stored as `Rc<RefCell<T>>` inside the object. When the
//! collector reclaims the object, the class finalizer runs once and the
//! payload reference is released.

use std::any::{Any, TypeId};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::context::ExecutionContext;
use crate::convert::{FromHost, ToHost};
use crate::error::{BridgeError, BridgeResult, ConversionError};
use crate::handle::ValueHandle;
use crate::host::object::{HostObject, ObjectKind, PayloadFinalizer, WrappedPayload};
use crate::host::{HostValue, ObjectId};

/// A native type exposed as a host class.
pub trait NativeClass: 'static {
    /// Host-visible class name.
    const NAME: &'static str;
}

/// Index of a class within its environment's registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClassId(u32);

/// Binding state of a native type in one environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassState {
    Unbound,
    Registered,
}

/// Lifetime counters for one class.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ClassStats {
    pub constructed: usize,
    pub finalized: usize,
}

impl ClassStats {
    pub fn live(&self) -> usize {
        self.constructed - self.finalized
    }
}

struct ClassRecord {
    name: &'static str,
    constructor: ObjectId,
    prototype: ObjectId,
    finalizer: Option<PayloadFinalizer>,
    stats: ClassStats,
}

#[derive(Default)]
pub(crate) struct ClassRegistry {
    by_type: FxHashMap<TypeId, ClassId>,
    records: Vec<ClassRecord>,
    /// Payload address to the live instance that owns it.
    bound: FxHashMap<usize, ObjectId>,
}

fn payload_key<P: ?Sized>(payload: &Rc<P>) -> usize {
    Rc::as_ptr(payload) as *const () as usize
}

impl ClassRegistry {
    fn lookup<T: NativeClass>(&self) -> Option<(ClassId, &ClassRecord)> {
        let id = *self.by_type.get(&TypeId::of::<T>())?;
        Some((id, &self.records[id.0 as usize]))
    }

    /// Constructors and prototypes stay alive as long as the environment.
    pub fn rooted_objects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.records
            .iter()
            .flat_map(|record| [record.constructor, record.prototype])
    }

    /// Count a finalized instance and unbind its payload.
    pub fn record_finalized(&mut self, id: ClassId, payload: &Rc<dyn Any>) {
        self.bound.remove(&payload_key(payload));
        if let Some(record) = self.records.get_mut(id.0 as usize) {
            record.stats.finalized += 1;
        }
    }

    pub fn name(&self, id: ClassId) -> Option<&'static str> {
        self.records.get(id.0 as usize).map(|record| record.name)
    }
}

impl ExecutionContext {
    /// Bind `T` to `constructor` and `prototype` in this environment.
    ///
    /// `finalize` runs on the payload when the collector reclaims an
    /// instance. A type can be registered once per environment.
    pub fn register_class<T: NativeClass>(
        &self,
        constructor: ValueHandle,
        prototype: ValueHandle,
        finalize: Option<Rc<dyn Fn(&mut T)>>,
    ) -> BridgeResult<ClassId> {
        if self.class_state::<T>() == ClassState::Registered {
            return Err(BridgeError::AlreadyRegistered {
                class: T::NAME.to_string(),
            });
        }
        let (HostValue::Object(constructor), HostValue::Object(prototype)) =
            (self.value(constructor)?, self.value(prototype)?)
        else {
            return Err(BridgeError::construction(T::NAME, "constructor and prototype must be objects"));
        };

        let finalizer = finalize.map(|hook| -> PayloadFinalizer {
            Rc::new(move |payload: &Rc<dyn Any>| {
                if let Some(cell) = payload.downcast_ref::<RefCell<T>>() {
                    match cell.try_borrow_mut() {
                        Ok(mut value) => hook(&mut *value),
                        Err(_) => tracing::warn!(class = T::NAME, "payload borrowed during finalization"),
                    }
                }
            })
        });

        let mut classes = self.env.classes.borrow_mut();
        let id = ClassId(classes.records.len() as u32);
        classes.records.push(ClassRecord {
            name: T::NAME,
            constructor,
            prototype,
            finalizer,
            stats: ClassStats::default(),
        });
        classes.by_type.insert(TypeId::of::<T>(), id);
        tracing::debug!(class = T::NAME, env = ?self.environment_id(), "class registered");
        Ok(id)
    }

    pub fn class_state<T: NativeClass>(&self) -> ClassState {
        if self.env.classes.borrow().lookup::<T>().is_some() {
            ClassState::Registered
        } else {
            ClassState::Unbound
        }
    }

    fn class_objects<T: NativeClass>(&self) -> BridgeResult<(ClassId, ObjectId, ObjectId)> {
        self.env
            .classes
            .borrow()
            .lookup::<T>()
            .map(|(id, record)| (id, record.constructor, record.prototype))
            .ok_or_else(|| BridgeError::ClassNotRegistered {
                class: T::NAME.to_string(),
            })
    }

    /// The registered constructor function of `T`.
    pub fn class_constructor<T: NativeClass>(&self) -> BridgeResult<ValueHandle> {
        let (_, constructor, _) = self.class_objects::<T>()?;
        self.alloc(HostValue::Object(constructor))
    }

    pub fn class_prototype<T: NativeClass>(&self) -> BridgeResult<ValueHandle> {
        let (_, _, prototype) = self.class_objects::<T>()?;
        self.alloc(HostValue::Object(prototype))
    }

    pub fn class_stats<T: NativeClass>(&self) -> Option<ClassStats> {
        self.env
            .classes
            .borrow()
            .lookup::<T>()
            .map(|(_, record)| record.stats)
    }

    /// The live instance already owning `payload`, if any.
    fn bound_instance<P: ?Sized>(&self, payload: &Rc<P>) -> Option<ObjectId> {
        let id = *self.env.classes.borrow().bound.get(&payload_key(payload))?;
        self.env.heap.borrow().get(id).ok().map(|_| id)
    }

    /// Turn an ordinary object into an instance of `T` owning `payload`.
    ///
    /// A payload belongs to at most one live instance.
    pub fn attach_payload<T: NativeClass>(
        &self,
        object: ValueHandle,
        payload: Rc<RefCell<T>>,
    ) -> BridgeResult<()> {
        let (class, _, _) = self.class_objects::<T>()?;
        let HostValue::Object(id) = self.value(object)? else {
            return Err(BridgeError::invalid_this(format!("{} payload needs an object", T::NAME)));
        };
        if self.bound_instance(&payload).is_some() {
            return Err(BridgeError::invalid_this(format!(
                "{} payload already belongs to another instance",
                T::NAME
            )));
        }
        let key = payload_key(&payload);
        let finalizer = self.env.classes.borrow().records[class.0 as usize].finalizer.clone();

        {
            let mut heap = self.env.heap.borrow_mut();
            let target = heap.get_mut(id)?;
            if !matches!(target.kind, ObjectKind::Ordinary) {
                return Err(BridgeError::invalid_this("object already carries a native payload"));
            }
            target.kind = ObjectKind::Wrapped(WrappedPayload {
                class,
                payload,
                finalizer,
            });
        }

        let mut classes = self.env.classes.borrow_mut();
        classes.bound.insert(key, id);
        if let Some(record) = classes.records.get_mut(class.0 as usize) {
            record.stats.constructed += 1;
        }
        Ok(())
    }

    /// The host instance of `T` around `payload`, without running the
    /// host-visible constructor. A payload that already has a live instance
    /// gets that instance back.
    pub fn instantiate<T: NativeClass>(&self, payload: Rc<RefCell<T>>) -> BridgeResult<ValueHandle> {
        let (_, _, prototype) = self.class_objects::<T>()?;
        if let Some(existing) = self.bound_instance(&payload) {
            return self.alloc(HostValue::Object(existing));
        }
        let id = self
            .env
            .heap
            .borrow_mut()
            .allocate(HostObject::new(ObjectKind::Ordinary, Some(prototype)))?;
        let object = self.alloc(HostValue::Object(id))?;
        self.attach_payload(object, payload)?;
        Ok(object)
    }

    /// The payload of an instance of `T`.
    pub fn payload<T: NativeClass>(&self, object: ValueHandle) -> BridgeResult<Rc<RefCell<T>>> {
        let (class, _, _) = self.class_objects::<T>()?;
        let payload = match self.value(object)? {
            HostValue::Object(id) => match &self.env.heap.borrow().get(id)?.kind {
                ObjectKind::Wrapped(wrapped) if wrapped.class == class => Some(wrapped.payload.clone()),
                _ => None,
            },
            _ => None,
        };
        payload
            .and_then(|payload| payload.downcast::<RefCell<T>>().ok())
            .ok_or_else(|| BridgeError::invalid_this(format!("receiver is not a {} instance", T::NAME)))
    }

    /// Class name of a wrapped object, if it carries a payload.
    pub fn class_name_of(&self, object: ValueHandle) -> BridgeResult<Option<&'static str>> {
        let HostValue::Object(id) = self.value(object)? else {
            return Ok(None);
        };
        let class = match &self.env.heap.borrow().get(id)?.kind {
            ObjectKind::Wrapped(wrapped) => wrapped.class,
            _ => return Ok(None),
        };
        Ok(self.env.classes.borrow().name(class))
    }
}

// ============================================================================
// Wrap / Instance
// ============================================================================

/// Converts to the host instance of `T` owning this payload.
///
/// The first conversion creates the instance; later ones return it for as
/// long as it is alive.
pub struct Wrap<T: NativeClass> {
    payload: Rc<RefCell<T>>,
}

impl<T: NativeClass> Wrap<T> {
    pub fn new(value: T) -> Self {
        Self {
            payload: Rc::new(RefCell::new(value)),
        }
    }

    pub fn from_shared(payload: Rc<RefCell<T>>) -> Self {
        Self { payload }
    }

    pub fn shared(&self) -> &Rc<RefCell<T>> {
        &self.payload
    }
}

impl<T: NativeClass> ToHost for Wrap<T> {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        cx.instantiate(self.payload.clone())
    }
}

impl<T: NativeClass + fmt::Debug> fmt::Debug for Wrap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Wrap").field(&self.payload).finish()
    }
}

/// A host instance of `T` received from the host.
pub struct Instance<T: NativeClass> {
    handle: ValueHandle,
    payload: Rc<RefCell<T>>,
}

impl<T: NativeClass> Instance<T> {
    /// The host object, valid for the scope it was read in.
    pub fn handle(&self) -> ValueHandle {
        self.handle
    }

    pub fn shared(&self) -> &Rc<RefCell<T>> {
        &self.payload
    }

    pub fn borrow(&self) -> BridgeResult<Ref<'_, T>> {
        self.payload.try_borrow().map_err(|_| BridgeError::PayloadBusy {
            class: T::NAME.to_string(),
        })
    }

    pub fn borrow_mut(&self) -> BridgeResult<RefMut<'_, T>> {
        self.payload
            .try_borrow_mut()
            .map_err(|_| BridgeError::PayloadBusy {
                class: T::NAME.to_string(),
            })
    }
}

impl<T: NativeClass> FromHost for Instance<T> {
    fn from_host(cx: &ExecutionContext, value: ValueHandle) -> BridgeResult<Self> {
        match cx.payload::<T>(value) {
            Ok(payload) => Ok(Self {
                handle: value,
                payload,
            }),
            Err(BridgeError::InvalidThis { .. }) => {
                let actual = cx.value_type(value)?;
                Err(ConversionError::type_mismatch(T::NAME, actual.name()).into())
            }
            Err(err) => Err(err),
        }
    }
}

impl<T: NativeClass> ToHost for Instance<T> {
    fn to_host(&self, cx: &ExecutionContext) -> BridgeResult<ValueHandle> {
        let value = cx.value(self.handle)?;
        cx.alloc(value)
    }
}
