//! Generational object heap with a mark-sweep collector.

use std::fmt;

use super::object::HostObject;
use super::value::ObjectId;
use crate::error::{BridgeError, BridgeResult};

/// Storage for every host object of one environment.
///
/// Freed slots are reused with a bumped generation, so ids captured before
/// a collection are detected as dead rather than aliasing a new object.
pub(crate) struct Heap {
    slots: Vec<HeapSlot>,
    free_list: Vec<u32>,
    live: usize,
    max_objects: Option<usize>,
    allocated_since_gc: usize,
}

struct HeapSlot {
    generation: u32,
    object: Option<HostObject>,
    marked: bool,
}

impl Heap {
    pub fn new(max_objects: Option<usize>) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
            max_objects,
            allocated_since_gc: 0,
        }
    }

    pub fn allocate(&mut self, object: HostObject) -> BridgeResult<ObjectId> {
        if let Some(limit) = self.max_objects
            && self.live >= limit
        {
            return Err(BridgeError::ResourceExhausted { resource: "objects", limit });
        }
        self.live += 1;
        self.allocated_since_gc += 1;

        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            slot.marked = false;
            Ok(ObjectId::new(index, slot.generation))
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(HeapSlot {
                generation: 0,
                object: Some(object),
                marked: false,
            });
            Ok(ObjectId::new(index, 0))
        }
    }

    pub fn get(&self, id: ObjectId) -> BridgeResult<&HostObject> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.object.as_ref())
            .ok_or(BridgeError::InvalidObject)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> BridgeResult<&mut HostObject> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.object.as_mut())
            .ok_or(BridgeError::InvalidObject)
    }

    pub fn is_live(&self, id: ObjectId) -> bool {
        self.get(id).is_ok()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn allocated_since_gc(&self) -> usize {
        self.allocated_since_gc
    }

    /// Mark everything reachable from `roots`, then sweep the rest.
    ///
    /// Swept objects are handed back instead of dropped so the caller can
    /// run payload finalizers once the heap borrow is released.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = ObjectId>) -> Vec<HostObject> {
        let mut worklist: Vec<ObjectId> = roots.into_iter().collect();
        while let Some(id) = worklist.pop() {
            let Some(slot) = self.slots.get_mut(id.index as usize) else {
                continue;
            };
            if slot.generation != id.generation || slot.marked {
                continue;
            }
            slot.marked = true;
            if let Some(object) = &slot.object {
                object.trace(&mut worklist);
            }
        }

        let mut freed = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
                continue;
            }
            freed.extend(slot.object.take());
            slot.generation = slot.generation.wrapping_add(1);
            self.free_list.push(index as u32);
        }

        self.live -= freed.len();
        self.allocated_since_gc = 0;
        freed
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("slot_count", &self.slots.len())
            .field("free_count", &self.free_list.len())
            .field("live", &self.live)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::object::{ObjectKind, PropertyFlags, Property};
    use crate::host::value::HostValue;

    fn linked(heap: &mut Heap, target: ObjectId) -> ObjectId {
        let mut object = HostObject::ordinary();
        object.define(
            "next".into(),
            Property::data(HostValue::Object(target), PropertyFlags::DEFAULT),
        );
        heap.allocate(object).unwrap()
    }

    #[test]
    fn allocate_and_get() {
        let mut heap = Heap::new(None);
        let id = heap.allocate(HostObject::ordinary()).unwrap();
        assert!(heap.get(id).is_ok());
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn unreachable_objects_are_swept() {
        let mut heap = Heap::new(None);
        let kept = heap.allocate(HostObject::ordinary()).unwrap();
        let dropped = heap.allocate(HostObject::ordinary()).unwrap();

        let freed = heap.collect([kept]);
        assert_eq!(freed.len(), 1);
        assert!(heap.is_live(kept));
        assert!(!heap.is_live(dropped));
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn reachability_is_transitive() {
        let mut heap = Heap::new(None);
        let leaf = heap.allocate(HostObject::ordinary()).unwrap();
        let middle = linked(&mut heap, leaf);
        let root = linked(&mut heap, middle);

        assert!(heap.collect([root]).is_empty());
        assert!(heap.is_live(leaf));
    }

    #[test]
    fn cycles_are_collected() {
        let mut heap = Heap::new(None);
        let a = heap.allocate(HostObject::ordinary()).unwrap();
        let b = linked(&mut heap, a);
        heap.get_mut(a).unwrap().define(
            "back".into(),
            Property::data(HostValue::Object(b), PropertyFlags::DEFAULT),
        );

        assert_eq!(heap.collect([]).len(), 2);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn reused_slot_invalidates_old_id() {
        let mut heap = Heap::new(None);
        let old = heap.allocate(HostObject::ordinary()).unwrap();
        heap.collect([]);

        let new = heap.allocate(HostObject::new(ObjectKind::Array(Vec::new()), None)).unwrap();
        assert_eq!(old.index, new.index);
        assert_ne!(old.generation, new.generation);
        assert!(matches!(heap.get(old), Err(BridgeError::InvalidObject)));
    }

    #[test]
    fn object_limit() {
        let mut heap = Heap::new(Some(2));
        heap.allocate(HostObject::ordinary()).unwrap();
        heap.allocate(HostObject::ordinary()).unwrap();
        assert!(matches!(
            heap.allocate(HostObject::ordinary()),
            Err(BridgeError::ResourceExhausted { limit: 2, .. })
        ));

        heap.collect([]);
        assert!(heap.allocate(HostObject::ordinary()).is_ok());
    }
}
