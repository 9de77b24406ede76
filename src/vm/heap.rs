use std::fmt;

use tracing::trace;

use super::Value;
use super::error::{VmError, VmResult};

// =============================================================================
// Size accounting
// =============================================================================
//
// The budget is tracked in bytes against an estimate of each object's
// footprint, independent of the host allocator:
//
// +----------------+-------------------------------------+
// | Header (16 B)  | Record: 16 B per field              |
// |                | Bytes:   1 B per element            |
// +----------------+-------------------------------------+

/// Fixed per-object overhead charged against the heap budget.
pub const OBJECT_HEADER_BYTES: usize = 16;

/// Budget charge for one record field.
pub const FIELD_BYTES: usize = 16;

/// Compute the budget charge of an object, or `None` on overflow.
fn object_size_bytes(kind: ObjectKind, len: usize) -> Option<usize> {
    let payload = match kind {
        ObjectKind::Record => len.checked_mul(FIELD_BYTES)?,
        ObjectKind::Bytes => len,
    };
    payload.checked_add(OBJECT_HEADER_BYTES)
}

// =============================================================================
// HeapHandle
// =============================================================================

/// Opaque, generation-checked reference to a heap object.
///
/// The index names a slot in the arena; the generation must match the slot's
/// current generation for the handle to resolve. Freeing an object bumps the
/// slot generation, so every outstanding handle to it becomes detectably stale.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapHandle {
    index: u32,
    generation: u32,
}

impl HeapHandle {
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for HeapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HeapHandle({}.{})", self.index, self.generation)
    }
}

impl fmt::Display for HeapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

// =============================================================================
// HeapObject
// =============================================================================

/// Type tag of a heap object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Fixed number of Value fields.
    Record,
    /// Raw byte payload; elements read back as `Int(0..=255)`.
    Bytes,
}

impl ObjectKind {
    pub fn name(self) -> &'static str {
        match self {
            ObjectKind::Record => "record",
            ObjectKind::Bytes => "bytes",
        }
    }
}

#[derive(Debug, Clone)]
enum Payload {
    Fields(Vec<Value>),
    Bytes(Vec<u8>),
}

/// An object owned by the heap. Only reachable from outside through a
/// [`HeapHandle`].
#[derive(Debug, Clone)]
pub struct HeapObject {
    payload: Payload,
}

impl HeapObject {
    fn new(kind: ObjectKind, len: usize) -> Self {
        let payload = match kind {
            ObjectKind::Record => Payload::Fields(vec![Value::Null; len]),
            ObjectKind::Bytes => Payload::Bytes(vec![0; len]),
        };
        Self { payload }
    }

    pub fn kind(&self) -> ObjectKind {
        match self.payload {
            Payload::Fields(_) => ObjectKind::Record,
            Payload::Bytes(_) => ObjectKind::Bytes,
        }
    }

    pub fn len(&self) -> usize {
        match &self.payload {
            Payload::Fields(fields) => fields.len(),
            Payload::Bytes(bytes) => bytes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read one element, or `None` when `field` is out of range.
    pub fn get(&self, field: usize) -> Option<Value> {
        match &self.payload {
            Payload::Fields(fields) => fields.get(field).copied(),
            Payload::Bytes(bytes) => bytes.get(field).map(|b| Value::Int(*b as i64)),
        }
    }

    fn set(&mut self, field: usize, value: Value) -> VmResult<()> {
        let len = self.len();
        match &mut self.payload {
            Payload::Fields(fields) => {
                let slot = fields
                    .get_mut(field)
                    .ok_or(VmError::FieldOutOfRange { field, len })?;
                *slot = value;
            }
            Payload::Bytes(bytes) => {
                let slot = bytes
                    .get_mut(field)
                    .ok_or(VmError::FieldOutOfRange { field, len })?;
                let byte = match value {
                    Value::Int(n) => u8::try_from(n).map_err(|_| VmError::TypeMismatch {
                        op: "byte store (0..=255)",
                        found: "int",
                    })?,
                    other => {
                        return Err(VmError::TypeMismatch {
                            op: "byte store",
                            found: other.type_name(),
                        });
                    }
                };
                *slot = byte;
            }
        }
        Ok(())
    }

    fn size_bytes(&self) -> usize {
        // Sizes were validated at allocation time.
        object_size_bytes(self.kind(), self.len()).unwrap_or(usize::MAX)
    }
}

// =============================================================================
// ObjectHeap trait
// =============================================================================

/// Capability interface of the managed heap.
///
/// The run loop only talks to the heap through this trait, so alternate
/// backings can be dropped in without touching dispatch.
pub trait ObjectHeap {
    /// Allocate an object of `kind` with `size` elements.
    fn allocate(&mut self, kind: ObjectKind, size: usize) -> VmResult<HeapHandle>;

    fn read(&self, handle: HeapHandle, field: usize) -> VmResult<Value>;

    fn write(&mut self, handle: HeapHandle, field: usize, value: Value) -> VmResult<()>;

    /// Release an object. The handle, and every copy of it, is invalid afterwards.
    fn free(&mut self, handle: HeapHandle) -> VmResult<()>;

    /// Number of elements in the object.
    fn len(&self, handle: HeapHandle) -> VmResult<usize>;

    fn is_live(&self, handle: HeapHandle) -> bool;

    fn live_objects(&self) -> usize;

    fn bytes_in_use(&self) -> usize;

    /// Byte budget that allocations are charged against.
    fn budget(&self) -> usize;

    /// Drop every object at once. Outstanding handles become invalid.
    fn clear(&mut self);
}

// =============================================================================
// Heap (generation-checked arena)
// =============================================================================

#[derive(Debug)]
struct Slot {
    generation: u32,
    object: Option<HeapObject>,
}

/// Arena heap with explicit `free` and generation-checked handles.
///
/// Freed slots are recycled through a free list with their generation bumped.
/// A slot whose generation would wrap is retired instead of recycled, so a
/// stale handle can never alias a newer object.
#[derive(Debug)]
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<u32>,
    live: usize,
    bytes_used: usize,
    budget: usize,
}

impl Heap {
    /// Create a heap that may hold at most `budget` bytes of objects.
    pub fn new(budget: usize) -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
            live: 0,
            bytes_used: 0,
            budget,
        }
    }

    /// Borrow a live object.
    pub fn get(&self, handle: HeapHandle) -> Option<&HeapObject> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.object.as_ref()
    }

    fn get_mut(&mut self, handle: HeapHandle) -> VmResult<&mut HeapObject> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.object.as_mut())
            .ok_or(VmError::InvalidHeapHandle(handle))
    }

    fn check_budget(&self, requested: usize) -> VmResult<()> {
        match self.bytes_used.checked_add(requested) {
            Some(total) if total <= self.budget => Ok(()),
            _ => Err(VmError::OutOfMemory {
                requested,
                budget: self.budget,
            }),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024)
    }
}

impl ObjectHeap for Heap {
    fn allocate(&mut self, kind: ObjectKind, size: usize) -> VmResult<HeapHandle> {
        let requested = object_size_bytes(kind, size).ok_or(VmError::OutOfMemory {
            requested: usize::MAX,
            budget: self.budget,
        })?;
        self.check_budget(requested)?;

        let index = match self.free_list.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).map_err(|_| VmError::OutOfMemory {
                    requested,
                    budget: self.budget,
                })?;
                self.slots.push(Slot {
                    generation: 0,
                    object: None,
                });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        debug_assert!(slot.object.is_none(), "free list returned an occupied slot");
        slot.object = Some(HeapObject::new(kind, size));
        self.live += 1;
        self.bytes_used += requested;

        let handle = HeapHandle::new(index, slot.generation);
        trace!(%handle, kind = kind.name(), size, "heap allocate");
        Ok(handle)
    }

    fn read(&self, handle: HeapHandle, field: usize) -> VmResult<Value> {
        let object = self.get(handle).ok_or(VmError::InvalidHeapHandle(handle))?;
        object.get(field).ok_or(VmError::FieldOutOfRange {
            field,
            len: object.len(),
        })
    }

    fn write(&mut self, handle: HeapHandle, field: usize, value: Value) -> VmResult<()> {
        self.get_mut(handle)?.set(field, value)
    }

    fn free(&mut self, handle: HeapHandle) -> VmResult<()> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation && slot.object.is_some())
            .ok_or(VmError::InvalidHeapHandle(handle))?;

        let size = slot.object.take().map(|o| o.size_bytes()).unwrap_or(0);
        self.live -= 1;
        self.bytes_used = self.bytes_used.saturating_sub(size);

        // A slot whose generation space is exhausted is never recycled.
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free_list.push(handle.index);
        }
        trace!(%handle, "heap free");
        Ok(())
    }

    fn len(&self, handle: HeapHandle) -> VmResult<usize> {
        self.get(handle)
            .map(HeapObject::len)
            .ok_or(VmError::InvalidHeapHandle(handle))
    }

    fn is_live(&self, handle: HeapHandle) -> bool {
        self.get(handle).is_some()
    }

    fn live_objects(&self) -> usize {
        self.live
    }

    fn bytes_in_use(&self) -> usize {
        self.bytes_used
    }

    fn budget(&self) -> usize {
        self.budget
    }

    fn clear(&mut self) {
        self.free_list.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            slot.object = None;
            if let Some(next) = slot.generation.checked_add(1) {
                slot.generation = next;
                self.free_list.push(index as u32);
            }
        }
        self.free_list.reverse();
        self.live = 0;
        self.bytes_used = 0;
    }
}
