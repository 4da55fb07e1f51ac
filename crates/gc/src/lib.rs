//! Hybrid reference-counted, tracing collector for objects shared between
//! otherwise isolated interpreter states.
//!
//! Each interpreter has its own heap and its own collector, so objects that
//! outlive any single interpreter need a separate owner. This crate provides
//! that owner: a [`Collector`] managing a flat arena of objects, where
//!
//! - external holders (interpreter handles, foreign code) are counted via an
//!   atomic refcount per object, and
//! - references *between* managed objects are recorded as non-owning edges
//!   and kept alive by a stop-the-world tri-color mark-sweep, so cycles of
//!   shared structures are reclaimed instead of leaking.
//!
//! Objects live in generation-checked slots and are addressed by [`ObjRef`]
//! handles rather than pointers; a handle that outlives its object fails a
//! generation check instead of aliasing whatever reused the slot.
//!
//! The collector is generic over its payload type. Payload `Drop` impls run
//! during the sweep phase and must not call back into the collector.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};


/// Trigger factor applied to the post-collection object count.
const DEFAULT_STEP: f64 = 2.0;
/// Lowest accepted trigger factor; anything smaller would re-trigger on
/// nearly every allocation.
const MIN_STEP: f64 = 1.01;
/// Baseline for the very first automatic collection.
const INITIAL_LAST_CLEANUP: usize = 100;
/// Edge buffers never shrink below this capacity.
const EDGES_MIN_CAPACITY: usize = 4;

/// Handle to a managed object.
///
/// Copyable and trivially comparable; the order is the object's slot
/// position, which doubles as record identity for aggregate value ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjRef {
	index: u32,
	generation: u32,
}

impl ObjRef {
	/// Stable bit pattern for display labels.
	pub fn bits(self) -> u64 {
		(u64::from(self.generation) << 32) | u64::from(self.index)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
	White,
	Gray,
	Black,
}

struct Slot<P> {
	/// Count of external holders. The creator starts with the only one;
	/// an object at zero survives only while an edge reaches it.
	ext_refs: AtomicUsize,
	/// Only meaningful while a collection is running.
	color: Color,
	/// Outgoing strong references. Duplicates are independent entries: each
	/// `add_edge` must be balanced by its own `remove_edge`.
	edges: Vec<ObjRef>,
	payload: P,
}

struct Entry<P> {
	generation: u32,
	slot: Option<Slot<P>>,
}

/// The collector's locked state: the object arena plus trigger settings.
///
/// Obtained through [`Collector::heap`] / [`Collector::heap_mut`]; multi-step
/// operations (container mutation, marshaling traversals) compose against a
/// single guard so the whole sequence observes one consistent heap.
pub struct Heap<P> {
	entries: Vec<Entry<P>>,
	free: Vec<u32>,
	live: usize,
	enabled: bool,
	step: f64,
	last_cleanup: usize,
}

impl<P> Heap<P> {
	fn new() -> Self {
		Self {
			entries: Vec::new(),
			free: Vec::new(),
			live: 0,
			enabled: true,
			step: DEFAULT_STEP,
			last_cleanup: INITIAL_LAST_CLEANUP,
		}
	}

	fn slot(&self, obj: ObjRef) -> &Slot<P> {
		let entry = self
			.entries
			.get(obj.index as usize)
			.expect("object reference out of range");
		assert_eq!(entry.generation, obj.generation, "stale object reference");
		entry.slot.as_ref().expect("stale object reference")
	}

	fn slot_mut(&mut self, obj: ObjRef) -> &mut Slot<P> {
		let entry = self
			.entries
			.get_mut(obj.index as usize)
			.expect("object reference out of range");
		assert_eq!(entry.generation, obj.generation, "stale object reference");
		entry.slot.as_mut().expect("stale object reference")
	}

	/// Whether `obj` still names a live object.
	pub fn contains(&self, obj: ObjRef) -> bool {
		self.entries
			.get(obj.index as usize)
			.is_some_and(|entry| entry.generation == obj.generation && entry.slot.is_some())
	}

	/// Borrows the payload of a live object. Panics on a stale handle.
	pub fn payload(&self, obj: ObjRef) -> &P {
		&self.slot(obj).payload
	}

	/// Mutably borrows the payload of a live object.
	pub fn payload_mut(&mut self, obj: ObjRef) -> &mut P {
		&mut self.slot_mut(obj).payload
	}

	/// Current external reference count of `obj`.
	pub fn ext_refs(&self, obj: ObjRef) -> usize {
		self.slot(obj).ext_refs.load(Ordering::SeqCst)
	}

	/// Adds one external reference. Atomic; usable under either guard.
	pub fn retain(&self, obj: ObjRef) {
		self.slot(obj).ext_refs.fetch_add(1, Ordering::SeqCst);
	}

	/// Drops one external reference. The object is not reclaimed here;
	/// an unreferenced, unreachable object falls to the next collection.
	pub fn release(&self, obj: ObjRef) {
		let old = self.slot(obj).ext_refs.fetch_sub(1, Ordering::SeqCst);
		assert!(old > 0, "release of object with zero external refs");
	}

	/// Outgoing edges of `obj`, duplicates included.
	pub fn edges(&self, obj: ObjRef) -> &[ObjRef] {
		&self.slot(obj).edges
	}

	/// Iterates over every live object handle.
	pub fn refs(&self) -> impl Iterator<Item = ObjRef> + '_ {
		self.entries.iter().enumerate().filter_map(|(index, entry)| {
			entry.slot.as_ref().map(|_| ObjRef {
				index: index as u32,
				generation: entry.generation,
			})
		})
	}

	/// Number of live managed objects.
	pub fn count(&self) -> usize {
		self.live
	}

	/// Whether automatic collection is currently enabled.
	pub fn enabled(&self) -> bool {
		self.enabled
	}

	pub fn set_enabled(&mut self, enabled: bool) {
		self.enabled = enabled;
	}

	/// Current trigger factor.
	pub fn step(&self) -> f64 {
		self.step
	}

	/// Sets the trigger factor, clamped to at least `1.01`.
	pub fn set_step(&mut self, step: f64) {
		self.step = if step > 1.0 { step } else { MIN_STEP };
	}

	/// Allocates a managed object with one external reference, held by the
	/// caller. May run a full collection first (see the trigger policy).
	pub fn create(&mut self, payload: P) -> ObjRef {
		if self.enabled && (self.live as f64) >= self.step * (self.last_cleanup as f64) {
			self.collect();
		}
		self.alloc(payload)
	}

	fn alloc(&mut self, payload: P) -> ObjRef {
		let slot = Slot {
			ext_refs: AtomicUsize::new(1),
			color: Color::White,
			edges: Vec::with_capacity(EDGES_MIN_CAPACITY),
			payload,
		};
		self.live += 1;
		if let Some(index) = self.free.pop() {
			let entry = &mut self.entries[index as usize];
			entry.slot = Some(slot);
			ObjRef {
				index,
				generation: entry.generation,
			}
		} else {
			let index = self.entries.len() as u32;
			self.entries.push(Entry {
				generation: 0,
				slot: Some(slot),
			});
			ObjRef {
				index,
				generation: 0,
			}
		}
	}

	/// Records a strong reference from `from` to `to`. Duplicates append.
	pub fn add_edge(&mut self, from: ObjRef, to: ObjRef) {
		assert!(self.contains(to), "edge target is stale");
		self.slot_mut(from).edges.push(to);
	}

	/// Removes one matching edge, if any, by swapping with the last entry.
	pub fn remove_edge(&mut self, from: ObjRef, to: ObjRef) {
		let edges = &mut self.slot_mut(from).edges;
		if let Some(position) = edges.iter().position(|edge| *edge == to) {
			edges.swap_remove(position);
		}
		if edges.len() * 3 < edges.capacity() && edges.capacity() > EDGES_MIN_CAPACITY {
			edges.shrink_to((edges.capacity() / 2).max(EDGES_MIN_CAPACITY));
		}
	}

	/// Runs a full tri-color mark-sweep and returns the number of objects
	/// reclaimed. Roots are the objects with at least one external ref.
	pub fn collect(&mut self) -> usize {
		if self.live == 0 {
			return 0;
		}

		let mut gray: Vec<u32> = Vec::with_capacity(self.live);
		for (index, entry) in self.entries.iter_mut().enumerate() {
			let Some(slot) = entry.slot.as_mut() else {
				continue;
			};
			if slot.ext_refs.load(Ordering::SeqCst) >= 1 {
				slot.color = Color::Gray;
				gray.push(index as u32);
			} else {
				slot.color = Color::White;
			}
		}

		// Propagate marks. Every edge slot is scanned, so duplicate edges
		// reach their target like any other entry.
		let mut cursor = 0;
		while cursor < gray.len() {
			let index = gray[cursor];
			cursor += 1;
			let mut edge = 0;
			loop {
				let target = {
					let slot = self.entries[index as usize]
						.slot
						.as_ref()
						.expect("marked slot vanished during trace");
					match slot.edges.get(edge) {
						Some(target) => *target,
						None => break,
					}
				};
				edge += 1;
				let target_slot = self.entries[target.index as usize]
					.slot
					.as_mut()
					.expect("edge target vanished during trace");
				if target_slot.color == Color::White {
					target_slot.color = Color::Gray;
					gray.push(target.index);
				}
			}
			self.entries[index as usize]
				.slot
				.as_mut()
				.expect("marked slot vanished during trace")
				.color = Color::Black;
		}

		// Sweep. Dropping a slot drops its payload; payloads hold only
		// ObjRef values toward other objects, so no collector reentry.
		let mut swept = 0;
		for (index, entry) in self.entries.iter_mut().enumerate() {
			let is_white = entry
				.slot
				.as_ref()
				.is_some_and(|slot| slot.color == Color::White);
			if is_white {
				entry.slot = None;
				entry.generation = entry.generation.wrapping_add(1);
				self.free.push(index as u32);
				swept += 1;
			}
		}
		self.live -= swept;
		self.last_cleanup = self.live;
		log::debug!("collect: swept {swept}, {} objects remain", self.live);
		swept
	}
}

/// Process-wide manager for shared objects.
///
/// One reader/writer lock guards the arena and all edge mutation; per-object
/// refcounts are atomics and work under either side of the lock. The lock
/// order throughout the system is collector first, then any container lock.
pub struct Collector<P> {
	heap: RwLock<Heap<P>>,
}

impl<P> Collector<P> {
	pub fn new() -> Self {
		Self {
			heap: RwLock::new(Heap::new()),
		}
	}

	/// Read access to the heap. Collection cannot run while held.
	pub fn heap(&self) -> RwLockReadGuard<'_, Heap<P>> {
		self.heap.read()
	}

	/// Exclusive access to the heap, for edge mutation and collection.
	pub fn heap_mut(&self) -> RwLockWriteGuard<'_, Heap<P>> {
		self.heap.write()
	}

	/// Allocates a managed object; the caller holds its one external ref.
	pub fn create(&self, payload: P) -> ObjRef {
		self.heap_mut().create(payload)
	}

	pub fn retain(&self, obj: ObjRef) {
		self.heap().retain(obj);
	}

	pub fn release(&self, obj: ObjRef) {
		self.heap().release(obj);
	}

	pub fn add_edge(&self, from: ObjRef, to: ObjRef) {
		self.heap_mut().add_edge(from, to);
	}

	pub fn remove_edge(&self, from: ObjRef, to: ObjRef) {
		self.heap_mut().remove_edge(from, to);
	}

	/// Runs a full collection and returns the number of objects reclaimed.
	pub fn collect(&self) -> usize {
		self.heap_mut().collect()
	}

	/// Disables the automatic trigger; `create` stops collecting.
	pub fn pause(&self) {
		self.heap_mut().set_enabled(false);
	}

	/// Re-enables the automatic trigger.
	pub fn resume(&self) {
		self.heap_mut().set_enabled(true);
	}

	pub fn is_enabled(&self) -> bool {
		self.heap().enabled()
	}

	pub fn step(&self) -> f64 {
		self.heap().step()
	}

	pub fn set_step(&self, step: f64) {
		self.heap_mut().set_step(step);
	}

	/// Number of live managed objects.
	pub fn count(&self) -> usize {
		self.heap().count()
	}
}

impl<P> Default for Collector<P> {
	fn default() -> Self {
		Self::new()
	}
}
