//! Shared associative containers.
//!
//! A container maps stored value records to stored value records. Entries
//! live in parallel key/value arrays in insertion order; lookup is a linear
//! scan under the total order of [`crate::value::compare`]. The container
//! holds its entries through collector edges, never through external refs,
//! which is what lets cycles of containers be reclaimed by tracing.
//!
//! Lock order: mutating operations take the collector's write guard (edges
//! live there), then this container's lock; readers take the collector's
//! read guard, then the container's read lock. Never the reverse.

use std::cmp::Ordering;

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

use tether_gc::{Heap, ObjRef};

use crate::error::{Error, Result};
use crate::runtime::{Gc, Object};
use crate::value::{self, StoredValue};

#[cfg(test)]
mod tests;

/// Entries start with room for a handful of pairs; growth doubles.
const INITIAL_CAPACITY: usize = 4;

/// A thread-safe associative array of stored value records; itself a
/// managed object.
pub struct SharedTable {
	state: RwLock<TableState>,
}

struct TableState {
	keys: Vec<ObjRef>,
	vals: Vec<ObjRef>,
	metatable: Option<ObjRef>,
}

impl SharedTable {
	pub(crate) fn new() -> Self {
		Self {
			state: RwLock::new(TableState {
				keys: Vec::with_capacity(INITIAL_CAPACITY),
				vals: Vec::with_capacity(INITIAL_CAPACITY),
				metatable: None,
			}),
		}
	}
}

fn table_of(heap: &Heap<Object>, obj: ObjRef) -> Result<&SharedTable> {
	heap.payload(obj).as_table().ok_or(Error::Expected("shared table"))
}

fn position(heap: &Heap<Object>, keys: &[ObjRef], key: ObjRef) -> Option<usize> {
	keys.iter()
		.position(|candidate| value::compare(heap, *candidate, key) == Ordering::Equal)
}

/// Creates an empty container; the caller holds its one external ref.
pub fn create(gc: &Gc) -> ObjRef {
	gc.create(Object::Table(SharedTable::new()))
}

/// Inserts or replaces `key -> val`.
///
/// On a hit the stored key record is kept, the edge to the old value is
/// dropped and an edge to the new value added; on a miss both the key and
/// the value gain edges from the container. External refs are untouched;
/// callers release their creator refs once the entry is in place.
pub fn set(gc: &Gc, table: ObjRef, key: ObjRef, val: ObjRef) -> Result<()> {
	set_in(&mut gc.heap_mut(), table, key, val)
}

pub(crate) fn set_in(heap: &mut Heap<Object>, table: ObjRef, key: ObjRef, val: ObjRef) -> Result<()> {
	let found = {
		let state = table_of(heap, table)?.state.read();
		position(heap, &state.keys, key).map(|index| (index, state.vals[index]))
	};
	match found {
		Some((index, old_val)) => {
			heap.remove_edge(table, old_val);
			heap.add_edge(table, val);
			table_of(heap, table)?.state.write().vals[index] = val;
		}
		None => {
			heap.add_edge(table, key);
			heap.add_edge(table, val);
			let mut state = table_of(heap, table)?.state.write();
			state.keys.push(key);
			state.vals.push(val);
		}
	}
	Ok(())
}

/// Looks `key` up. The returned record is not retained; it stays valid for
/// as long as the collector's read guard is held, so callers that need it
/// longer must retain it.
pub fn get(gc: &Gc, table: ObjRef, key: ObjRef) -> Result<Option<ObjRef>> {
	get_in(&gc.heap(), table, key)
}

pub(crate) fn get_in(heap: &Heap<Object>, table: ObjRef, key: ObjRef) -> Result<Option<ObjRef>> {
	let state = table_of(heap, table)?.state.read();
	Ok(position(heap, &state.keys, key).map(|index| state.vals[index]))
}

/// Looks up a string key without allocating a probe record; used by the
/// metatable dispatch for `__index`/`__newindex`.
pub(crate) fn get_by_str_in(heap: &Heap<Object>, table: ObjRef, name: &[u8]) -> Result<Option<ObjRef>> {
	let state = table_of(heap, table)?.state.read();
	let found = state.keys.iter().position(|key| {
		matches!(heap.payload(*key), Object::Value(StoredValue::Str(bytes)) if bytes.as_ref() == name)
	});
	Ok(found.map(|index| state.vals[index]))
}

/// Removes `key`, dropping the container's edges to the stored key and
/// value. The last entry swaps into the vacated slot. Missing keys are a
/// no-op.
pub fn delete(gc: &Gc, table: ObjRef, key: ObjRef) -> Result<()> {
	delete_in(&mut gc.heap_mut(), table, key)
}

pub(crate) fn delete_in(heap: &mut Heap<Object>, table: ObjRef, key: ObjRef) -> Result<()> {
	let found = {
		let state = table_of(heap, table)?.state.read();
		position(heap, &state.keys, key).map(|index| (index, state.keys[index], state.vals[index]))
	};
	if let Some((index, stored_key, stored_val)) = found {
		heap.remove_edge(table, stored_key);
		heap.remove_edge(table, stored_val);
		let mut state = table_of(heap, table)?.state.write();
		state.keys.swap_remove(index);
		state.vals.swap_remove(index);
	}
	Ok(())
}

/// Number of entries.
pub fn size(gc: &Gc, table: ObjRef) -> Result<usize> {
	let heap = gc.heap();
	let state = table_of(&heap, table)?.state.read();
	Ok(state.keys.len())
}

/// Largest `n` such that every integer key `1..=n` is present.
pub fn length(gc: &Gc, table: ObjRef) -> Result<usize> {
	length_in(&gc.heap(), table)
}

pub(crate) fn length_in(heap: &Heap<Object>, table: ObjRef) -> Result<usize> {
	let state = table_of(heap, table)?.state.read();
	let mut present: FxHashSet<i64> = FxHashSet::default();
	for key in &state.keys {
		if let Object::Value(StoredValue::Int(n)) = heap.payload(*key)
			&& *n > 0
		{
			present.insert(*n);
		}
	}
	let mut len: i64 = 0;
	while present.contains(&(len + 1)) {
		len += 1;
	}
	Ok(len as usize)
}

/// Insertion-order iteration. `None` yields the first pair; a key yields
/// the pair after its slot; a key that is absent (or last) yields the end.
pub fn next(gc: &Gc, table: ObjRef, key: Option<ObjRef>) -> Result<Option<(ObjRef, ObjRef)>> {
	next_in(&gc.heap(), table, key)
}

pub(crate) fn next_in(
	heap: &Heap<Object>,
	table: ObjRef,
	key: Option<ObjRef>,
) -> Result<Option<(ObjRef, ObjRef)>> {
	let state = table_of(heap, table)?.state.read();
	let start = match key {
		None => 0,
		Some(key) => match position(heap, &state.keys, key) {
			Some(index) => index + 1,
			None => return Ok(None),
		},
	};
	Ok((start < state.keys.len()).then(|| (state.keys[start], state.vals[start])))
}

/// Sets or clears the metatable; `mt` must reference a shared container.
/// Replacing drops the edge to the old metatable and adds one to the new.
pub fn set_metatable(gc: &Gc, table: ObjRef, mt: Option<ObjRef>) -> Result<()> {
	let mut heap = gc.heap_mut();
	if let Some(mt) = mt
		&& heap.payload(mt).as_table().is_none()
	{
		return Err(Error::Expected("shared table"));
	}
	let old = table_of(&heap, table)?.state.read().metatable;
	if let Some(old) = old {
		heap.remove_edge(table, old);
	}
	if let Some(new) = mt {
		heap.add_edge(table, new);
	}
	table_of(&heap, table)?.state.write().metatable = mt;
	Ok(())
}

/// Current metatable container, if any.
pub fn metatable(gc: &Gc, table: ObjRef) -> Result<Option<ObjRef>> {
	metatable_in(&gc.heap(), table)
}

pub(crate) fn metatable_in(heap: &Heap<Object>, table: ObjRef) -> Result<Option<ObjRef>> {
	Ok(table_of(heap, table)?.state.read().metatable)
}
