//! Deep copies between interpreter values and stored records.
//!
//! `create` walks a host stack slot and produces a tree of managed value
//! records; `push` re-materializes a record graph on a (possibly different)
//! interpreter's stack. Aggregates deduplicate through a per-call visited
//! map keyed on host identity, so cyclic and shared structure survives the
//! copy without recursing forever.
//!
//! Ownership discipline: every record returned to a caller carries one
//! external reference owned by that caller. The marshaler links children
//! into their parent with an edge and only then drops its creator ref, so
//! at any instant the partially built tree is rooted and an automatic
//! collection triggered by a mid-marshal allocation cannot sweep it.

use rustc_hash::FxHashMap;

use tether_gc::{Heap, ObjRef};

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::handle::SharedHandle;
use crate::host::{ScriptHost, SlotKind};
use crate::runtime::{Gc, Object};
use crate::value::{ScriptFn, StoredValue, Upvalue};


type Visited = FxHashMap<usize, ObjRef>;

/// Marshals the value at `idx` into a stored record.
///
/// The returned record carries one external reference owned by the caller;
/// release it once the record is parked behind an edge (or no longer
/// wanted). Fails on kinds with no shared representation, leaving any
/// partially built records unreferenced for the next collection.
pub fn create<H: ScriptHost>(gc: &Gc, host: &mut H, idx: i32) -> Result<ObjRef> {
	let mut visited = Visited::default();
	create_impl(gc, host, host.absolute(idx), &mut visited)
}

fn create_impl<H: ScriptHost>(
	gc: &Gc,
	host: &mut H,
	idx: i32,
	visited: &mut Visited,
) -> Result<ObjRef> {
	let kind = host.kind(idx);
	let value = match kind {
		SlotKind::Nil => StoredValue::Nil,
		SlotKind::Bool => StoredValue::Bool(host.boolean(idx)),
		SlotKind::Int => StoredValue::Int(host.integer(idx)),
		SlotKind::Float => StoredValue::Float(host.float(idx)),
		SlotKind::Str => StoredValue::Str(host.string_bytes(idx).into_boxed_slice()),
		SlotKind::LightPtr => StoredValue::LightPtr(host.light_ptr(idx)),
		SlotKind::NativeFn => StoredValue::NativeFn(host.native_fn(idx)),
		SlotKind::ScriptFn => return create_script_fn(gc, host, idx, visited),
		SlotKind::Table => return create_table_copy(gc, host, idx, visited),
		SlotKind::SharedTable => {
			let target = host
				.shared_table(idx)
				.ok_or(Error::Expected("shared table"))?;
			let record = gc.create(Object::Value(StoredValue::SharedRef(target)));
			gc.add_edge(record, target);
			return Ok(record);
		}
		SlotKind::Foreign => {
			log::debug!("cannot marshal {} value", kind.name());
			return Err(Error::Unshareable(kind.name()));
		}
	};
	Ok(gc.create(Object::Value(value)))
}

fn create_script_fn<H: ScriptHost>(
	gc: &Gc,
	host: &mut H,
	idx: i32,
	visited: &mut Visited,
) -> Result<ObjRef> {
	let identity = host.identity(idx);
	if let Some(found) = visited.get(&identity) {
		gc.retain(*found);
		return Ok(*found);
	}
	// Register the empty record before touching upvalues so recursive
	// encounters resolve to it.
	let record = gc.create(Object::Value(StoredValue::ScriptFn(ScriptFn {
		bytecode: Box::default(),
		upvalues: Vec::new(),
	})));
	visited.insert(identity, record);

	if let Err(err) = fill_script_fn(gc, host, idx, record, visited) {
		gc.release(record);
		return Err(err);
	}
	Ok(record)
}

fn fill_script_fn<H: ScriptHost>(
	gc: &Gc,
	host: &mut H,
	idx: i32,
	record: ObjRef,
	visited: &mut Visited,
) -> Result<()> {
	let bytecode = host.dump(idx)?;
	let count = host.upvalue_count(idx)?;
	let globals = host.globals_identity();

	let mut upvalues = Vec::with_capacity(count as usize);
	for n in 1..=count {
		host.push_upvalue(idx, n)?;
		if host.identity(-1) == globals {
			host.pop(1);
			upvalues.push(Upvalue::Env);
			continue;
		}
		let child = match create_impl(gc, host, host.absolute(-1), visited) {
			Ok(child) => child,
			Err(err) => {
				host.pop(1);
				return Err(err);
			}
		};
		host.pop(1);
		{
			let mut heap = gc.heap_mut();
			heap.add_edge(record, child);
			heap.release(child);
		}
		upvalues.push(Upvalue::Stored(child));
	}

	let mut heap = gc.heap_mut();
	if let Object::Value(StoredValue::ScriptFn(data)) = heap.payload_mut(record) {
		data.bytecode = bytecode.into_boxed_slice();
		data.upvalues = upvalues;
	}
	Ok(())
}

fn create_table_copy<H: ScriptHost>(
	gc: &Gc,
	host: &mut H,
	idx: i32,
	visited: &mut Visited,
) -> Result<ObjRef> {
	let identity = host.identity(idx);
	if let Some(found) = visited.get(&identity) {
		gc.retain(*found);
		return Ok(*found);
	}
	let record = gc.create(Object::Value(StoredValue::TableCopy {
		keys: Vec::new(),
		vals: Vec::new(),
	}));
	visited.insert(identity, record);

	if let Err(err) = fill_table_copy(gc, host, idx, record, visited) {
		gc.release(record);
		return Err(err);
	}
	Ok(record)
}

fn fill_table_copy<H: ScriptHost>(
	gc: &Gc,
	host: &mut H,
	idx: i32,
	record: ObjRef,
	visited: &mut Visited,
) -> Result<()> {
	host.push_nil();
	while host.table_next(idx)? {
		// Stack: ... key value.
		let key = match create_impl(gc, host, host.absolute(-2), visited) {
			Ok(key) => key,
			Err(err) => {
				host.pop(2);
				return Err(err);
			}
		};
		let val = match create_impl(gc, host, host.absolute(-1), visited) {
			Ok(val) => val,
			Err(err) => {
				gc.release(key);
				host.pop(2);
				return Err(err);
			}
		};
		host.pop(1);

		let mut heap = gc.heap_mut();
		heap.add_edge(record, key);
		heap.add_edge(record, val);
		if let Object::Value(StoredValue::TableCopy { keys, vals }) = heap.payload_mut(record) {
			keys.push(key);
			vals.push(val);
		}
		heap.release(key);
		heap.release(val);
	}
	Ok(())
}

/// Re-creates `obj` on the host's stack.
///
/// The whole traversal runs under the collector's read guard, so the record
/// graph cannot be collected or re-shaped mid-walk. Script functions are
/// loaded from their serialized code with every environment upvalue rebound
/// to the host's own globals; shared references become fresh retained
/// handles on the same container.
pub fn push<H: ScriptHost>(gc: &Arc<Gc>, host: &mut H, obj: ObjRef) -> Result<()> {
	let heap = gc.heap();
	push_in(gc, &heap, host, obj)
}

pub(crate) fn push_in<H: ScriptHost>(
	gc: &Arc<Gc>,
	heap: &Heap<Object>,
	host: &mut H,
	obj: ObjRef,
) -> Result<()> {
	let value = match heap.payload(obj) {
		Object::Table(_) => {
			heap.retain(obj);
			host.push_shared_table(SharedHandle::adopt(gc.clone(), obj));
			return Ok(());
		}
		Object::Value(value) => value,
	};
	match value {
		StoredValue::Nil => host.push_nil(),
		StoredValue::Bool(b) => host.push_bool(*b),
		StoredValue::Int(n) => host.push_int(*n),
		StoredValue::Float(x) => host.push_float(*x),
		StoredValue::Str(bytes) => host.push_string(bytes),
		StoredValue::LightPtr(ptr) => host.push_light_ptr(*ptr),
		StoredValue::NativeFn(ptr) => host.push_native_fn(*ptr),
		StoredValue::ScriptFn(data) => {
			host.load(&data.bytecode)?;
			for (slot, upvalue) in data.upvalues.iter().enumerate() {
				match upvalue {
					Upvalue::Env => host.push_globals(),
					Upvalue::Stored(child) => push_in(gc, heap, host, *child)?,
				}
				host.set_upvalue(-2, slot as u32 + 1)?;
			}
		}
		StoredValue::TableCopy { keys, vals } => {
			host.new_table();
			let table_idx = host.absolute(-1);
			for (key, val) in keys.iter().zip(vals) {
				push_in(gc, heap, host, *key)?;
				push_in(gc, heap, host, *val)?;
				host.raw_table_set(table_idx)?;
			}
		}
		StoredValue::SharedRef(target) => {
			heap.retain(*target);
			host.push_shared_table(SharedHandle::adopt(gc.clone(), *target));
		}
	}
	Ok(())
}
