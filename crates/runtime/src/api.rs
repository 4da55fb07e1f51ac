//! Host-facing operations and metatable dispatch.
//!
//! These functions are what a binding layer wires up as script-callable
//! entry points. They follow the host's calling convention: arguments are
//! read from stack slots 1.., results are pushed, and the return value is
//! the number of results. Everything here is implemented strictly in terms
//! of the container primitives in [`crate::table`] and the marshaler.

use std::sync::Arc;

use tether_gc::ObjRef;

use crate::error::{Error, Result};
use crate::handle::SharedHandle;
use crate::host::{ScriptHost, SlotKind};
use crate::marshal;
use crate::runtime::{Gc, Object};
use crate::table;
use crate::value::StoredValue;


/// `__index` chains longer than this abort the lookup instead of spinning
/// on a metatable cycle.
const MAX_INDEX_DEPTH: usize = 32;

fn shared_arg<H: ScriptHost>(host: &H, idx: i32) -> Result<ObjRef> {
	host.shared_table(idx).ok_or(Error::Expected("shared table"))
}

/// `table([initial])`: constructs a shared container. A native-table
/// argument is deep-marshaled into it entry by entry.
pub fn table_new<H: ScriptHost>(gc: &Arc<Gc>, host: &mut H) -> Result<usize> {
	let table = table::create(gc);
	if host.top() >= 1 && host.kind(1) != SlotKind::Nil {
		if host.kind(1) != SlotKind::Table {
			gc.release(table);
			return Err(Error::Expected("table"));
		}
		if let Err(err) = fill_from_native(gc, host, table, 1) {
			gc.release(table);
			return Err(err);
		}
	}
	host.push_shared_table(SharedHandle::adopt(gc.clone(), table));
	Ok(1)
}

/// Marshals every pair of the native table at `idx` into `table`.
fn fill_from_native<H: ScriptHost>(gc: &Gc, host: &mut H, table: ObjRef, idx: i32) -> Result<()> {
	host.push_nil();
	while host.table_next(idx)? {
		let key = match marshal::create(gc, host, -2) {
			Ok(key) => key,
			Err(err) => {
				host.pop(2);
				return Err(err);
			}
		};
		let val = match marshal::create(gc, host, -1) {
			Ok(val) => val,
			Err(err) => {
				gc.release(key);
				host.pop(2);
				return Err(err);
			}
		};
		host.pop(1);
		let result = table::set(gc, table, key, val);
		gc.release(key);
		gc.release(val);
		if let Err(err) = result {
			host.pop(1);
			return Err(err);
		}
	}
	Ok(())
}

/// `setmetatable(t, mt)`: `mt` may be nil, another shared container, or a
/// native table (deep-marshaled into a fresh container). Returns `t`.
pub fn set_metatable<H: ScriptHost>(gc: &Arc<Gc>, host: &mut H) -> Result<usize> {
	let target = shared_arg(host, 1)?;
	let (mt, owned) = match host.kind(2) {
		SlotKind::Nil => (None, None),
		SlotKind::SharedTable => (Some(shared_arg(host, 2)?), None),
		SlotKind::Table => {
			let fresh = table::create(gc);
			if let Err(err) = fill_from_native(gc, host, fresh, 2) {
				gc.release(fresh);
				return Err(err);
			}
			(Some(fresh), Some(fresh))
		}
		_ => return Err(Error::Expected("table")),
	};
	let result = table::set_metatable(gc, target, mt);
	if let Some(fresh) = owned {
		gc.release(fresh);
	}
	result?;
	host.push_copy(1);
	Ok(1)
}

/// `getmetatable(t)`: a fresh retained handle to the metatable, or nil.
pub fn get_metatable<H: ScriptHost>(gc: &Arc<Gc>, host: &mut H) -> Result<usize> {
	let target = shared_arg(host, 1)?;
	let heap = gc.heap();
	match table::metatable_in(&heap, target)? {
		Some(mt) => marshal::push_in(gc, &heap, host, mt)?,
		None => host.push_nil(),
	}
	Ok(1)
}

/// `rawset(t, k, v)`: stores without metatable dispatch; a nil value
/// deletes. Returns `t`.
pub fn raw_set<H: ScriptHost>(gc: &Arc<Gc>, host: &mut H) -> Result<usize> {
	let target = shared_arg(host, 1)?;
	let key = marshal::create(gc, host, 2)?;
	let val = match marshal::create(gc, host, 3) {
		Ok(val) => val,
		Err(err) => {
			gc.release(key);
			return Err(err);
		}
	};
	let result = store_or_delete(gc, target, key, val);
	gc.release(key);
	gc.release(val);
	result?;
	host.push_copy(1);
	Ok(1)
}

fn store_or_delete(gc: &Gc, target: ObjRef, key: ObjRef, val: ObjRef) -> Result<()> {
	let is_nil = {
		let heap = gc.heap();
		matches!(heap.payload(val), Object::Value(StoredValue::Nil))
	};
	if is_nil {
		table::delete(gc, target, key)
	} else {
		table::set(gc, target, key, val)
	}
}

/// `rawget(t, k)`: reads without metatable dispatch.
pub fn raw_get<H: ScriptHost>(gc: &Arc<Gc>, host: &mut H) -> Result<usize> {
	let target = shared_arg(host, 1)?;
	let key = marshal::create(gc, host, 2)?;
	let result = (|| {
		let heap = gc.heap();
		match table::get_in(&heap, target, key)? {
			Some(val) => marshal::push_in(gc, &heap, host, val),
			None => {
				host.push_nil();
				Ok(())
			}
		}
	})();
	gc.release(key);
	result.map(|_| 1)
}

/// `size(t)`: entry count.
pub fn size_of<H: ScriptHost>(gc: &Gc, host: &mut H) -> Result<usize> {
	let target = shared_arg(host, 1)?;
	let size = table::size(gc, target)?;
	host.push_int(size as i64);
	Ok(1)
}

/// Length operator: the contiguous positive-integer-key prefix.
pub fn length_of<H: ScriptHost>(gc: &Gc, host: &mut H) -> Result<usize> {
	let target = shared_arg(host, 1)?;
	let length = table::length(gc, target)?;
	host.push_int(length as i64);
	Ok(1)
}

/// Indexed read with metatable dispatch.
///
/// A raw hit is returned as-is. On a miss the metatable's `__index` entry
/// decides: a shared container continues the lookup there (bounded chain),
/// a callable is invoked as `(self, key)` for one result, anything else
/// ends the lookup with nil.
pub fn index_read<H: ScriptHost>(gc: &Arc<Gc>, host: &mut H) -> Result<usize> {
	let target = shared_arg(host, 1)?;
	let key = marshal::create(gc, host, 2)?;
	let result = index_read_dispatch(gc, host, target, key);
	gc.release(key);
	result
}

enum IndexStep {
	Done,
	Follow(ObjRef),
	Call(ObjRef),
}

fn index_read_dispatch<H: ScriptHost>(
	gc: &Arc<Gc>,
	host: &mut H,
	mut target: ObjRef,
	key: ObjRef,
) -> Result<usize> {
	for _ in 0..MAX_INDEX_DEPTH {
		let step = {
			let heap = gc.heap();
			if let Some(val) = table::get_in(&heap, target, key)? {
				marshal::push_in(gc, &heap, host, val)?;
				IndexStep::Done
			} else {
				let handler = match table::metatable_in(&heap, target)? {
					Some(mt) => table::get_by_str_in(&heap, mt, b"__index")?,
					None => None,
				};
				match handler {
					None => {
						host.push_nil();
						IndexStep::Done
					}
					Some(entry) => match heap.payload(entry) {
						Object::Value(StoredValue::SharedRef(inner)) => IndexStep::Follow(*inner),
						Object::Value(value) if value.is_callable() => IndexStep::Call(entry),
						_ => {
							host.push_nil();
							IndexStep::Done
						}
					},
				}
			}
		};
		match step {
			IndexStep::Done => return Ok(1),
			IndexStep::Follow(inner) => target = inner,
			IndexStep::Call(handler) => {
				{
					let heap = gc.heap();
					marshal::push_in(gc, &heap, host, handler)?;
				}
				host.push_copy(1);
				host.push_copy(2);
				host.call(2, 1)?;
				return Ok(1);
			}
		}
	}
	Err(Error::IndexChainTooLong)
}

/// Indexed write with metatable dispatch.
///
/// A callable `__newindex` is invoked as `(self, key, value)` and replaces
/// the store entirely; otherwise a nil value deletes and anything else
/// stores.
pub fn index_write<H: ScriptHost>(gc: &Arc<Gc>, host: &mut H) -> Result<usize> {
	let target = shared_arg(host, 1)?;
	let handled = {
		let heap = gc.heap();
		let handler = match table::metatable_in(&heap, target)? {
			Some(mt) => table::get_by_str_in(&heap, mt, b"__newindex")?,
			None => None,
		};
		match handler {
			Some(entry)
				if matches!(heap.payload(entry), Object::Value(value) if value.is_callable()) =>
			{
				marshal::push_in(gc, &heap, host, entry)?;
				true
			}
			_ => false,
		}
	};
	if handled {
		host.push_copy(1);
		host.push_copy(2);
		host.push_copy(3);
		host.call(3, 0)?;
		return Ok(0);
	}

	let key = marshal::create(gc, host, 2)?;
	let val = match marshal::create(gc, host, 3) {
		Ok(val) => val,
		Err(err) => {
			gc.release(key);
			return Err(err);
		}
	};
	let result = store_or_delete(gc, target, key, val);
	gc.release(key);
	gc.release(val);
	result.map(|_| 0)
}

/// Pair iteration step: `next(t, k?)` in insertion order. Pushes the next
/// key/value pair, or nothing at the end.
pub fn pairs_next<H: ScriptHost>(gc: &Arc<Gc>, host: &mut H) -> Result<usize> {
	let target = shared_arg(host, 1)?;
	let key = if host.top() >= 2 && host.kind(2) != SlotKind::Nil {
		Some(marshal::create(gc, host, 2)?)
	} else {
		None
	};
	let result = (|| {
		let heap = gc.heap();
		match table::next_in(&heap, target, key)? {
			Some((next_key, next_val)) => {
				marshal::push_in(gc, &heap, host, next_key)?;
				marshal::push_in(gc, &heap, host, next_val)?;
				Ok(2)
			}
			None => Ok(0),
		}
	})();
	if let Some(key) = key {
		gc.release(key);
	}
	result
}

/// Integer iteration step: `ipairs` protocol over keys `1..`. Takes the
/// previous index at slot 2 and pushes `(i + 1, t[i + 1])` while present.
pub fn ipairs_next<H: ScriptHost>(gc: &Arc<Gc>, host: &mut H) -> Result<usize> {
	let target = shared_arg(host, 1)?;
	let index = host.integer(2) + 1;
	let key = gc.create(Object::Value(StoredValue::Int(index)));
	let result = (|| {
		let heap = gc.heap();
		match table::get_in(&heap, target, key)? {
			Some(val) => {
				host.push_int(index);
				marshal::push_in(gc, &heap, host, val)?;
				Ok(2)
			}
			None => Ok(0),
		}
	})();
	gc.release(key);
	result
}

/// String form: a unique label carrying the container's handle bits.
pub fn to_string<H: ScriptHost>(host: &mut H) -> Result<usize> {
	let target = shared_arg(host, 1)?;
	let label = format!("tether.table: 0x{:012x}", target.bits());
	host.push_string(label.as_bytes());
	Ok(1)
}

/// `gc.collect()`: runs a full collection.
pub fn gc_collect<H: ScriptHost>(gc: &Gc, _host: &mut H) -> Result<usize> {
	gc.collect();
	Ok(0)
}

/// `gc.count()`: number of live managed objects.
pub fn gc_count<H: ScriptHost>(gc: &Gc, host: &mut H) -> Result<usize> {
	host.push_int(gc.count() as i64);
	Ok(1)
}

/// `gc.step([factor])`: returns the previous trigger factor and, given an
/// argument, installs a new one (clamped by the collector).
pub fn gc_step<H: ScriptHost>(gc: &Gc, host: &mut H) -> Result<usize> {
	let previous = gc.step();
	if host.top() >= 1 && host.kind(1) != SlotKind::Nil {
		gc.set_step(host.float(1));
	}
	host.push_float(previous);
	Ok(1)
}

/// `gc.pause()`: stops automatic collection.
pub fn gc_pause<H: ScriptHost>(gc: &Gc, _host: &mut H) -> Result<usize> {
	gc.pause();
	Ok(0)
}

/// `gc.resume()`: re-enables automatic collection.
pub fn gc_resume<H: ScriptHost>(gc: &Gc, _host: &mut H) -> Result<usize> {
	gc.resume();
	Ok(0)
}

/// `gc.enabled()`: whether automatic collection is on.
pub fn gc_enabled<H: ScriptHost>(gc: &Gc, host: &mut H) -> Result<usize> {
	host.push_bool(gc.is_enabled());
	Ok(1)
}
