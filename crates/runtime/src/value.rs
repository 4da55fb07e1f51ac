//! Stored value records and their total order.

use std::cmp::Ordering;

use tether_gc::{Heap, ObjRef};

use crate::runtime::Object;

#[cfg(test)]
mod tests;

/// One upvalue captured by a stored script function.
pub enum Upvalue {
	/// The function's environment. Rebound to the *target* interpreter's
	/// globals whenever the function is re-materialized, so migrated code
	/// reads whichever world it lands in.
	Env,
	Stored(ObjRef),
}

/// Serialized script function: code bytes plus captured upvalues.
pub struct ScriptFn {
	pub bytecode: Box<[u8]>,
	pub upvalues: Vec<Upvalue>,
}

/// A value that can be shared across interpreters. Every record is itself
/// a managed object; aggregate records hold their children through edges.
pub enum StoredValue {
	Nil,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(Box<[u8]>),
	/// Opaque pointer identity; never dereferenced.
	LightPtr(usize),
	/// Host-native callable, carried by identity.
	NativeFn(usize),
	ScriptFn(ScriptFn),
	/// Deep-copy snapshot of an ordinary interpreter table.
	TableCopy { keys: Vec<ObjRef>, vals: Vec<ObjRef> },
	/// By-reference handle to a shared container.
	SharedRef(ObjRef),
}

impl StoredValue {
	/// Kind-tag ordinal; different kinds order by this alone. Integers and
	/// floats are distinct kinds, so `1` and `1.0` never collide as keys.
	fn rank(&self) -> u8 {
		match self {
			StoredValue::Nil => 0,
			StoredValue::Bool(_) => 1,
			StoredValue::Float(_) => 2,
			StoredValue::Int(_) => 3,
			StoredValue::Str(_) => 4,
			StoredValue::LightPtr(_) => 5,
			StoredValue::NativeFn(_) => 6,
			StoredValue::ScriptFn(_) => 7,
			StoredValue::TableCopy { .. } => 8,
			StoredValue::SharedRef(_) => 9,
		}
	}

	pub fn is_nil(&self) -> bool {
		matches!(self, StoredValue::Nil)
	}

	pub fn is_callable(&self) -> bool {
		matches!(self, StoredValue::ScriptFn(_) | StoredValue::NativeFn(_))
	}
}

/// Total order over stored records, used for container key lookup.
///
/// Scalars compare by value within their kind; script functions and table
/// copies compare by record identity; shared references compare by the
/// container they point at, so independently marshaled references to one
/// container are the same key.
pub fn compare(heap: &Heap<Object>, a: ObjRef, b: ObjRef) -> Ordering {
	if a == b {
		return Ordering::Equal;
	}
	let (Object::Value(left), Object::Value(right)) = (heap.payload(a), heap.payload(b)) else {
		// Containers used directly as keys order by identity.
		return a.cmp(&b);
	};
	let by_rank = left.rank().cmp(&right.rank());
	if by_rank != Ordering::Equal {
		return by_rank;
	}
	match (left, right) {
		(StoredValue::Nil, StoredValue::Nil) => Ordering::Equal,
		(StoredValue::Bool(x), StoredValue::Bool(y)) => x.cmp(y),
		(StoredValue::Int(x), StoredValue::Int(y)) => x.cmp(y),
		(StoredValue::Float(x), StoredValue::Float(y)) => x.total_cmp(y),
		(StoredValue::Str(x), StoredValue::Str(y)) => x.as_ref().cmp(y.as_ref()),
		(StoredValue::LightPtr(x), StoredValue::LightPtr(y)) => x.cmp(y),
		(StoredValue::NativeFn(x), StoredValue::NativeFn(y)) => x.cmp(y),
		(StoredValue::SharedRef(x), StoredValue::SharedRef(y)) => x.cmp(y),
		(StoredValue::ScriptFn(_), StoredValue::ScriptFn(_))
		| (StoredValue::TableCopy { .. }, StoredValue::TableCopy { .. }) => a.cmp(&b),
		_ => unreachable!("equal ranks imply matching kinds"),
	}
}
