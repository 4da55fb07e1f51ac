//! RAII external references held by interpreter handles.

use std::fmt;
use std::sync::Arc;

use tether_gc::ObjRef;

use crate::runtime::Gc;

/// A counted external reference to a managed object, as carried by the
/// userdata an interpreter hands to scripts. Cloning retains; dropping
/// releases, which is the finalization hook of the binding layer. The
/// object itself is reclaimed by a later collection.
///
/// Dropping takes the collector lock briefly, so a handle must not be
/// dropped on a thread that currently holds a heap guard.
pub struct SharedHandle {
	gc: Arc<Gc>,
	obj: ObjRef,
}

impl SharedHandle {
	/// Wraps an external reference the caller already owns.
	pub fn adopt(gc: Arc<Gc>, obj: ObjRef) -> Self {
		Self { gc, obj }
	}

	/// Takes a fresh external reference on `obj`.
	pub fn retain(gc: Arc<Gc>, obj: ObjRef) -> Self {
		gc.retain(obj);
		Self { gc, obj }
	}

	pub fn object(&self) -> ObjRef {
		self.obj
	}

	pub fn collector(&self) -> &Arc<Gc> {
		&self.gc
	}
}

impl Clone for SharedHandle {
	fn clone(&self) -> Self {
		self.gc.retain(self.obj);
		Self {
			gc: self.gc.clone(),
			obj: self.obj,
		}
	}
}

impl Drop for SharedHandle {
	fn drop(&mut self) {
		self.gc.release(self.obj);
	}
}

impl fmt::Debug for SharedHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("SharedHandle").field(&self.obj).finish()
	}
}
