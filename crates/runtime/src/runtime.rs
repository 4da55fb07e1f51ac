//! Collector payload and the process-wide default collector.

use std::sync::{Arc, OnceLock};

use tether_gc::Collector;

use crate::table::SharedTable;
use crate::value::StoredValue;

/// Payload of every tether-managed object: either a stored value record or
/// a shared container.
pub enum Object {
	Value(StoredValue),
	Table(SharedTable),
}

impl Object {
	pub fn as_value(&self) -> Option<&StoredValue> {
		match self {
			Object::Value(value) => Some(value),
			Object::Table(_) => None,
		}
	}

	pub fn as_table(&self) -> Option<&SharedTable> {
		match self {
			Object::Table(table) => Some(table),
			Object::Value(_) => None,
		}
	}
}

/// The collector instantiated with tether's payload.
pub type Gc = Collector<Object>;

static GLOBAL: OnceLock<Arc<Gc>> = OnceLock::new();

/// Process-wide collector, initialized on first use and never torn down.
///
/// Library code takes the collector as a parameter; tests construct their
/// own `Arc<Gc>` to stay isolated from each other.
pub fn global() -> &'static Arc<Gc> {
	GLOBAL.get_or_init(|| Arc::new(Collector::new()))
}
