use pretty_assertions::assert_eq;
use tether_gc::{Collector, ObjRef};

use crate::error::Error;
use crate::runtime::{Gc, Object};
use crate::table;
use crate::value::StoredValue;

fn gc() -> Gc {
	let gc = Collector::new();
	gc.pause();
	gc
}

fn int(gc: &Gc, n: i64) -> ObjRef {
	gc.create(Object::Value(StoredValue::Int(n)))
}

fn text(gc: &Gc, s: &str) -> ObjRef {
	gc.create(Object::Value(StoredValue::Str(Box::from(s.as_bytes()))))
}

/// Stores `key -> val` and drops the creator refs, leaving the entry held
/// by the container's edges alone, the way the binding layer uses `set`.
fn store(gc: &Gc, t: ObjRef, key: ObjRef, val: ObjRef) {
	table::set(gc, t, key, val).unwrap();
	gc.release(key);
	gc.release(val);
}

#[test]
fn test_set_get_delete_round_trip() {
	let gc = gc();
	let t = table::create(&gc);
	let key = text(&gc, "k");
	let val = int(&gc, 42);
	store(&gc, t, key, val);
	assert_eq!(table::size(&gc, t).unwrap(), 1);

	let probe = text(&gc, "k");
	let found = table::get(&gc, t, probe).unwrap().expect("key present");
	{
		let heap = gc.heap();
		assert!(matches!(
			heap.payload(found),
			Object::Value(StoredValue::Int(42))
		));
	}

	table::delete(&gc, t, probe).unwrap();
	assert_eq!(table::size(&gc, t).unwrap(), 0);
	assert_eq!(table::get(&gc, t, probe).unwrap(), None);
	gc.release(probe);
}

#[test]
fn test_set_replaces_value_and_releases_old_edge() {
	let gc = gc();
	let t = table::create(&gc);
	store(&gc, t, text(&gc, "k"), int(&gc, 1));
	store(&gc, t, text(&gc, "k"), int(&gc, 2));
	assert_eq!(table::size(&gc, t).unwrap(), 1);

	// Replaced value and the second key record are unreachable now: five
	// records went in (t, k1, v1, k2, v2), three survive.
	assert_eq!(gc.collect(), 2);
	assert_eq!(gc.count(), 3);

	let probe = text(&gc, "k");
	let found = table::get(&gc, t, probe).unwrap().expect("key present");
	let heap = gc.heap();
	assert!(matches!(
		heap.payload(found),
		Object::Value(StoredValue::Int(2))
	));
}

#[test]
fn test_entries_survive_collection_through_edges() {
	let gc = gc();
	let t = table::create(&gc);
	store(&gc, t, text(&gc, "k"), int(&gc, 9));
	assert_eq!(gc.collect(), 0, "entries are reachable from the handle");

	gc.release(t);
	assert_eq!(gc.collect(), 3, "table, key and value all go together");
	assert_eq!(gc.count(), 0);
}

#[test]
fn test_delete_missing_key_is_noop() {
	let gc = gc();
	let t = table::create(&gc);
	store(&gc, t, int(&gc, 1), text(&gc, "a"));
	let absent = text(&gc, "nope");
	table::delete(&gc, t, absent).unwrap();
	assert_eq!(table::size(&gc, t).unwrap(), 1);
	gc.release(absent);
}

#[test]
fn test_length_is_contiguous_integer_prefix() {
	let gc = gc();
	let t = table::create(&gc);
	store(&gc, t, int(&gc, 1), text(&gc, "a"));
	store(&gc, t, int(&gc, 2), text(&gc, "b"));
	store(&gc, t, int(&gc, 4), text(&gc, "d"));
	assert_eq!(table::size(&gc, t).unwrap(), 3);
	assert_eq!(table::length(&gc, t).unwrap(), 2);

	store(&gc, t, int(&gc, 3), text(&gc, "c"));
	assert_eq!(table::length(&gc, t).unwrap(), 4);
}

#[test]
fn test_length_ignores_float_and_nonpositive_keys() {
	let gc = gc();
	let t = table::create(&gc);
	store(
		&gc,
		t,
		gc.create(Object::Value(StoredValue::Float(1.0))),
		text(&gc, "f"),
	);
	store(&gc, t, int(&gc, 0), text(&gc, "z"));
	store(&gc, t, int(&gc, -1), text(&gc, "n"));
	assert_eq!(table::length(&gc, t).unwrap(), 0);
}

#[test]
fn test_next_iterates_in_insertion_order() {
	let gc = gc();
	let t = table::create(&gc);
	store(&gc, t, text(&gc, "a"), int(&gc, 1));
	store(&gc, t, text(&gc, "b"), int(&gc, 2));
	store(&gc, t, text(&gc, "c"), int(&gc, 3));

	let mut seen = Vec::new();
	let mut cursor: Option<ObjRef> = None;
	while let Some((key, val)) = table::next(&gc, t, cursor).unwrap() {
		let heap = gc.heap();
		if let (Object::Value(StoredValue::Str(k)), Object::Value(StoredValue::Int(v))) =
			(heap.payload(key), heap.payload(val))
		{
			seen.push((String::from_utf8_lossy(k).into_owned(), *v));
		}
		cursor = Some(key);
	}
	assert_eq!(
		seen,
		vec![
			("a".to_string(), 1),
			("b".to_string(), 2),
			("c".to_string(), 3)
		]
	);
}

#[test]
fn test_next_with_absent_key_yields_end() {
	let gc = gc();
	let t = table::create(&gc);
	store(&gc, t, text(&gc, "a"), int(&gc, 1));
	let absent = text(&gc, "nope");
	assert_eq!(table::next(&gc, t, Some(absent)).unwrap(), None);
	gc.release(absent);
}

#[test]
fn test_shared_ref_records_act_as_one_key() {
	let gc = gc();
	let t = table::create(&gc);
	let other = table::create(&gc);

	let key_a = gc.create(Object::Value(StoredValue::SharedRef(other)));
	gc.add_edge(key_a, other);
	store(&gc, t, key_a, int(&gc, 5));

	// An independently created reference to the same container finds the
	// entry.
	let key_b = gc.create(Object::Value(StoredValue::SharedRef(other)));
	gc.add_edge(key_b, other);
	let found = table::get(&gc, t, key_b).unwrap();
	assert!(found.is_some());
	gc.release(key_b);
}

#[test]
fn test_metatable_replace_swaps_edges() {
	let gc = gc();
	let t = table::create(&gc);
	let first = table::create(&gc);
	let second = table::create(&gc);

	table::set_metatable(&gc, t, Some(first)).unwrap();
	gc.release(first);
	assert_eq!(table::metatable(&gc, t).unwrap(), Some(first));

	table::set_metatable(&gc, t, Some(second)).unwrap();
	gc.release(second);
	assert_eq!(table::metatable(&gc, t).unwrap(), Some(second));

	// The replaced metatable lost its only edge and its creator ref.
	assert_eq!(gc.collect(), 1);

	table::set_metatable(&gc, t, None).unwrap();
	assert_eq!(table::metatable(&gc, t).unwrap(), None);
	assert_eq!(gc.collect(), 1);
	assert_eq!(gc.count(), 1);
}

#[test]
fn test_metatable_must_be_a_container() {
	let gc = gc();
	let t = table::create(&gc);
	let scalar = int(&gc, 1);
	assert!(matches!(
		table::set_metatable(&gc, t, Some(scalar)),
		Err(Error::Expected("shared table"))
	));
}

#[test]
fn test_value_records_are_not_containers() {
	let gc = gc();
	let scalar = int(&gc, 1);
	assert!(matches!(
		table::size(&gc, scalar),
		Err(Error::Expected("shared table"))
	));
}

#[test]
fn test_cross_container_cycle_is_reclaimed() {
	let gc = gc();
	let a = table::create(&gc);
	let b = table::create(&gc);

	let ref_to_b = gc.create(Object::Value(StoredValue::SharedRef(b)));
	gc.add_edge(ref_to_b, b);
	store(&gc, a, text(&gc, "x"), ref_to_b);

	let ref_to_a = gc.create(Object::Value(StoredValue::SharedRef(a)));
	gc.add_edge(ref_to_a, a);
	store(&gc, b, text(&gc, "y"), ref_to_a);

	assert_eq!(gc.collect(), 0, "both containers still have handles");
	let before = gc.count();

	gc.release(a);
	gc.release(b);
	let swept = gc.collect();
	assert_eq!(swept, before);
	assert_eq!(gc.count(), 0);
}
