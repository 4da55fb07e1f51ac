//! A miniature stack interpreter for exercising the marshaler and the
//! host-facing operations without embedding a real scripting engine.
//!
//! The mock keeps the shape of the real seam: values live on a stack,
//! tables are `Rc`-identity aggregates, and functions are "compiled" into a
//! tiny [`Program`] whose postcard encoding stands in for bytecode, so
//! dump/load round-trips and environment rebinding behave like the real
//! thing. Each interpreter has its own globals table; two mocks sharing a
//! collector model two isolated interpreter states.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tether_gc::ObjRef;

use crate::error::HostError;
use crate::handle::SharedHandle;
use crate::host::{ScriptHost, SlotKind};
use crate::runtime::Gc;

/// Interpreter-side value of the mock host.
#[derive(Debug, Clone)]
pub enum ScriptValue {
	Nil,
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(Rc<[u8]>),
	LightPtr(usize),
	NativeFn(usize),
	Function(Rc<MockFn>),
	Table(Rc<RefCell<NativeTable>>),
	Shared(SharedHandle),
	/// Stand-in for userdata no interpreter can share.
	Foreign,
}

impl ScriptValue {
	pub fn str(text: &str) -> Self {
		ScriptValue::Str(Rc::from(text.as_bytes()))
	}

	fn identity(&self) -> usize {
		match self {
			ScriptValue::Table(table) => Rc::as_ptr(table) as usize,
			ScriptValue::Function(func) => Rc::as_ptr(func) as usize,
			_ => 0,
		}
	}

	/// Identity-aware equality; how the mock's tables match keys.
	pub fn same(&self, other: &ScriptValue) -> bool {
		match (self, other) {
			(ScriptValue::Nil, ScriptValue::Nil) => true,
			(ScriptValue::Bool(a), ScriptValue::Bool(b)) => a == b,
			(ScriptValue::Int(a), ScriptValue::Int(b)) => a == b,
			(ScriptValue::Float(a), ScriptValue::Float(b)) => a.to_bits() == b.to_bits(),
			(ScriptValue::Str(a), ScriptValue::Str(b)) => a == b,
			(ScriptValue::LightPtr(a), ScriptValue::LightPtr(b)) => a == b,
			(ScriptValue::NativeFn(a), ScriptValue::NativeFn(b)) => a == b,
			(ScriptValue::Function(a), ScriptValue::Function(b)) => Rc::ptr_eq(a, b),
			(ScriptValue::Table(a), ScriptValue::Table(b)) => Rc::ptr_eq(a, b),
			(ScriptValue::Shared(a), ScriptValue::Shared(b)) => a.object() == b.object(),
			_ => false,
		}
	}
}

/// An ordinary interpreter-native table: insertion-ordered pairs.
#[derive(Debug, Default)]
pub struct NativeTable {
	pub entries: Vec<(ScriptValue, ScriptValue)>,
}

impl NativeTable {
	pub fn set(&mut self, key: ScriptValue, val: ScriptValue) {
		if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k.same(&key)) {
			entry.1 = val;
		} else {
			self.entries.push((key, val));
		}
	}

	pub fn get(&self, key: &ScriptValue) -> ScriptValue {
		self.entries
			.iter()
			.find(|(k, _)| k.same(key))
			.map(|(_, v)| v.clone())
			.unwrap_or(ScriptValue::Nil)
	}

	pub fn remove(&mut self, key: &ScriptValue) {
		if let Some(position) = self.entries.iter().position(|(k, _)| k.same(key)) {
			self.entries.remove(position);
		}
	}
}

/// Behavior of a mock script function; stands in for compiled code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Program {
	/// Return argument `n` (0-based).
	ReturnArg(u32),
	/// Return upvalue `n` (0-based).
	ReturnUpvalue(u32),
	/// Look `name` up in the table held by upvalue `n`.
	GlobalGet { upvalue: u32, name: String },
	/// Store argument `arg` under `name` in the table held by upvalue `n`.
	StoreArg { upvalue: u32, name: String, arg: u32 },
	/// Return `prefix` concatenated with argument `arg` rendered as text.
	ConcatArg { prefix: String, arg: u32 },
}

/// A mock script function: a program plus captured upvalues.
#[derive(Debug)]
pub struct MockFn {
	pub program: Program,
	pub upvalues: RefCell<Vec<ScriptValue>>,
}

/// One interpreter state: a value stack and a globals table.
pub struct MockInterp {
	gc: Arc<Gc>,
	stack: Vec<ScriptValue>,
	globals: Rc<RefCell<NativeTable>>,
}

impl MockInterp {
	pub fn new(gc: Arc<Gc>) -> Self {
		Self {
			gc,
			stack: Vec::new(),
			globals: Rc::new(RefCell::new(NativeTable::default())),
		}
	}

	pub fn collector(&self) -> &Arc<Gc> {
		&self.gc
	}

	pub fn push(&mut self, value: ScriptValue) {
		self.stack.push(value);
	}

	pub fn pop_value(&mut self) -> ScriptValue {
		self.stack.pop().expect("pop from empty mock stack")
	}

	pub fn set_global(&mut self, name: &str, value: ScriptValue) {
		self.globals.borrow_mut().set(ScriptValue::str(name), value);
	}

	pub fn global(&self, name: &str) -> ScriptValue {
		self.globals.borrow().get(&ScriptValue::str(name))
	}

	/// The globals table as a value, for capturing it as an upvalue.
	pub fn globals_value(&self) -> ScriptValue {
		ScriptValue::Table(self.globals.clone())
	}

	pub fn function(program: Program, upvalues: Vec<ScriptValue>) -> ScriptValue {
		ScriptValue::Function(Rc::new(MockFn {
			program,
			upvalues: RefCell::new(upvalues),
		}))
	}

	pub fn table(pairs: Vec<(ScriptValue, ScriptValue)>) -> ScriptValue {
		let mut table = NativeTable::default();
		for (key, val) in pairs {
			table.set(key, val);
		}
		ScriptValue::Table(Rc::new(RefCell::new(table)))
	}

	fn slot(&self, idx: i32) -> &ScriptValue {
		let abs = self.absolute(idx);
		assert!(
			abs >= 1 && abs as usize <= self.stack.len(),
			"mock stack index {idx} out of range"
		);
		&self.stack[abs as usize - 1]
	}

	fn render(value: &ScriptValue) -> String {
		match value {
			ScriptValue::Nil => "nil".to_string(),
			ScriptValue::Bool(b) => b.to_string(),
			ScriptValue::Int(n) => n.to_string(),
			ScriptValue::Float(x) => x.to_string(),
			ScriptValue::Str(bytes) => String::from_utf8_lossy(bytes).into_owned(),
			_ => "<value>".to_string(),
		}
	}

	fn run(func: &MockFn, args: &[ScriptValue]) -> Result<Vec<ScriptValue>, HostError> {
		let upvalues = func.upvalues.borrow();
		let arg = |n: u32| args.get(n as usize).cloned().unwrap_or(ScriptValue::Nil);
		let upvalue = |n: u32| {
			upvalues
				.get(n as usize)
				.cloned()
				.unwrap_or(ScriptValue::Nil)
		};
		Ok(match &func.program {
			Program::ReturnArg(n) => vec![arg(*n)],
			Program::ReturnUpvalue(n) => vec![upvalue(*n)],
			Program::GlobalGet { upvalue: n, name } => {
				let ScriptValue::Table(env) = upvalue(*n) else {
					return Err(HostError("environment upvalue is not a table".into()));
				};
				let value = env.borrow().get(&ScriptValue::str(name));
				vec![value]
			}
			Program::StoreArg { upvalue: n, name, arg: a } => {
				let ScriptValue::Table(env) = upvalue(*n) else {
					return Err(HostError("environment upvalue is not a table".into()));
				};
				env.borrow_mut().set(ScriptValue::str(name), arg(*a));
				vec![]
			}
			Program::ConcatArg { prefix, arg: a } => {
				let text = format!("{prefix}{}", Self::render(&arg(*a)));
				vec![ScriptValue::Str(Rc::from(text.into_bytes().as_slice()))]
			}
		})
	}
}

impl ScriptHost for MockInterp {
	fn top(&self) -> i32 {
		self.stack.len() as i32
	}

	fn kind(&self, idx: i32) -> SlotKind {
		match self.slot(idx) {
			ScriptValue::Nil => SlotKind::Nil,
			ScriptValue::Bool(_) => SlotKind::Bool,
			ScriptValue::Int(_) => SlotKind::Int,
			ScriptValue::Float(_) => SlotKind::Float,
			ScriptValue::Str(_) => SlotKind::Str,
			ScriptValue::LightPtr(_) => SlotKind::LightPtr,
			ScriptValue::NativeFn(_) => SlotKind::NativeFn,
			ScriptValue::Function(_) => SlotKind::ScriptFn,
			ScriptValue::Table(_) => SlotKind::Table,
			ScriptValue::Shared(_) => SlotKind::SharedTable,
			ScriptValue::Foreign => SlotKind::Foreign,
		}
	}

	fn boolean(&self, idx: i32) -> bool {
		match self.slot(idx) {
			ScriptValue::Bool(b) => *b,
			other => panic!("boolean read on {other:?}"),
		}
	}

	fn integer(&self, idx: i32) -> i64 {
		match self.slot(idx) {
			ScriptValue::Int(n) => *n,
			other => panic!("integer read on {other:?}"),
		}
	}

	fn float(&self, idx: i32) -> f64 {
		match self.slot(idx) {
			ScriptValue::Float(x) => *x,
			ScriptValue::Int(n) => *n as f64,
			other => panic!("float read on {other:?}"),
		}
	}

	fn string_bytes(&self, idx: i32) -> Vec<u8> {
		match self.slot(idx) {
			ScriptValue::Str(bytes) => bytes.to_vec(),
			other => panic!("string read on {other:?}"),
		}
	}

	fn light_ptr(&self, idx: i32) -> usize {
		match self.slot(idx) {
			ScriptValue::LightPtr(ptr) => *ptr,
			other => panic!("light pointer read on {other:?}"),
		}
	}

	fn native_fn(&self, idx: i32) -> usize {
		match self.slot(idx) {
			ScriptValue::NativeFn(ptr) => *ptr,
			other => panic!("native function read on {other:?}"),
		}
	}

	fn shared_table(&self, idx: i32) -> Option<ObjRef> {
		match self.slot(idx) {
			ScriptValue::Shared(handle) => Some(handle.object()),
			_ => None,
		}
	}

	fn identity(&self, idx: i32) -> usize {
		self.slot(idx).identity()
	}

	fn globals_identity(&self) -> usize {
		Rc::as_ptr(&self.globals) as usize
	}

	fn dump(&mut self, idx: i32) -> Result<Vec<u8>, HostError> {
		let ScriptValue::Function(func) = self.slot(idx) else {
			return Err(HostError("dump of a non-function".into()));
		};
		let count = func.upvalues.borrow().len() as u32;
		postcard::to_allocvec(&(&func.program, count)).map_err(|err| HostError(err.to_string()))
	}

	fn upvalue_count(&self, idx: i32) -> Result<u32, HostError> {
		let ScriptValue::Function(func) = self.slot(idx) else {
			return Err(HostError("upvalue count of a non-function".into()));
		};
		Ok(func.upvalues.borrow().len() as u32)
	}

	fn push_upvalue(&mut self, idx: i32, n: u32) -> Result<(), HostError> {
		let ScriptValue::Function(func) = self.slot(idx).clone() else {
			return Err(HostError("upvalue read on a non-function".into()));
		};
		let value = func
			.upvalues
			.borrow()
			.get(n as usize - 1)
			.cloned()
			.ok_or_else(|| HostError(format!("no upvalue {n}")))?;
		self.stack.push(value);
		Ok(())
	}

	fn push_nil(&mut self) {
		self.stack.push(ScriptValue::Nil);
	}

	fn push_bool(&mut self, value: bool) {
		self.stack.push(ScriptValue::Bool(value));
	}

	fn push_int(&mut self, value: i64) {
		self.stack.push(ScriptValue::Int(value));
	}

	fn push_float(&mut self, value: f64) {
		self.stack.push(ScriptValue::Float(value));
	}

	fn push_string(&mut self, bytes: &[u8]) {
		self.stack.push(ScriptValue::Str(Rc::from(bytes)));
	}

	fn push_light_ptr(&mut self, value: usize) {
		self.stack.push(ScriptValue::LightPtr(value));
	}

	fn push_native_fn(&mut self, value: usize) {
		self.stack.push(ScriptValue::NativeFn(value));
	}

	fn push_globals(&mut self) {
		self.stack.push(ScriptValue::Table(self.globals.clone()));
	}

	fn push_shared_table(&mut self, handle: SharedHandle) {
		self.stack.push(ScriptValue::Shared(handle));
	}

	fn push_copy(&mut self, idx: i32) {
		let value = self.slot(idx).clone();
		self.stack.push(value);
	}

	fn new_table(&mut self) {
		self.stack
			.push(ScriptValue::Table(Rc::new(RefCell::new(NativeTable::default()))));
	}

	fn raw_table_set(&mut self, idx: i32) -> Result<(), HostError> {
		let abs = self.absolute(idx);
		let val = self.pop_value();
		let key = self.pop_value();
		let ScriptValue::Table(table) = self.slot(abs).clone() else {
			return Err(HostError("table expected for raw set".into()));
		};
		if matches!(val, ScriptValue::Nil) {
			table.borrow_mut().remove(&key);
		} else {
			table.borrow_mut().set(key, val);
		}
		Ok(())
	}

	fn load(&mut self, bytecode: &[u8]) -> Result<(), HostError> {
		let (program, count): (Program, u32) =
			postcard::from_bytes(bytecode).map_err(|err| HostError(err.to_string()))?;
		self.stack.push(ScriptValue::Function(Rc::new(MockFn {
			program,
			upvalues: RefCell::new(vec![ScriptValue::Nil; count as usize]),
		})));
		Ok(())
	}

	fn set_upvalue(&mut self, idx: i32, n: u32) -> Result<(), HostError> {
		let abs = self.absolute(idx);
		let value = self.pop_value();
		let ScriptValue::Function(func) = self.slot(abs).clone() else {
			return Err(HostError("upvalue write on a non-function".into()));
		};
		let mut upvalues = func.upvalues.borrow_mut();
		let slot = upvalues
			.get_mut(n as usize - 1)
			.ok_or_else(|| HostError(format!("no upvalue {n}")))?;
		*slot = value;
		Ok(())
	}

	fn table_next(&mut self, idx: i32) -> Result<bool, HostError> {
		let abs = self.absolute(idx);
		let key = self.pop_value();
		let ScriptValue::Table(table) = self.slot(abs).clone() else {
			return Err(HostError("table expected for iteration".into()));
		};
		let table = table.borrow();
		let next_index = match key {
			ScriptValue::Nil => 0,
			key => match table.entries.iter().position(|(k, _)| k.same(&key)) {
				Some(position) => position + 1,
				None => return Err(HostError("invalid key to iteration".into())),
			},
		};
		match table.entries.get(next_index) {
			Some((next_key, next_val)) => {
				let (next_key, next_val) = (next_key.clone(), next_val.clone());
				drop(table);
				self.stack.push(next_key);
				self.stack.push(next_val);
				Ok(true)
			}
			None => Ok(false),
		}
	}

	fn call(&mut self, nargs: u32, nresults: u32) -> Result<(), HostError> {
		let split = self.stack.len() - nargs as usize;
		let args = self.stack.split_off(split);
		let func = self.pop_value();
		let results = match func {
			ScriptValue::Function(func) => Self::run(&func, &args)?,
			other => return Err(HostError(format!("cannot call {other:?}"))),
		};
		let mut results = results.into_iter();
		for _ in 0..nresults {
			self.stack.push(results.next().unwrap_or(ScriptValue::Nil));
		}
		Ok(())
	}

	fn pop(&mut self, count: usize) {
		for _ in 0..count {
			self.pop_value();
		}
	}
}
