//! The object heap: an arena of id-addressed slots with a tracing
//! mark-and-sweep collector.
//!
//! Every heap value from §"object graph" lives in one [`ObjData`] variant
//! inside a slot vector; values refer to each other by [`HeapId`] handle,
//! never by pointer, so cyclic graphs (a class whose method closes over an
//! instance of itself) are expressible and traceable. The intrusive
//! allocation list of a pointer-based runtime becomes the slot vector
//! itself: sweeping walks the slots, frees the unmarked ones onto a free
//! list, and unmarks the survivors.
//!
//! Strings are interned here: all string construction funnels through
//! [`Heap::intern`]/[`Heap::intern_owned`], so equal bytes always yield the
//! same handle and string equality is handle equality. After the mark
//! phase, intern entries whose strings were not reached are dropped before
//! the sweep, keeping the "every live string exactly once" invariant.
//!
//! The heap never decides *when* to collect — the VM triggers collection
//! from its allocation helpers when `bytes_allocated` crosses `next_gc`,
//! and pauses collection while a compiler is live (a half-built function's
//! constants are not yet reachable from any root).

use std::any::Any;
use std::fmt;
use std::fs;

use ahash::AHashMap;
use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::bytecode::Blob;
use crate::modules::ModuleLoader;
use crate::value::{fnv1a, format_number, Value};
use crate::vm::NativeFn;

/// Handle to a heap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(u32);

impl HeapId {
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }
}

/// What a compiled function is, which decides slot-0 binding, `return`
/// rules inside initializers, and method visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// A module's top-level code.
    Script,
    Function,
    Method,
    Initializer,
    /// A method whose name starts with `_`; reachable only through `self`.
    Private,
    Static,
}

/// Hash-table type used for named members (globals, module values, class
/// tables, instance fields). Keys are handles of interned name strings.
pub type Table = AHashMap<HeapId, Value>;

/// An interned string: bytes, cached codepoint length, and FNV-1a hash.
#[derive(Debug)]
pub struct StrObj {
    pub chars: Box<str>,
    pub char_len: usize,
    pub hash: u32,
}

impl StrObj {
    fn new(chars: Box<str>) -> Self {
        let char_len = chars.chars().count();
        let hash = fnv1a(chars.as_bytes());
        Self { chars, char_len, hash }
    }
}

#[derive(Debug, Default)]
pub struct ListObj {
    pub items: Vec<Value>,
}

/// Insertion-ordered dictionary. One map carries both halves of the C
/// original's `names` + `items` pair: iteration order is insertion order,
/// and removal keeps the order of the remaining keys.
#[derive(Debug, Default)]
pub struct DictObj {
    pub items: IndexMap<Value, Value, ahash::RandomState>,
}

#[derive(Debug, Default)]
pub struct BytesObj {
    pub bytes: Vec<u8>,
}

/// Numeric range; `upper` is exclusive and `span` is the signed distance.
#[derive(Debug, Clone, Copy)]
pub struct RangeObj {
    pub lower: i64,
    pub upper: i64,
    pub span: i64,
}

impl RangeObj {
    #[must_use]
    pub fn new(lower: i64, upper: i64) -> Self {
        Self { lower, upper, span: upper - lower }
    }

    /// Number of iteration steps.
    #[must_use]
    pub fn count(&self) -> i64 {
        self.span.abs()
    }

    /// The i-th element, walking toward `upper`.
    #[must_use]
    pub fn element(&self, i: i64) -> i64 {
        if self.span >= 0 { self.lower + i } else { self.lower - i }
    }
}

/// Backing handle of a file object.
pub enum FileHandle {
    Closed,
    Os(fs::File),
    Stdin,
    Stdout,
    Stderr,
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "Closed",
            Self::Os(_) => "Os",
            Self::Stdin => "Stdin",
            Self::Stdout => "Stdout",
            Self::Stderr => "Stderr",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct FileObj {
    pub path: String,
    pub mode: String,
    pub handle: FileHandle,
    pub is_open: bool,
}

impl FileObj {
    /// Standard streams are never closed by the VM.
    #[must_use]
    pub fn is_std(&self) -> bool {
        matches!(self.handle, FileHandle::Stdin | FileHandle::Stdout | FileHandle::Stderr)
    }
}

/// A raw compiled function. Callable directly when it captures nothing;
/// wrapped in a [`ClosureObj`] otherwise.
#[derive(Debug)]
pub struct FunctionObj {
    pub arity: usize,
    pub is_variadic: bool,
    pub up_value_count: usize,
    pub blob: Blob,
    /// Interned name string; `None` for a module's top-level function.
    pub name: Option<HeapId>,
    /// Owning module.
    pub module: HeapId,
    pub kind: FunctionKind,
}

#[derive(Debug)]
pub struct ClosureObj {
    pub function: HeapId,
    pub up_values: SmallVec<[HeapId; 4]>,
}

/// A captured variable: open while its frame is live, closed after.
#[derive(Debug)]
pub enum UpValueObj {
    /// Index of the captured slot in the VM stack.
    Open(usize),
    /// The value, moved off the stack when the frame returned.
    Closed(Value),
}

#[derive(Debug)]
pub struct ClassObj {
    pub name: HeapId,
    pub superclass: Option<HeapId>,
    /// The method whose name equals the class name, if any.
    pub initializer: Option<Value>,
    /// Default instance-field values, copied at construction.
    pub fields: Table,
    pub static_fields: Table,
    pub methods: Table,
    pub static_methods: Table,
}

impl ClassObj {
    #[must_use]
    pub fn new(name: HeapId) -> Self {
        Self {
            name,
            superclass: None,
            initializer: None,
            fields: Table::default(),
            static_fields: Table::default(),
            methods: Table::default(),
            static_methods: Table::default(),
        }
    }
}

#[derive(Debug)]
pub struct InstanceObj {
    pub class: HeapId,
    pub fields: Table,
}

#[derive(Debug)]
pub struct BoundMethodObj {
    pub receiver: Value,
    /// Closure, raw function, or native.
    pub method: Value,
}

#[derive(Debug)]
pub struct NativeObj {
    pub name: &'static str,
    pub function: NativeFn,
    pub kind: FunctionKind,
}

#[derive(Debug)]
pub struct ModuleObj {
    pub name: String,
    /// Canonical file path; the import-cache key for source modules.
    pub file: String,
    /// The module's top-level values (its exported globals).
    pub values: Table,
    pub preloader: Option<ModuleLoader>,
    pub unloader: Option<ModuleLoader>,
}

/// Compiled `using` dispatch table: literal label → jump offset relative to
/// the instruction after `Switch`.
#[derive(Debug, Default)]
pub struct SwitchObj {
    pub table: IndexMap<Value, i32, ahash::RandomState>,
    pub default_jump: i32,
    pub exit_jump: i32,
}

/// Finalizer invoked when a foreign pointer is swept.
pub type ForeignFinalizer = fn(&mut dyn Any);

/// Opaque payload a native module attaches to a value, with an optional
/// destructor run at collection time.
pub struct ForeignObj {
    pub name: &'static str,
    pub data: Box<dyn Any>,
    pub finalizer: Option<ForeignFinalizer>,
}

impl fmt::Debug for ForeignObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignObj").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Every heap object variant.
#[derive(Debug)]
pub enum ObjData {
    Str(StrObj),
    List(ListObj),
    Dict(DictObj),
    Bytes(BytesObj),
    Range(RangeObj),
    File(FileObj),
    Function(FunctionObj),
    Closure(ClosureObj),
    UpValue(UpValueObj),
    Class(ClassObj),
    Instance(InstanceObj),
    BoundMethod(BoundMethodObj),
    Native(NativeObj),
    Module(ModuleObj),
    Switch(SwitchObj),
    Foreign(ForeignObj),
}

impl ObjData {
    /// Rough retained-size estimate driving the GC trigger.
    fn approx_size(&self) -> usize {
        let base = std::mem::size_of::<Self>();
        base + match self {
            Self::Str(s) => s.chars.len(),
            Self::List(l) => l.items.capacity() * std::mem::size_of::<Value>(),
            Self::Dict(d) => d.items.capacity() * 2 * std::mem::size_of::<Value>(),
            Self::Bytes(b) => b.bytes.capacity(),
            Self::Function(f) => {
                f.blob.code.capacity()
                    + f.blob.lines.capacity() * 4
                    + f.blob.constants.capacity() * std::mem::size_of::<Value>()
            }
            Self::Closure(c) => c.up_values.len() * std::mem::size_of::<HeapId>(),
            Self::Class(c) => {
                (c.fields.len() + c.static_fields.len() + c.methods.len() + c.static_methods.len())
                    * 2
                    * std::mem::size_of::<Value>()
            }
            Self::Instance(i) => i.fields.len() * 2 * std::mem::size_of::<Value>(),
            Self::Module(m) => m.values.len() * 2 * std::mem::size_of::<Value>(),
            Self::Switch(s) => s.table.len() * 2 * std::mem::size_of::<Value>(),
            _ => 0,
        }
    }

    /// The user-facing type name, as reported by `typeof` and errors.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
            Self::Bytes(_) => "bytes",
            Self::Range(_) => "range",
            Self::File(_) => "file",
            Self::Function(_) | Self::Closure(_) | Self::Native(_) | Self::BoundMethod(_) => {
                "function"
            }
            Self::UpValue(_) => "up-value",
            Self::Class(_) => "class",
            Self::Instance(_) => "instance",
            Self::Module(_) => "module",
            Self::Switch(_) => "switch",
            Self::Foreign(_) => "pointer",
        }
    }
}

/// Statistics the CLI's `-g` flag and tests care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcStats {
    pub live_objects: usize,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    pub collections: usize,
}

/// Heap growth factor applied after every collection.
const GC_HEAP_GROWTH_FACTOR: usize = 2;

/// Default byte budget before the first collection (overridable by `-g`).
pub const DEFAULT_GC_START: usize = 1024 * 1024;

/// The arena heap.
pub struct Heap {
    slots: Vec<Option<ObjData>>,
    marks: Vec<bool>,
    free_list: Vec<HeapId>,
    gray: Vec<HeapId>,
    strings: AHashMap<Box<str>, HeapId>,
    bytes_allocated: usize,
    next_gc: usize,
    pause_depth: u32,
    collections: usize,
    /// Extra roots registered while native calls run (`gc_protect`).
    protected: Vec<HeapId>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            marks: Vec::new(),
            free_list: Vec::new(),
            gray: Vec::new(),
            strings: AHashMap::new(),
            bytes_allocated: 0,
            next_gc: DEFAULT_GC_START,
            pause_depth: 0,
            collections: 0,
            protected: Vec::new(),
        }
    }

    /// Lowers the byte budget for the first collection (CLI `-g`).
    pub fn set_next_gc(&mut self, bytes: usize) {
        self.next_gc = bytes.max(1024);
    }

    #[must_use]
    pub fn stats(&self) -> GcStats {
        GcStats {
            live_objects: self.slots.iter().filter(|s| s.is_some()).count(),
            bytes_allocated: self.bytes_allocated,
            next_gc: self.next_gc,
            collections: self.collections,
        }
    }

    /// True when allocation has outgrown the budget and a collection is due.
    #[must_use]
    pub fn should_collect(&self) -> bool {
        self.pause_depth == 0 && self.bytes_allocated >= self.next_gc
    }

    /// Defers collection; used while a compiler owns half-built functions.
    pub fn pause_gc(&mut self) {
        self.pause_depth += 1;
    }

    pub fn resume_gc(&mut self) {
        debug_assert!(self.pause_depth > 0);
        self.pause_depth = self.pause_depth.saturating_sub(1);
    }

    /// Registers an extra GC root until [`Heap::clear_protection`].
    pub fn protect(&mut self, id: HeapId) {
        self.protected.push(id);
    }

    #[must_use]
    pub fn protection_mark(&self) -> usize {
        self.protected.len()
    }

    /// Drops protections registered after `mark`.
    pub fn clear_protection(&mut self, mark: usize) {
        self.protected.truncate(mark);
    }

    /// Places `data` into a free slot and returns its handle.
    pub fn allocate(&mut self, data: ObjData) -> HeapId {
        self.bytes_allocated += data.approx_size();
        if let Some(id) = self.free_list.pop() {
            self.slots[id.index()] = Some(data);
            self.marks[id.index()] = false;
            id
        } else {
            self.slots.push(Some(data));
            self.marks.push(false);
            HeapId::from_index(self.slots.len() - 1)
        }
    }

    /// Interns `s`, returning the canonical handle for its content.
    pub fn intern(&mut self, s: &str) -> HeapId {
        if let Some(&id) = self.strings.get(s) {
            return id;
        }
        let id = self.allocate(ObjData::Str(StrObj::new(s.into())));
        self.strings.insert(s.into(), id);
        id
    }

    /// Interns an owned string without re-copying on the miss path.
    pub fn intern_owned(&mut self, s: String) -> HeapId {
        if let Some(&id) = self.strings.get(s.as_str()) {
            return id;
        }
        let boxed: Box<str> = s.into_boxed_str();
        let id = self.allocate(ObjData::Str(StrObj::new(boxed.clone())));
        self.strings.insert(boxed, id);
        id
    }

    /// Borrows the object behind `id`.
    ///
    /// # Panics
    /// Panics on a freed slot — that is a collector bug, not a user error.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &ObjData {
        self.slots[id.index()].as_ref().unwrap_or_else(|| panic!("use of freed heap slot"))
    }

    pub fn get_mut(&mut self, id: HeapId) -> &mut ObjData {
        self.slots[id.index()].as_mut().unwrap_or_else(|| panic!("use of freed heap slot"))
    }

    // Typed accessors for the invariant-checked internal paths. Opcode
    // handlers only reach these after a type test, so a mismatch is an
    // interpreter bug.

    #[must_use]
    pub fn str_value(&self, id: HeapId) -> &StrObj {
        match self.get(id) {
            ObjData::Str(s) => s,
            other => panic!("expected string, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn str_contents(&self, id: HeapId) -> &str {
        &self.str_value(id).chars
    }

    #[must_use]
    pub fn function(&self, id: HeapId) -> &FunctionObj {
        match self.get(id) {
            ObjData::Function(f) => f,
            other => panic!("expected function, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn closure(&self, id: HeapId) -> &ClosureObj {
        match self.get(id) {
            ObjData::Closure(c) => c,
            other => panic!("expected closure, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn class(&self, id: HeapId) -> &ClassObj {
        match self.get(id) {
            ObjData::Class(c) => c,
            other => panic!("expected class, found {}", other.type_name()),
        }
    }

    pub fn class_mut(&mut self, id: HeapId) -> &mut ClassObj {
        match self.get_mut(id) {
            ObjData::Class(c) => c,
            other => panic!("expected class, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn instance(&self, id: HeapId) -> &InstanceObj {
        match self.get(id) {
            ObjData::Instance(i) => i,
            other => panic!("expected instance, found {}", other.type_name()),
        }
    }

    pub fn instance_mut(&mut self, id: HeapId) -> &mut InstanceObj {
        match self.get_mut(id) {
            ObjData::Instance(i) => i,
            other => panic!("expected instance, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn module(&self, id: HeapId) -> &ModuleObj {
        match self.get(id) {
            ObjData::Module(m) => m,
            other => panic!("expected module, found {}", other.type_name()),
        }
    }

    pub fn module_mut(&mut self, id: HeapId) -> &mut ModuleObj {
        match self.get_mut(id) {
            ObjData::Module(m) => m,
            other => panic!("expected module, found {}", other.type_name()),
        }
    }

    /// Is `value` a heap object of the kind selected by `pred`?
    pub fn is_obj_kind(&self, value: Value, pred: fn(&ObjData) -> bool) -> bool {
        value.as_ref_id().is_some_and(|id| pred(self.get(id)))
    }

    #[must_use]
    pub fn is_string(&self, value: Value) -> bool {
        self.is_obj_kind(value, |d| matches!(d, ObjData::Str(_)))
    }

    #[must_use]
    pub fn is_list(&self, value: Value) -> bool {
        self.is_obj_kind(value, |d| matches!(d, ObjData::List(_)))
    }

    #[must_use]
    pub fn is_dict(&self, value: Value) -> bool {
        self.is_obj_kind(value, |d| matches!(d, ObjData::Dict(_)))
    }

    #[must_use]
    pub fn is_bytes(&self, value: Value) -> bool {
        self.is_obj_kind(value, |d| matches!(d, ObjData::Bytes(_)))
    }

    #[must_use]
    pub fn is_instance(&self, value: Value) -> bool {
        self.is_obj_kind(value, |d| matches!(d, ObjData::Instance(_)))
    }

    /// The user-facing type name of any value.
    #[must_use]
    pub fn type_name(&self, value: Value) -> &'static str {
        match value {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Empty => "empty",
            Value::Ref(id) => self.get(id).type_name(),
        }
    }

    /// Language truthiness: `nil`, `empty`, `false`, negative numbers, and
    /// empty containers are false; everything else is true.
    #[must_use]
    pub fn is_false(&self, value: Value) -> bool {
        match value {
            Value::Nil | Value::Empty => true,
            Value::Bool(b) => !b,
            Value::Number(n) => n < 0.0,
            Value::Ref(id) => match self.get(id) {
                ObjData::Str(s) => s.chars.is_empty(),
                ObjData::List(l) => l.items.is_empty(),
                ObjData::Dict(d) => d.items.is_empty(),
                ObjData::Bytes(b) => b.bytes.is_empty(),
                _ => false,
            },
        }
    }

    /// Plain display form, used by `echo`, string concatenation, and
    /// `Stringify`.
    #[must_use]
    pub fn value_to_string(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Empty => "empty".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(n),
            Value::Ref(id) => self.object_to_string(id),
        }
    }

    /// REPL/echo-repr form: like [`Heap::value_to_string`], but strings are
    /// quoted so `echo` output distinguishes `"1"` from `1` interactively.
    #[must_use]
    pub fn value_to_repr(&self, value: Value) -> String {
        match value {
            Value::Ref(id) => match self.get(id) {
                ObjData::Str(s) => format!("'{}'", s.chars),
                _ => self.object_to_string(id),
            },
            other => self.value_to_string(other),
        }
    }

    fn object_to_string(&self, id: HeapId) -> String {
        match self.get(id) {
            ObjData::Str(s) => s.chars.to_string(),
            ObjData::List(l) => {
                let parts: Vec<String> =
                    l.items.iter().map(|v| self.nested_to_string(*v, id)).collect();
                format!("[{}]", parts.join(", "))
            }
            ObjData::Dict(d) => {
                let parts: Vec<String> = d
                    .items
                    .iter()
                    .map(|(k, v)| {
                        format!(
                            "{}: {}",
                            self.nested_to_string(*k, id),
                            self.nested_to_string(*v, id)
                        )
                    })
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            ObjData::Bytes(b) => {
                let parts: Vec<String> = b.bytes.iter().map(ToString::to_string).collect();
                format!("({})", parts.join(" "))
            }
            ObjData::Range(r) => format!("<range {}..{}>", r.lower, r.upper),
            ObjData::File(f) => format!("<file at {}>", f.path),
            ObjData::Function(f) => self.function_to_string(f),
            ObjData::Closure(c) => self.function_to_string(self.function(c.function)),
            ObjData::UpValue(_) => "<up-value>".to_string(),
            ObjData::Class(c) => format!("<class {}>", self.str_contents(c.name)),
            ObjData::Instance(i) => {
                format!("<instance of {}>", self.str_contents(self.class(i.class).name))
            }
            ObjData::BoundMethod(b) => self.value_to_string(b.method),
            ObjData::Native(n) => format!("<native function {}>", n.name),
            ObjData::Module(m) => format!("<module {}>", m.name),
            ObjData::Switch(_) => "<switch>".to_string(),
            ObjData::Foreign(p) => format!("<pointer {}>", p.name),
        }
    }

    fn nested_to_string(&self, value: Value, container: HeapId) -> String {
        // A container that holds itself must not recurse forever.
        if value.as_ref_id() == Some(container) {
            return "...".to_string();
        }
        self.value_to_repr(value)
    }

    fn function_to_string(&self, f: &FunctionObj) -> String {
        match f.name {
            Some(name) => format!("<function {}({})>", self.str_contents(name), f.arity),
            None => "<script>".to_string(),
        }
    }

    // --- garbage collection -------------------------------------------------

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Ref(id) = value {
            self.mark_object(id);
        }
    }

    pub fn mark_object(&mut self, id: HeapId) {
        let idx = id.index();
        if self.slots[idx].is_none() || self.marks[idx] {
            return;
        }
        self.marks[idx] = true;
        self.gray.push(id);
    }

    /// Marks the heap's own extra roots (the protection list).
    pub fn mark_own_roots(&mut self) {
        let protected: Vec<HeapId> = self.protected.clone();
        for id in protected {
            self.mark_object(id);
        }
    }

    /// Drains the gray work-list, blackening one object at a time.
    pub fn trace_references(&mut self) {
        while let Some(id) = self.gray.pop() {
            Self::blacken(&self.slots, &mut self.marks, &mut self.gray, id);
        }
    }

    /// Traces one object's outgoing references. Operates on split borrows
    /// so children can be grayed while the parent is being read.
    fn blacken(
        slots: &[Option<ObjData>],
        marks: &mut [bool],
        gray: &mut Vec<HeapId>,
        id: HeapId,
    ) {
        let mut mark_val = |v: Value| {
            if let Value::Ref(child) = v {
                let idx = child.index();
                if slots[idx].is_some() && !marks[idx] {
                    marks[idx] = true;
                    gray.push(child);
                }
            }
        };

        match slots[id.index()].as_ref().expect("gray object was freed") {
            ObjData::Str(_)
            | ObjData::Bytes(_)
            | ObjData::Range(_)
            | ObjData::File(_)
            | ObjData::Native(_)
            | ObjData::Foreign(_) => {}
            ObjData::List(l) => {
                for &v in &l.items {
                    mark_val(v);
                }
            }
            ObjData::Dict(d) => {
                for (&k, &v) in &d.items {
                    mark_val(k);
                    mark_val(v);
                }
            }
            ObjData::Function(f) => {
                if let Some(name) = f.name {
                    mark_val(Value::Ref(name));
                }
                mark_val(Value::Ref(f.module));
                for &c in &f.blob.constants {
                    mark_val(c);
                }
            }
            ObjData::Closure(c) => {
                mark_val(Value::Ref(c.function));
                for &uv in &c.up_values {
                    mark_val(Value::Ref(uv));
                }
            }
            ObjData::UpValue(uv) => {
                if let UpValueObj::Closed(v) = uv {
                    mark_val(*v);
                }
            }
            ObjData::Class(c) => {
                mark_val(Value::Ref(c.name));
                if let Some(sup) = c.superclass {
                    mark_val(Value::Ref(sup));
                }
                if let Some(init) = c.initializer {
                    mark_val(init);
                }
                for table in [&c.fields, &c.static_fields, &c.methods, &c.static_methods] {
                    for (&k, &v) in table {
                        mark_val(Value::Ref(k));
                        mark_val(v);
                    }
                }
            }
            ObjData::Instance(i) => {
                mark_val(Value::Ref(i.class));
                for (&k, &v) in &i.fields {
                    mark_val(Value::Ref(k));
                    mark_val(v);
                }
            }
            ObjData::BoundMethod(b) => {
                mark_val(b.receiver);
                mark_val(b.method);
            }
            ObjData::Module(m) => {
                for (&k, &v) in &m.values {
                    mark_val(Value::Ref(k));
                    mark_val(v);
                }
            }
            ObjData::Switch(s) => {
                for (&k, _) in &s.table {
                    mark_val(k);
                }
            }
        }
    }

    /// Drops intern entries whose strings were not marked. Must run after
    /// the mark phase and before [`Heap::sweep`], so strings referenced
    /// only by the intern table are collectible.
    pub fn remove_unmarked_strings(&mut self) {
        let marks = &self.marks;
        self.strings.retain(|_, id| marks[id.index()]);
    }

    /// Frees every unmarked object, runs foreign finalizers, and clears
    /// marks on the survivors. Returns the number of objects freed.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        for idx in 0..self.slots.len() {
            if self.marks[idx] {
                self.marks[idx] = false;
                continue;
            }
            if let Some(mut data) = self.slots[idx].take() {
                self.bytes_allocated = self.bytes_allocated.saturating_sub(data.approx_size());
                if let ObjData::Foreign(f) = &mut data {
                    if let Some(finalizer) = f.finalizer.take() {
                        finalizer(f.data.as_mut());
                    }
                }
                // Dropping the data closes an owned OS file handle; std
                // streams carry no handle and are unaffected.
                drop(data);
                self.free_list.push(HeapId::from_index(idx));
                freed += 1;
            }
        }
        self.next_gc =
            (self.bytes_allocated * GC_HEAP_GROWTH_FACTOR).max(DEFAULT_GC_START.min(self.next_gc));
        self.collections += 1;
        freed
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::{ForeignObj, Heap, ListObj, ObjData, RangeObj};
    use crate::value::Value;

    #[test]
    fn interning_returns_the_same_handle_for_equal_bytes() {
        let mut heap = Heap::new();
        let a = heap.intern("hello");
        let b = heap.intern_owned("hello".to_string());
        let c = heap.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.str_contents(a), "hello");
    }

    #[test]
    fn sweep_frees_unreachable_and_keeps_marked() {
        let mut heap = Heap::new();
        let kept = heap.intern("kept");
        let lost = heap.intern("lost");
        heap.mark_object(kept);
        heap.trace_references();
        heap.remove_unmarked_strings();
        let freed = heap.sweep();
        assert_eq!(freed, 1);
        // the surviving intern entry still resolves, and the slot of the
        // dead string is recycled
        assert_eq!(heap.intern("kept"), kept);
        let replacement = heap.intern("fresh");
        assert_eq!(replacement, lost);
    }

    #[test]
    fn tracing_reaches_list_elements() {
        let mut heap = Heap::new();
        let inner = heap.intern("element");
        let list = heap.allocate(ObjData::List(ListObj { items: vec![Value::Ref(inner)] }));
        heap.mark_object(list);
        heap.trace_references();
        heap.remove_unmarked_strings();
        assert_eq!(heap.sweep(), 0);
        assert_eq!(heap.str_contents(inner), "element");
    }

    #[test]
    fn self_referential_objects_trace_without_looping() {
        let mut heap = Heap::new();
        let list = heap.allocate(ObjData::List(ListObj::default()));
        match heap.get_mut(list) {
            ObjData::List(l) => l.items.push(Value::Ref(list)),
            _ => unreachable!(),
        }
        heap.mark_object(list);
        heap.trace_references();
        assert_eq!(heap.sweep(), 0);
    }

    #[test]
    fn range_elements_walk_both_directions() {
        let up = RangeObj::new(2, 5);
        assert_eq!((0..up.count()).map(|i| up.element(i)).collect::<Vec<_>>(), vec![2, 3, 4]);
        let down = RangeObj::new(5, 2);
        assert_eq!((0..down.count()).map(|i| down.element(i)).collect::<Vec<_>>(), vec![5, 4, 3]);
        assert_eq!(RangeObj::new(3, 3).count(), 0);
    }

    static FINALIZED: AtomicUsize = AtomicUsize::new(0);

    fn counting_finalizer(data: &mut dyn Any) {
        // the downcast proves the payload reaches its destructor intact
        if data.downcast_ref::<u32>().is_some() {
            FINALIZED.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn foreign_finalizers_run_when_swept() {
        let mut heap = Heap::new();
        let _dead = heap.allocate(ObjData::Foreign(ForeignObj {
            name: "native handle",
            data: Box::new(7u32),
            finalizer: Some(counting_finalizer),
        }));
        let kept = heap.allocate(ObjData::Foreign(ForeignObj {
            name: "native handle",
            data: Box::new(9u32),
            finalizer: Some(counting_finalizer),
        }));

        heap.mark_object(kept);
        heap.trace_references();
        heap.remove_unmarked_strings();
        let before = FINALIZED.load(Ordering::SeqCst);
        assert_eq!(heap.sweep(), 1);
        assert_eq!(FINALIZED.load(Ordering::SeqCst), before + 1);

        // the survivor still owns its payload and destructor
        match heap.get(kept) {
            ObjData::Foreign(f) => {
                assert_eq!(f.data.downcast_ref::<u32>(), Some(&9));
                assert!(f.finalizer.is_some());
            }
            _ => unreachable!("kept slot holds the foreign object"),
        }
    }

    #[test]
    fn truthiness_follows_the_language_rules() {
        let mut heap = Heap::new();
        let empty = heap.intern("");
        let full = heap.intern("x");
        assert!(heap.is_false(Value::Nil));
        assert!(heap.is_false(Value::Empty));
        assert!(heap.is_false(Value::Number(-1.0)));
        assert!(!heap.is_false(Value::Number(0.0)));
        assert!(heap.is_false(Value::Ref(empty)));
        assert!(!heap.is_false(Value::Ref(full)));
    }
}
