//! The virtual machine.
//!
//! A single-threaded stack VM: one operand stack, a bounded frame stack,
//! and one big `match` over the opcode set. Each call frame records its
//! callee, instruction pointer, slot base, and a stack of exception
//! handlers installed by `Try`. The VM owns the heap, the process-wide
//! globals, the module cache, and the sorted list of open up-values —
//! every mutable registry is per-VM state, never a process static.

mod call;
mod exceptions;
mod import;
mod index;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::builtins;
use crate::bytecode::{dis, Opcode};
use crate::compiler::{self, CompileOptions};
use crate::exceptions::{RunError, RunResult};
use crate::heap::{
    BytesObj, DictObj, Heap, HeapId, ListObj, ModuleObj, ObjData, RangeObj, Table, UpValueObj,
};
use crate::io::EchoWriter;
use crate::value::Value;

/// Maximum call depth.
pub const FRAMES_MAX: usize = 256;

/// A native function: receives the VM, the receiver (the callee slot),
/// and the arguments. Errors become catchable exceptions.
pub type NativeFn = fn(&mut Vm<'_>, Value, &[Value]) -> RunResult<Value>;

/// How a top-level execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Ok,
    CompileErr,
    RuntimeErr,
}

/// An exception handler installed by `Try`, owned by its call frame.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExceptHandler {
    /// Expected class; `None` catches nothing (finally-only handler).
    pub class: Option<HeapId>,
    pub catch_ip: Option<usize>,
    pub finally_ip: Option<usize>,
    /// Operand-stack height at `Try` time; unwinding rewinds to it.
    pub stack_len: usize,
}

pub(crate) struct CallFrame {
    /// The callee value: a closure or a raw function.
    pub callee: Value,
    /// The raw function executing in this frame.
    pub function: HeapId,
    pub ip: usize,
    /// Stack index of the callee slot; local slot 0.
    pub base: usize,
    pub handlers: SmallVec<[ExceptHandler; 2]>,
}

/// Why an opcode handler aborted.
pub(crate) enum Signal {
    /// A runtime error not yet materialized as an exception instance.
    Error(RunError),
    /// An exception that found no handler; carries the instance.
    Fatal(Value),
}

impl From<RunError> for Signal {
    fn from(err: RunError) -> Self {
        Self::Error(err)
    }
}

pub(crate) enum Flow {
    Continue,
    Done,
}

pub(crate) type OpResult = Result<Flow, Signal>;

pub struct Vm<'w> {
    pub heap: Heap,
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<CallFrame>,
    /// Process-wide globals: builtin functions and exception classes.
    pub(crate) globals: Table,
    /// Canonical module path (or native cache key) to loaded module.
    pub(crate) modules: AHashMap<String, HeapId>,
    /// Open up-values sorted by descending stack index.
    pub(crate) open_up_values: Vec<HeapId>,
    pub(crate) exception_class: HeapId,
    pub(crate) assertion_class: HeapId,
    /// Exception waiting for `BeginCatch` at a catch entry.
    pub(crate) caught_exception: Option<Value>,
    /// Exception routed through a finally block, rethrown by `PublishTry`.
    pub(crate) propagating_exception: Option<Value>,
    pub(crate) echo: &'w mut dyn EchoWriter,
    /// Nesting depth of native calls; allocations inside are GC-protected.
    pub(crate) native_depth: u32,
    /// Arguments exposed to scripts through `Os.args()`.
    std_args: Vec<String>,
    /// Cooperative interruption flag (`SIGINT` in the REPL). When set, the
    /// dispatch loop resets the stack and returns control to the host; the
    /// interned strings and globals survive.
    interrupt: Option<Arc<AtomicBool>>,
    /// Trace the stack and each instruction to stderr (`-j`).
    pub trace_execution: bool,
    /// Disassemble compiled code before running (`-d`).
    pub print_bytecode: bool,
    /// Echo values in repr form (quoted strings).
    pub repl_mode: bool,
}

impl<'w> Vm<'w> {
    pub fn new(echo: &'w mut dyn EchoWriter) -> Self {
        let mut vm = Self {
            heap: Heap::new(),
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(16),
            globals: Table::default(),
            modules: AHashMap::new(),
            open_up_values: Vec::new(),
            exception_class: HeapId::from_index(0),
            assertion_class: HeapId::from_index(0),
            caught_exception: None,
            propagating_exception: None,
            echo,
            native_depth: 0,
            std_args: Vec::new(),
            interrupt: None,
            trace_execution: false,
            print_bytecode: false,
            repl_mode: false,
        };
        builtins::register_globals(&mut vm);
        vm.init_exception_classes();
        vm
    }

    // --- public entry points ------------------------------------------------

    /// Compiles and runs `source` as a fresh top-level module.
    pub fn run_source(&mut self, source: &str, file_path: &str) -> RunOutcome {
        let module = self.new_module("", file_path);
        let options = if Path::new(file_path).is_file() {
            CompileOptions::for_file(Path::new(file_path))
        } else {
            CompileOptions {
                file_path: file_path.to_string(),
                directory: std::env::current_dir().unwrap_or_default(),
                std_root: crate::modules::default_std_root(),
            }
        };
        self.run_module_source(module, source, &options)
    }

    /// Reads and runs a script file.
    pub fn run_file(&mut self, path: &Path) -> RunOutcome {
        match std::fs::read_to_string(path) {
            Ok(source) => {
                let module = self.new_module("", &path.display().to_string());
                let options = CompileOptions::for_file(path);
                self.run_module_source(module, &source, &options)
            }
            Err(err) => {
                eprintln!("(blade):\n  Launch aborted for {}\n  Reason: {err}", path.display());
                RunOutcome::RuntimeErr
            }
        }
    }

    /// Creates a module object for top-level code.
    pub fn new_module(&mut self, name: &str, file: &str) -> HeapId {
        self.heap.allocate(ObjData::Module(ModuleObj {
            name: name.to_string(),
            file: file.to_string(),
            values: Table::default(),
            preloader: None,
            unloader: None,
        }))
    }

    /// Compiles `source` into an existing module and executes it. The REPL
    /// calls this repeatedly against one shared module so definitions
    /// persist between entries.
    pub fn run_module_source(
        &mut self,
        module: HeapId,
        source: &str,
        options: &CompileOptions,
    ) -> RunOutcome {
        // a compiler owns half-built functions the collector cannot see
        self.heap.pause_gc();
        let mut chain = vec![options.file_path.clone()];
        let compiled = compiler::compile_module(&mut self.heap, source, module, options, &mut chain);
        self.heap.resume_gc();

        let function = match compiled {
            Ok(function) => function,
            Err(errors) => {
                for error in errors {
                    eprintln!("{error}");
                }
                return RunOutcome::CompileErr;
            }
        };

        if self.print_bytecode {
            self.disassemble_functions(function);
        }

        self.push(Value::Ref(function));
        if let Err(signal) = self.call_function(function, function, 0) {
            return self.handle_top_level_signal(signal);
        }
        let outcome = self.run();
        self.echo.flush();
        outcome
    }

    /// Supplies the command-line arguments scripts read via `Os.args()`.
    pub fn set_std_args(&mut self, args: Vec<String>) {
        self.std_args = args;
    }

    pub(crate) fn std_args(&self) -> &[String] {
        &self.std_args
    }

    /// Installs a flag the dispatch loop polls for interruption. The
    /// REPL's `SIGINT` handler sets it; a fired flag abandons the current
    /// evaluation (resetting the stack, keeping globals and interned
    /// strings) so control returns to the prompt.
    pub fn set_interrupt_flag(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    /// Runs module unloaders. Call once before dropping the VM.
    pub fn shutdown(&mut self) {
        let unloaders: Vec<_> = self
            .modules
            .values()
            .filter_map(|&id| self.heap.module(id).unloader)
            .collect();
        for unloader in unloaders {
            unloader(self);
        }
        self.modules.clear();
    }

    fn disassemble_functions(&mut self, function: HeapId) {
        let name = self
            .heap
            .function(function)
            .name
            .map_or_else(|| "<script>".to_string(), |n| self.heap.str_contents(n).to_string());
        print!("{}", dis::disassemble_blob(&self.heap, &self.heap.function(function).blob, &name));
        let children: Vec<HeapId> = self
            .heap
            .function(function)
            .blob
            .constants
            .iter()
            .filter_map(|c| c.as_ref_id())
            .filter(|&id| matches!(self.heap.get(id), ObjData::Function(_)))
            .collect();
        for child in children {
            self.disassemble_functions(child);
        }
    }

    // --- stack --------------------------------------------------------------

    #[inline]
    pub(crate) fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow")
    }

    #[inline]
    pub(crate) fn pop_n(&mut self, n: usize) {
        let len = self.stack.len();
        self.stack.truncate(len - n);
    }

    #[inline]
    pub(crate) fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    #[inline]
    pub(crate) fn set_peek(&mut self, distance: usize, value: Value) {
        let at = self.stack.len() - 1 - distance;
        self.stack[at] = value;
    }

    fn reset_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_up_values.clear();
        self.caught_exception = None;
        self.propagating_exception = None;
    }

    // --- allocation with collection ----------------------------------------

    /// Collects when the byte budget is exceeded. Call while every
    /// intermediate value is still reachable from a root.
    pub(crate) fn gc_checkpoint(&mut self) {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
    }

    /// Allocates through a GC checkpoint. Inside native calls the new
    /// object is protected until the call returns.
    pub fn alloc_value(&mut self, data: ObjData) -> Value {
        Value::Ref(self.alloc_id(data))
    }

    pub(crate) fn alloc_id(&mut self, data: ObjData) -> HeapId {
        self.gc_checkpoint();
        let id = self.heap.allocate(data);
        if self.native_depth > 0 {
            self.heap.protect(id);
        }
        id
    }

    /// Interns a string through a GC checkpoint.
    pub fn intern_string(&mut self, text: String) -> Value {
        self.gc_checkpoint();
        let id = self.heap.intern_owned(text);
        if self.native_depth > 0 {
            self.heap.protect(id);
        }
        Value::Ref(id)
    }

    /// Marks every VM root, traces, prunes dead intern entries, sweeps.
    pub fn collect_garbage(&mut self) {
        for i in 0..self.stack.len() {
            let value = self.stack[i];
            self.heap.mark_value(value);
        }
        for i in 0..self.frames.len() {
            let callee = self.frames[i].callee;
            let function = self.frames[i].function;
            self.heap.mark_value(callee);
            self.heap.mark_object(function);
        }
        for (&name, &value) in &self.globals {
            self.heap.mark_object(name);
            self.heap.mark_value(value);
        }
        let modules: Vec<HeapId> = self.modules.values().copied().collect();
        for module in modules {
            self.heap.mark_object(module);
        }
        for i in 0..self.open_up_values.len() {
            let id = self.open_up_values[i];
            self.heap.mark_object(id);
        }
        self.heap.mark_object(self.exception_class);
        self.heap.mark_object(self.assertion_class);
        if let Some(exc) = self.caught_exception {
            self.heap.mark_value(exc);
        }
        if let Some(exc) = self.propagating_exception {
            self.heap.mark_value(exc);
        }
        self.heap.mark_own_roots();

        self.heap.trace_references();
        self.heap.remove_unmarked_strings();
        self.heap.sweep();
    }

    // --- instruction fetch --------------------------------------------------

    #[inline]
    fn fetch_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().expect("no active frame");
        let blob = &self.heap.function(frame.function).blob;
        let byte = blob.code[frame.ip];
        frame.ip += 1;
        byte
    }

    #[inline]
    fn fetch_u16(&mut self) -> u16 {
        let frame = self.frames.last_mut().expect("no active frame");
        let blob = &self.heap.function(frame.function).blob;
        let operand = blob.read_u16(frame.ip);
        frame.ip += 2;
        operand
    }

    #[inline]
    fn read_constant(&mut self) -> Value {
        let index = self.fetch_u16() as usize;
        let frame = self.frames.last().expect("no active frame");
        self.heap.function(frame.function).blob.constants[index]
    }

    /// Reads a constant that the compiler guarantees is an interned string.
    #[inline]
    fn read_string_constant(&mut self) -> HeapId {
        self.read_constant().as_ref_id().expect("string constant")
    }

    /// The module owning the currently executing function.
    pub(crate) fn current_module(&self) -> HeapId {
        let frame = self.frames.last().expect("no active frame");
        self.heap.function(frame.function).module
    }

    // --- the dispatch loop --------------------------------------------------

    fn handle_top_level_signal(&mut self, signal: Signal) -> RunOutcome {
        let exc = match signal {
            Signal::Error(err) => self.make_exception(&err),
            Signal::Fatal(value) => value,
        };
        self.report_unhandled(exc);
        self.reset_stack();
        RunOutcome::RuntimeErr
    }

    fn run(&mut self) -> RunOutcome {
        loop {
            if let Some(flag) = &self.interrupt {
                if flag.swap(false, Ordering::Relaxed) {
                    eprintln!("<KeyboardInterrupt>");
                    self.reset_stack();
                    return RunOutcome::RuntimeErr;
                }
            }
            if self.trace_execution {
                self.trace_state();
            }
            let byte = self.fetch_byte();
            let op = Opcode::from_repr(byte).expect("compiler emitted a valid opcode");
            match self.execute(op) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Done) => return RunOutcome::Ok,
                Err(Signal::Error(err)) => {
                    let exc = self.make_exception(&err);
                    if !self.unwind(exc) {
                        self.report_unhandled(exc);
                        self.reset_stack();
                        return RunOutcome::RuntimeErr;
                    }
                }
                Err(Signal::Fatal(exc)) => {
                    self.report_unhandled(exc);
                    self.reset_stack();
                    return RunOutcome::RuntimeErr;
                }
            }
        }
    }

    fn execute(&mut self, op: Opcode) -> OpResult {
        match op {
            Opcode::Constant => {
                let constant = self.read_constant();
                self.push(constant);
            }
            Opcode::Nil => self.push(Value::Nil),
            Opcode::True => self.push(Value::Bool(true)),
            Opcode::False => self.push(Value::Bool(false)),
            Opcode::Empty => self.push(Value::Empty),
            Opcode::One => self.push(Value::Number(1.0)),

            Opcode::Add => self.op_add()?,
            Opcode::Subtract | Opcode::Divide | Opcode::FDivide | Opcode::Reminder
            | Opcode::Pow => self.binary_number(op)?,
            Opcode::Multiply => self.op_multiply()?,
            Opcode::Negate => {
                let Some(n) = self.peek(0).as_number() else {
                    return Err(self
                        .type_error(&format!(
                            "operator - not defined for object of type {}",
                            self.heap.type_name(self.peek(0))
                        ))
                        .into());
                };
                self.pop();
                self.push(Value::Number(-n));
            }

            Opcode::BitAnd | Opcode::BitOr | Opcode::BitXor | Opcode::LShift
            | Opcode::RShift => self.binary_bit(op)?,
            Opcode::BitNot => {
                let Some(n) = self.peek(0).coerce_number() else {
                    return Err(self
                        .type_error(&format!(
                            "operator ~ not defined for object of type {}",
                            self.heap.type_name(self.peek(0))
                        ))
                        .into());
                };
                self.pop();
                self.push(Value::Number(!(n as i64) as f64));
            }

            Opcode::Equal => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(a == b));
            }
            Opcode::Greater | Opcode::Less => self.binary_compare(op)?,
            Opcode::Not => {
                let value = self.pop();
                let falsey = self.heap.is_false(value);
                self.push(Value::Bool(falsey));
            }

            Opcode::Pop => {
                self.pop();
            }
            Opcode::PopN => {
                let n = self.fetch_u16() as usize;
                self.pop_n(n);
            }
            Opcode::Dup => self.push(self.peek(0)),
            Opcode::CloseUpValue => {
                self.close_up_values(self.stack.len() - 1);
                self.pop();
            }

            Opcode::Jump => {
                let offset = self.fetch_u16() as usize;
                self.frames.last_mut().expect("no active frame").ip += offset;
            }
            Opcode::JumpIfFalse => {
                let offset = self.fetch_u16() as usize;
                if self.heap.is_false(self.peek(0)) {
                    self.frames.last_mut().expect("no active frame").ip += offset;
                }
            }
            Opcode::Loop => {
                let offset = self.fetch_u16() as usize;
                self.frames.last_mut().expect("no active frame").ip -= offset;
            }
            Opcode::BreakPlaceholder => {
                unreachable!("break placeholder must be rewritten at compile time")
            }

            Opcode::DefineGlobal => {
                let name = self.read_string_constant();
                let value = self.peek(0);
                let module = self.current_module();
                self.heap.module_mut(module).values.insert(name, value);
                self.pop();
            }
            Opcode::GetGlobal => {
                let name = self.read_string_constant();
                let module = self.current_module();
                let value = self
                    .heap
                    .module(module)
                    .values
                    .get(&name)
                    .or_else(|| self.globals.get(&name))
                    .copied();
                match value {
                    Some(value) => self.push(value),
                    None => {
                        return Err(self
                            .type_error(&format!(
                                "'{}' is undefined in this scope",
                                self.heap.str_contents(name)
                            ))
                            .into());
                    }
                }
            }
            Opcode::SetGlobal => {
                let name = self.read_string_constant();
                let value = self.peek(0);
                let module = self.current_module();
                if self.heap.module(module).values.contains_key(&name) {
                    self.heap.module_mut(module).values.insert(name, value);
                } else if let Some(slot) = self.globals.get_mut(&name) {
                    *slot = value;
                } else {
                    return Err(self
                        .type_error(&format!(
                            "'{}' is undefined in this scope",
                            self.heap.str_contents(name)
                        ))
                        .into());
                }
            }

            Opcode::GetLocal => {
                let slot = self.fetch_u16() as usize;
                let base = self.frames.last().expect("no active frame").base;
                self.push(self.stack[base + slot]);
            }
            Opcode::SetLocal => {
                let slot = self.fetch_u16() as usize;
                let base = self.frames.last().expect("no active frame").base;
                self.stack[base + slot] = self.peek(0);
            }
            Opcode::GetUpValue => {
                let index = self.fetch_u16() as usize;
                let value = self.read_up_value(index);
                self.push(value);
            }
            Opcode::SetUpValue => {
                let index = self.fetch_u16() as usize;
                let value = self.peek(0);
                self.write_up_value(index, value);
            }

            Opcode::GetProperty => {
                let name = self.read_string_constant();
                self.get_property(name, false)?;
            }
            Opcode::GetSelfProperty => {
                let name = self.read_string_constant();
                self.get_property(name, true)?;
            }
            Opcode::SetProperty => {
                let name = self.read_string_constant();
                self.set_property(name)?;
            }

            Opcode::Call => {
                let argc = self.fetch_byte() as usize;
                let callee = self.peek(argc);
                self.call_value(callee, argc)?;
            }
            Opcode::Invoke => {
                let name = self.read_string_constant();
                let argc = self.fetch_byte() as usize;
                self.invoke(name, argc, false)?;
            }
            Opcode::InvokeSelf => {
                let name = self.read_string_constant();
                let argc = self.fetch_byte() as usize;
                self.invoke(name, argc, true)?;
            }
            Opcode::SuperInvoke => {
                let name = self.read_string_constant();
                let argc = self.fetch_byte() as usize;
                let class = self.pop_class("parent lookup")?;
                self.invoke_from_class(class, name, argc, false)?;
            }
            Opcode::SuperInvokeSelf => {
                let name = self.read_string_constant();
                let argc = self.fetch_byte() as usize;
                let class = self.pop_class("parent lookup")?;
                self.invoke_from_class(class, name, argc, true)?;
            }
            Opcode::Return => return self.op_return(),

            Opcode::Closure => self.op_closure()?,
            Opcode::Class => {
                let name = self.read_string_constant();
                let class = self.alloc_value(ObjData::Class(crate::heap::ClassObj::new(name)));
                self.push(class);
            }
            Opcode::Method => {
                let name = self.read_string_constant();
                let is_static = self.fetch_byte() == 1;
                self.define_method(name, is_static);
            }
            Opcode::ClassProperty => {
                let name = self.read_string_constant();
                let is_static = self.fetch_byte() == 1;
                self.define_class_property(name, is_static);
            }
            Opcode::Inherit => self.op_inherit()?,
            Opcode::GetSuper => {
                let name = self.read_string_constant();
                let class = self.pop_class("parent lookup")?;
                self.bind_method_from(class, name, true)?;
            }

            Opcode::List => {
                let count = self.fetch_u16() as usize;
                self.gc_checkpoint();
                let items = self.stack.split_off(self.stack.len() - count);
                let list = self.heap.allocate(ObjData::List(ListObj { items }));
                self.push(Value::Ref(list));
            }
            Opcode::Dict => {
                let count = self.fetch_u16() as usize;
                self.gc_checkpoint();
                let mut dict = DictObj::default();
                let from = self.stack.len() - count * 2;
                for pair in self.stack[from..].chunks_exact(2) {
                    dict.items.insert(pair[0], pair[1]);
                }
                self.stack.truncate(from);
                let dict = self.heap.allocate(ObjData::Dict(dict));
                self.push(Value::Ref(dict));
            }
            Opcode::Range => {
                let (Some(lower), Some(upper)) =
                    (self.peek(1).as_number(), self.peek(0).as_number())
                else {
                    return Err(self.type_error("invalid range boundaries").into());
                };
                self.gc_checkpoint();
                let range =
                    self.heap.allocate(ObjData::Range(RangeObj::new(lower as i64, upper as i64)));
                self.pop_n(2);
                self.push(Value::Ref(range));
            }
            Opcode::GetIndex => {
                let will_assign = self.fetch_byte() == 1;
                self.get_index(will_assign)?;
            }
            Opcode::GetRangedIndex => self.get_ranged_index()?,
            Opcode::SetIndex => self.set_index()?,

            Opcode::CallImport => self.op_call_import()?,
            Opcode::NativeModule => self.op_native_module()?,
            Opcode::SelectImport => self.op_select_import()?,
            Opcode::SelectNativeImport => self.op_select_native_import()?,
            Opcode::ImportAll => self.op_import_all()?,
            Opcode::ImportAllNative => self.op_import_all_native()?,
            Opcode::EjectImport | Opcode::EjectNativeImport => self.op_eject_import()?,

            Opcode::Try => self.op_try()?,
            Opcode::PopTry => {
                self.frames.last_mut().expect("no active frame").handlers.pop();
            }
            Opcode::PublishTry => self.op_publish_try()?,
            Opcode::BeginCatch => {
                let exc = self.caught_exception.take().unwrap_or(Value::Nil);
                self.push(exc);
            }
            Opcode::EndCatch => {
                self.caught_exception = None;
            }
            Opcode::Die => self.op_die()?,

            Opcode::Echo => {
                let value = self.pop();
                let text = if self.repl_mode {
                    self.heap.value_to_repr(value)
                } else {
                    self.heap.value_to_string(value)
                };
                self.echo.write_str(&text);
                self.echo.write_char('\n');
            }
            Opcode::Stringify => {
                if !self.heap.is_string(self.peek(0)) {
                    let value = self.pop();
                    let text = self.heap.value_to_string(value);
                    let interned = self.intern_string(text);
                    self.push(interned);
                }
            }
            Opcode::Assert => {
                let message = self.pop();
                let expression = self.pop();
                if self.heap.is_false(expression) {
                    let text = if message.is_nil() {
                        "assertion failed".to_string()
                    } else {
                        self.heap.value_to_string(message)
                    };
                    return Err(RunError::assertion(text).into());
                }
            }
            Opcode::Switch => self.op_switch(),
            Opcode::Choice => {
                let otherwise = self.pop();
                let then = self.pop();
                let condition = self.pop();
                if self.heap.is_false(condition) {
                    self.push(otherwise);
                } else {
                    self.push(then);
                }
            }
        }
        Ok(Flow::Continue)
    }

    // --- arithmetic ---------------------------------------------------------

    fn type_error(&self, message: &str) -> RunError {
        RunError::new(message)
    }

    fn operand_error(&self, op: Opcode) -> RunError {
        RunError::new(format!(
            "unsupported operand {} for {} and {}",
            op,
            self.heap.type_name(self.peek(1)),
            self.heap.type_name(self.peek(0))
        ))
    }

    /// `Add` is overloaded: string + any stringifies and concatenates,
    /// list + list and bytes + bytes append, otherwise numeric.
    fn op_add(&mut self) -> Result<(), Signal> {
        let b = self.peek(0);
        let a = self.peek(1);

        if self.heap.is_string(a) || self.heap.is_string(b) {
            let text = format!("{}{}", self.heap.value_to_string(a), self.heap.value_to_string(b));
            let result = self.intern_string(text);
            self.pop_n(2);
            self.push(result);
            return Ok(());
        }
        if let (Some(x), Some(y)) = (a.as_ref_id(), b.as_ref_id()) {
            if let (ObjData::List(la), ObjData::List(lb)) = (self.heap.get(x), self.heap.get(y)) {
                let mut items = la.items.clone();
                items.extend_from_slice(&lb.items);
                self.gc_checkpoint();
                let list = self.heap.allocate(ObjData::List(ListObj { items }));
                self.pop_n(2);
                self.push(Value::Ref(list));
                return Ok(());
            }
            if let (ObjData::Bytes(ba), ObjData::Bytes(bb)) = (self.heap.get(x), self.heap.get(y)) {
                let mut bytes = ba.bytes.clone();
                bytes.extend_from_slice(&bb.bytes);
                self.gc_checkpoint();
                let result = self.heap.allocate(ObjData::Bytes(BytesObj { bytes }));
                self.pop_n(2);
                self.push(Value::Ref(result));
                return Ok(());
            }
        }
        self.binary_number(Opcode::Add)
    }

    /// `Multiply` repeats strings and lists by an integer count.
    fn op_multiply(&mut self) -> Result<(), Signal> {
        let b = self.peek(0);
        let a = self.peek(1);

        if let (Some(id), Some(times)) = (a.as_ref_id(), b.as_number()) {
            let times = times as i64;
            match self.heap.get(id) {
                ObjData::Str(s) => {
                    let text = if times <= 0 {
                        String::new()
                    } else {
                        s.chars.repeat(times as usize)
                    };
                    let result = self.intern_string(text);
                    self.pop_n(2);
                    self.push(result);
                    return Ok(());
                }
                ObjData::List(l) => {
                    let mut items = Vec::new();
                    for _ in 0..times.max(0) {
                        items.extend_from_slice(&l.items);
                    }
                    self.gc_checkpoint();
                    let list = self.heap.allocate(ObjData::List(ListObj { items }));
                    self.pop_n(2);
                    self.push(Value::Ref(list));
                    return Ok(());
                }
                _ => {}
            }
        }
        self.binary_number(Opcode::Multiply)
    }

    fn binary_number(&mut self, op: Opcode) -> Result<(), Signal> {
        let (Some(x), Some(y)) = (self.peek(1).coerce_number(), self.peek(0).coerce_number())
        else {
            return Err(self.operand_error(op).into());
        };
        self.pop_n(2);
        let result = match op {
            Opcode::Add => x + y,
            Opcode::Subtract => x - y,
            Opcode::Multiply => x * y,
            Opcode::Divide => x / y,
            Opcode::FDivide => (x / y).floor(),
            Opcode::Reminder => x % y,
            Opcode::Pow => x.powf(y),
            _ => unreachable!("not a numeric binary opcode"),
        };
        self.push(Value::Number(result));
        Ok(())
    }

    fn binary_compare(&mut self, op: Opcode) -> Result<(), Signal> {
        let (Some(x), Some(y)) = (self.peek(1).coerce_number(), self.peek(0).coerce_number())
        else {
            return Err(self.operand_error(op).into());
        };
        self.pop_n(2);
        let result = match op {
            Opcode::Greater => x > y,
            Opcode::Less => x < y,
            _ => unreachable!("not a comparison opcode"),
        };
        self.push(Value::Bool(result));
        Ok(())
    }

    /// Bitwise operators run on integer-truncated operands.
    fn binary_bit(&mut self, op: Opcode) -> Result<(), Signal> {
        let (Some(x), Some(y)) = (self.peek(1).coerce_number(), self.peek(0).coerce_number())
        else {
            return Err(self.operand_error(op).into());
        };
        self.pop_n(2);
        let a = x as i64;
        let b = y as i64;
        let result = match op {
            Opcode::BitAnd => a & b,
            Opcode::BitOr => a | b,
            Opcode::BitXor => a ^ b,
            Opcode::LShift => a.wrapping_shl(b as u32 & 63),
            Opcode::RShift => a.wrapping_shr(b as u32 & 63),
            _ => unreachable!("not a bitwise opcode"),
        };
        self.push(Value::Number(result as f64));
        Ok(())
    }

    // --- up-values ----------------------------------------------------------

    fn frame_closure(&self) -> HeapId {
        let frame = self.frames.last().expect("no active frame");
        frame.callee.as_ref_id().expect("frame callee is a heap object")
    }

    fn read_up_value(&self, index: usize) -> Value {
        let closure = self.frame_closure();
        let up_value = self.heap.closure(closure).up_values[index];
        match self.heap.get(up_value) {
            ObjData::UpValue(UpValueObj::Open(location)) => self.stack[*location],
            ObjData::UpValue(UpValueObj::Closed(value)) => *value,
            _ => unreachable!("closure capture is an up-value"),
        }
    }

    fn write_up_value(&mut self, index: usize, value: Value) {
        let closure = self.frame_closure();
        let up_value = self.heap.closure(closure).up_values[index];
        match self.heap.get_mut(up_value) {
            ObjData::UpValue(UpValueObj::Open(location)) => {
                let location = *location;
                self.stack[location] = value;
            }
            ObjData::UpValue(up) => *up = UpValueObj::Closed(value),
            _ => unreachable!("closure capture is an up-value"),
        }
    }

    /// Returns the open up-value at `location`, threading a new one into
    /// the sorted list if none exists.
    pub(crate) fn capture_up_value(&mut self, location: usize) -> HeapId {
        let mut at = self.open_up_values.len();
        for (i, &id) in self.open_up_values.iter().enumerate() {
            let ObjData::UpValue(UpValueObj::Open(loc)) = self.heap.get(id) else {
                unreachable!("open list holds open up-values")
            };
            if *loc == location {
                return id;
            }
            if *loc < location {
                at = i;
                break;
            }
        }
        let created = self.alloc_id(ObjData::UpValue(UpValueObj::Open(location)));
        self.open_up_values.insert(at, created);
        created
    }

    /// Closes every open up-value at stack index `from` or above.
    pub(crate) fn close_up_values(&mut self, from: usize) {
        while let Some(&id) = self.open_up_values.first() {
            let ObjData::UpValue(UpValueObj::Open(location)) = self.heap.get(id) else {
                unreachable!("open list holds open up-values")
            };
            let location = *location;
            if location < from {
                break;
            }
            let value = self.stack[location];
            *self.heap.get_mut(id) = ObjData::UpValue(UpValueObj::Closed(value));
            self.open_up_values.remove(0);
        }
    }

    fn op_closure(&mut self) -> Result<(), Signal> {
        let function = self.read_constant().as_ref_id().expect("closure constant is a function");
        let count = self.heap.function(function).up_value_count;
        let closure = self.alloc_value(ObjData::Closure(crate::heap::ClosureObj {
            function,
            up_values: SmallVec::new(),
        }));
        self.push(closure);

        let enclosing = self.frames.last().expect("no active frame").callee;
        let base = self.frames.last().expect("no active frame").base;
        for _ in 0..count {
            let is_local = self.fetch_byte() == 1;
            let index = self.fetch_u16() as usize;
            let captured = if is_local {
                self.capture_up_value(base + index)
            } else {
                let enclosing = enclosing.as_ref_id().expect("enclosing callee is a closure");
                self.heap.closure(enclosing).up_values[index]
            };
            let closure_id = closure.as_ref_id().expect("closure was just allocated");
            if let ObjData::Closure(c) = self.heap.get_mut(closure_id) {
                c.up_values.push(captured);
            }
        }
        Ok(())
    }

    // --- classes ------------------------------------------------------------

    fn define_method(&mut self, name: HeapId, is_static: bool) {
        let method = self.peek(0);
        let class_id = self.peek(1).as_ref_id().expect("method target is a class");
        let class = self.heap.class_mut(class_id);
        if is_static {
            class.static_methods.insert(name, method);
        } else {
            class.methods.insert(name, method);
            // the method named after the class is the initializer
            if class.name == name {
                class.initializer = Some(method);
            }
        }
        self.pop();
    }

    fn define_class_property(&mut self, name: HeapId, is_static: bool) {
        let value = self.peek(0);
        let class_id = self.peek(1).as_ref_id().expect("property target is a class");
        let class = self.heap.class_mut(class_id);
        if is_static {
            class.static_fields.insert(name, value);
        } else {
            class.fields.insert(name, value);
        }
        self.pop();
    }

    fn op_inherit(&mut self) -> Result<(), Signal> {
        let superclass_value = self.peek(1);
        let Some(superclass) = superclass_value.as_ref_id() else {
            return Err(self.type_error("cannot inherit from non-class object").into());
        };
        if !matches!(self.heap.get(superclass), ObjData::Class(_)) {
            return Err(self.type_error("cannot inherit from non-class object").into());
        }
        let subclass = self.peek(0).as_ref_id().expect("inherit target is a class");

        let (fields, methods, initializer) = {
            let sup = self.heap.class(superclass);
            (sup.fields.clone(), sup.methods.clone(), sup.initializer)
        };
        let sub = self.heap.class_mut(subclass);
        sub.fields.extend(fields);
        sub.methods.extend(methods);
        sub.initializer = initializer;
        sub.superclass = Some(superclass);
        self.pop();
        Ok(())
    }

    fn pop_class(&mut self, what: &str) -> Result<HeapId, Signal> {
        let value = self.pop();
        match value.as_ref_id() {
            Some(id) if matches!(self.heap.get(id), ObjData::Class(_)) => Ok(id),
            _ => Err(self
                .type_error(&format!(
                    "expected class in {what}, found {}",
                    self.heap.type_name(value)
                ))
                .into()),
        }
    }

    // --- switch -------------------------------------------------------------

    fn op_switch(&mut self) {
        let switch = self.read_constant().as_ref_id().expect("switch constant");
        let value = self.pop();
        let jump = {
            let ObjData::Switch(sw) = self.heap.get(switch) else {
                unreachable!("switch constant is a switch table")
            };
            sw.table.get(&value).copied().unwrap_or(if sw.default_jump >= 0 {
                sw.default_jump
            } else {
                sw.exit_jump
            })
        };
        self.frames.last_mut().expect("no active frame").ip += jump as usize;
    }

    // --- tracing ------------------------------------------------------------

    fn trace_state(&self) {
        let mut line = String::from("          ");
        for value in &self.stack {
            line.push_str("[ ");
            line.push_str(&self.heap.value_to_repr(*value));
            line.push_str(" ]");
        }
        eprintln!("{line}");
        let frame = self.frames.last().expect("no active frame");
        let mut out = String::new();
        dis::disassemble_instruction(
            &self.heap,
            &self.heap.function(frame.function).blob,
            frame.ip,
            &mut out,
        );
        eprint!("{out}");
    }
}
