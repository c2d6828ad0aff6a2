//! The Blade scripting language execution core: a single-pass bytecode
//! compiler and a stack virtual machine with a mark-and-sweep heap,
//! closures, classes with single inheritance, an exception subsystem,
//! and a module system.
//!
//! ```no_run
//! use blade::{CollectStringEcho, Vm};
//!
//! let mut echo = CollectStringEcho::new();
//! let mut vm = Vm::new(&mut echo);
//! vm.run_source("echo 1 + 2", "<embed>");
//! drop(vm);
//! assert_eq!(echo.output(), "3\n");
//! ```

mod builtins;
mod bytecode;
mod compiler;
mod exceptions;
mod heap;
mod io;
mod modules;
mod repl;
mod scanner;
mod token;
mod value;
mod vm;

pub use crate::{
    bytecode::Blob,
    compiler::{CompileError, CompileOptions},
    exceptions::{ExcClass, RunError, RunResult},
    heap::{
        BoundMethodObj, BytesObj, ClassObj, ClosureObj, DictObj, FileHandle, FileObj,
        ForeignFinalizer, ForeignObj, FunctionKind, FunctionObj, GcStats, HeapId, InstanceObj,
        ListObj, ModuleObj, NativeObj, ObjData, RangeObj, StrObj, SwitchObj, Table, UpValueObj,
        DEFAULT_GC_START,
    },
    io::{CollectStringEcho, EchoWriter, NoEcho, StdEcho},
    modules::{ClassDef, FieldDef, FieldValueFn, FuncDef, ModuleDef, ModuleLoader},
    repl::{OpenDelimiters, ReplSession},
    value::Value,
    vm::{NativeFn, RunOutcome, Vm},
};
