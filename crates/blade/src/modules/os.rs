//! The `os` native module: an `Os` class of static methods and
//! constants over `std::env`.

use std::env;

use crate::builtins::support::{check_arity, string_arg};
use crate::exceptions::RunResult;
use crate::heap::{DictObj, ListObj, ObjData};
use crate::value::Value;
use crate::vm::Vm;

use super::{ClassDef, FieldDef, FuncDef, ModuleDef};

pub fn module_def() -> ModuleDef {
    ModuleDef {
        name: "os",
        fields: Vec::new(),
        functions: Vec::new(),
        classes: vec![ClassDef {
            name: "Os",
            fields: vec![
                FieldDef { name: "platform", is_static: true, value: os_platform },
                FieldDef { name: "path_separator", is_static: true, value: os_path_separator },
            ],
            functions: vec![
                FuncDef { name: "info", is_static: true, function: os_info },
                FuncDef { name: "cwd", is_static: true, function: os_cwd },
                FuncDef { name: "env", is_static: true, function: os_env },
                FuncDef { name: "args", is_static: true, function: os_args },
            ],
        }],
        preloader: None,
        unloader: None,
    }
}

fn os_platform(vm: &mut Vm<'_>) -> Value {
    Value::Ref(vm.heap.intern(env::consts::OS))
}

fn os_path_separator(vm: &mut Vm<'_>) -> Value {
    Value::Ref(vm.heap.intern(std::path::MAIN_SEPARATOR_STR))
}

fn os_info(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("info", args, 0)?;
    let mut dict = DictObj::default();
    for (key, value) in [
        ("sysname", env::consts::OS),
        ("machine", env::consts::ARCH),
        ("family", env::consts::FAMILY),
    ] {
        let key = Value::Ref(vm.heap.intern(key));
        let value = Value::Ref(vm.heap.intern(value));
        dict.items.insert(key, value);
    }
    Ok(vm.alloc_value(ObjData::Dict(dict)))
}

fn os_cwd(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("cwd", args, 0)?;
    let cwd = env::current_dir().map_or_else(|_| String::new(), |p| p.display().to_string());
    Ok(Value::Ref(vm.heap.intern_owned(cwd)))
}

fn os_env(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("env", args, 1)?;
    let name = string_arg(&vm.heap, "env", args, 0)?;
    match env::var(&name) {
        Ok(value) => Ok(Value::Ref(vm.heap.intern_owned(value))),
        Err(_) => Ok(Value::Nil),
    }
}

/// The arguments handed to the running script (after the script path on
/// the command line), as a list of strings.
fn os_args(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("args", args, 0)?;
    let std_args = vm.std_args().to_vec();
    let mut items = Vec::with_capacity(std_args.len());
    for arg in std_args {
        items.push(vm.intern_string(arg));
    }
    Ok(vm.alloc_value(ObjData::List(ListObj { items })))
}
