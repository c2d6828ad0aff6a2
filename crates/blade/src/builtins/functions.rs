//! The standalone intrinsic functions installed as globals.

use crate::exceptions::{run_err, RunResult};
use crate::heap::{BytesObj, DictObj, FileHandle, FileObj, ListObj, ObjData};
use crate::value::{fnv1a, mix_bits, Value};
use crate::vm::{NativeFn, Vm};

use super::support::{check_arity, check_arity_range, int_arg, number_arg, string_arg};

/// Every global intrinsic, in table form for registration.
pub(crate) const GLOBALS: &[(&str, NativeFn)] = &[
    ("abs", native_abs),
    ("bin", native_bin),
    ("bytes", native_bytes),
    ("chr", native_chr),
    ("delprop", native_delprop),
    ("file", native_file),
    ("getprop", native_getprop),
    ("hash", native_hash),
    ("hasprop", native_hasprop),
    ("hex", native_hex),
    ("id", native_id),
    ("int", native_int),
    ("is_bool", native_is_bool),
    ("is_bytes", native_is_bytes),
    ("is_callable", native_is_callable),
    ("is_class", native_is_class),
    ("is_dict", native_is_dict),
    ("is_file", native_is_file),
    ("is_function", native_is_function),
    ("is_instance", native_is_instance),
    ("is_int", native_is_int),
    ("is_iterable", native_is_iterable),
    ("is_list", native_is_list),
    ("is_number", native_is_number),
    ("is_object", native_is_object),
    ("is_string", native_is_string),
    ("max", native_max),
    ("min", native_min),
    ("oct", native_oct),
    ("ord", native_ord),
    ("print", native_print),
    ("setprop", native_setprop),
    ("sum", native_sum),
    ("to_bool", native_to_bool),
    ("to_dict", native_to_dict),
    ("to_int", native_to_int),
    ("to_list", native_to_list),
    ("to_number", native_to_number),
    ("to_string", native_to_string),
    ("typeof", native_typeof),
];

fn native_abs(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("abs", args, 1)?;
    Ok(Value::Number(number_arg(&vm.heap, "abs", args, 0)?.abs()))
}

fn native_bin(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("bin", args, 1)?;
    let n = int_arg(&vm.heap, "bin", args, 0)?;
    Ok(vm.intern_string(format!("0b{n:b}")))
}

fn native_hex(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("hex", args, 1)?;
    let n = int_arg(&vm.heap, "hex", args, 0)?;
    Ok(vm.intern_string(format!("0x{n:x}")))
}

fn native_oct(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("oct", args, 1)?;
    let n = int_arg(&vm.heap, "oct", args, 0)?;
    Ok(vm.intern_string(format!("0c{n:o}")))
}

/// `bytes(n)` makes `n` zeroed bytes; `bytes([…])` packs a list of
/// numbers in the 0..=255 range.
fn native_bytes(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("bytes", args, 1)?;
    match args[0] {
        Value::Number(n) if n >= 0.0 => {
            Ok(vm.alloc_value(ObjData::Bytes(BytesObj { bytes: vec![0; n as usize] })))
        }
        Value::Ref(id) => {
            let items = match vm.heap.get(id) {
                ObjData::List(l) => l.items.clone(),
                _ => run_err!("bytes() expects a number or a list of numbers"),
            };
            let mut bytes = Vec::with_capacity(items.len());
            for item in items {
                match item.as_int() {
                    Some(b) if (0..=255).contains(&b) => bytes.push(b as u8),
                    _ => run_err!("bytes() list items must be numbers between 0 and 255"),
                }
            }
            Ok(vm.alloc_value(ObjData::Bytes(BytesObj { bytes })))
        }
        _ => run_err!("bytes() expects a number or a list of numbers"),
    }
}

fn native_chr(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("chr", args, 1)?;
    let code = int_arg(&vm.heap, "chr", args, 0)?;
    let Some(ch) = u32::try_from(code).ok().and_then(char::from_u32) else {
        run_err!("chr() argument is not a valid codepoint");
    };
    Ok(vm.intern_string(ch.to_string()))
}

fn native_ord(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("ord", args, 1)?;
    let text = string_arg(&vm.heap, "ord", args, 0)?;
    match text.chars().next() {
        Some(ch) => Ok(Value::Number(f64::from(u32::from(ch)))),
        None => run_err!("ord() expects a non-empty string"),
    }
}

fn native_file(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity_range("file", args, 1, 2)?;
    let path = string_arg(&vm.heap, "file", args, 0)?;
    let mode = if args.len() == 2 {
        string_arg(&vm.heap, "file", args, 1)?
    } else {
        "r".to_string()
    };
    if !matches!(mode.as_str(), "r" | "w" | "a" | "r+" | "w+" | "a+") {
        run_err!("invalid file mode '{mode}'");
    }
    Ok(vm.alloc_value(ObjData::File(FileObj {
        path,
        mode,
        handle: FileHandle::Closed,
        is_open: false,
    })))
}

fn instance_field_key(
    vm: &mut Vm<'_>,
    name: &str,
    args: &[Value],
) -> RunResult<(crate::heap::HeapId, crate::heap::HeapId)> {
    if !vm.heap.is_instance(args[0]) {
        run_err!("{name}() expects argument 1 as instance");
    }
    let id = args[0].as_ref_id().expect("instance is a heap object");
    let field = string_arg(&vm.heap, name, args, 1)?;
    let key = vm.heap.intern(&field);
    Ok((id, key))
}

fn native_getprop(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("getprop", args, 2)?;
    let (id, key) = instance_field_key(vm, "getprop", args)?;
    Ok(vm.heap.instance(id).fields.get(&key).copied().unwrap_or(Value::Nil))
}

fn native_setprop(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("setprop", args, 3)?;
    let (id, key) = instance_field_key(vm, "setprop", args)?;
    let previous = vm.heap.instance_mut(id).fields.insert(key, args[2]);
    Ok(Value::Bool(previous.is_none()))
}

fn native_hasprop(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("hasprop", args, 2)?;
    let (id, key) = instance_field_key(vm, "hasprop", args)?;
    Ok(Value::Bool(vm.heap.instance(id).fields.contains_key(&key)))
}

fn native_delprop(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("delprop", args, 2)?;
    let (id, key) = instance_field_key(vm, "delprop", args)?;
    Ok(Value::Bool(vm.heap.instance_mut(id).fields.remove(&key).is_some()))
}

/// Hashes any value: strings by their cached FNV hash, numbers by the
/// bit mixer, objects by identity.
fn native_hash(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("hash", args, 1)?;
    let hash = match args[0] {
        Value::Nil => 7,
        Value::Empty => 0,
        Value::Bool(b) => {
            if b {
                3
            } else {
                5
            }
        }
        Value::Number(n) => mix_bits(n.to_bits()),
        Value::Ref(id) => match vm.heap.get(id) {
            ObjData::Str(s) => u64::from(s.hash),
            ObjData::Bytes(b) => u64::from(fnv1a(&b.bytes)),
            _ => id.index() as u64,
        },
    };
    Ok(Value::Number(hash as f64))
}

fn native_id(_vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("id", args, 1)?;
    match args[0] {
        Value::Ref(id) => Ok(Value::Number(id.index() as f64)),
        _ => Ok(Value::Nil),
    }
}

fn native_int(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity_range("int", args, 0, 1)?;
    if args.is_empty() {
        return Ok(Value::Number(0.0));
    }
    Ok(Value::Number(number_arg(&vm.heap, "int", args, 0)?.trunc()))
}

// --- type predicates --------------------------------------------------------

fn native_is_bool(_vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_bool", args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Bool(_))))
}

fn native_is_number(_vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_number", args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Number(_))))
}

fn native_is_int(_vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_int", args, 1)?;
    Ok(Value::Bool(args[0].as_int().is_some()))
}

fn native_is_string(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_string", args, 1)?;
    Ok(Value::Bool(vm.heap.is_string(args[0])))
}

fn native_is_list(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_list", args, 1)?;
    Ok(Value::Bool(vm.heap.is_list(args[0])))
}

fn native_is_dict(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_dict", args, 1)?;
    Ok(Value::Bool(vm.heap.is_dict(args[0])))
}

fn native_is_bytes(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_bytes", args, 1)?;
    Ok(Value::Bool(vm.heap.is_bytes(args[0])))
}

fn native_is_file(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_file", args, 1)?;
    Ok(Value::Bool(vm.heap.is_obj_kind(args[0], |d| matches!(d, ObjData::File(_)))))
}

fn native_is_class(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_class", args, 1)?;
    Ok(Value::Bool(vm.heap.is_obj_kind(args[0], |d| matches!(d, ObjData::Class(_)))))
}

fn native_is_instance(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_instance", args, 1)?;
    Ok(Value::Bool(vm.heap.is_instance(args[0])))
}

fn native_is_function(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_function", args, 1)?;
    Ok(Value::Bool(vm.heap.is_obj_kind(args[0], |d| {
        matches!(
            d,
            ObjData::Function(_) | ObjData::Closure(_) | ObjData::Native(_) | ObjData::BoundMethod(_)
        )
    })))
}

fn native_is_callable(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_callable", args, 1)?;
    Ok(Value::Bool(vm.heap.is_obj_kind(args[0], |d| {
        matches!(
            d,
            ObjData::Function(_)
                | ObjData::Closure(_)
                | ObjData::Native(_)
                | ObjData::BoundMethod(_)
                | ObjData::Class(_)
        )
    })))
}

fn native_is_object(_vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_object", args, 1)?;
    Ok(Value::Bool(matches!(args[0], Value::Ref(_))))
}

fn native_is_iterable(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_iterable", args, 1)?;
    let iterable = match args[0].as_ref_id() {
        Some(id) => match vm.heap.get(id) {
            ObjData::Str(_) | ObjData::List(_) | ObjData::Dict(_) | ObjData::Bytes(_)
            | ObjData::Range(_) => true,
            ObjData::Instance(instance) => {
                let class_id = instance.class;
                let iter_key = vm.heap.intern("@iter");
                vm.heap.class(class_id).methods.contains_key(&iter_key)
            }
            _ => false,
        },
        None => false,
    };
    Ok(Value::Bool(iterable))
}

// --- reductions -------------------------------------------------------------

fn native_max(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    if args.is_empty() {
        run_err!("max() expects at least 1 argument, 0 given");
    }
    let mut best = number_arg(&vm.heap, "max", args, 0)?;
    for i in 1..args.len() {
        best = best.max(number_arg(&vm.heap, "max", args, i)?);
    }
    Ok(Value::Number(best))
}

fn native_min(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    if args.is_empty() {
        run_err!("min() expects at least 1 argument, 0 given");
    }
    let mut best = number_arg(&vm.heap, "min", args, 0)?;
    for i in 1..args.len() {
        best = best.min(number_arg(&vm.heap, "min", args, i)?);
    }
    Ok(Value::Number(best))
}

fn native_sum(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    let mut total = 0.0;
    for i in 0..args.len() {
        total += number_arg(&vm.heap, "sum", args, i)?;
    }
    Ok(Value::Number(total))
}

// --- output -----------------------------------------------------------------

/// `print(...)`: arguments joined by a space, no trailing newline.
fn native_print(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    for (i, &arg) in args.iter().enumerate() {
        if i > 0 {
            vm.echo.write_char(' ');
        }
        let text = vm.heap.value_to_string(arg);
        vm.echo.write_str(&text);
    }
    Ok(Value::Nil)
}

// --- conversions ------------------------------------------------------------

fn native_to_string(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_string", args, 1)?;
    let text = vm.heap.value_to_string(args[0]);
    Ok(vm.intern_string(text))
}

fn native_to_number(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_number", args, 1)?;
    match args[0] {
        Value::Number(n) => Ok(Value::Number(n)),
        Value::Bool(b) => Ok(Value::Number(if b { 1.0 } else { 0.0 })),
        value if vm.heap.is_string(value) => {
            let id = value.as_ref_id().expect("string value");
            let text = vm.heap.str_contents(id).trim();
            match text.parse::<f64>() {
                Ok(n) => Ok(Value::Number(n)),
                Err(_) => run_err!("'{text}' is not a valid number"),
            }
        }
        other => run_err!("cannot convert {} to number", vm.heap.type_name(other)),
    }
}

fn native_to_int(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_int", args, 1)?;
    let n = native_to_number(vm, Value::Nil, args)?;
    Ok(Value::Number(n.as_number().expect("to_number returns a number").trunc()))
}

fn native_to_bool(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_bool", args, 1)?;
    Ok(Value::Bool(!vm.heap.is_false(args[0])))
}

fn native_to_list(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_list", args, 1)?;
    let Some(id) = args[0].as_ref_id() else {
        run_err!("cannot convert {} to list", vm.heap.type_name(args[0]));
    };
    let items: Vec<Value> = match vm.heap.get(id) {
        ObjData::List(_) => return Ok(args[0]),
        ObjData::Str(s) => {
            let chars: Vec<String> = s.chars.chars().map(|c| c.to_string()).collect();
            let mut items = Vec::with_capacity(chars.len());
            for ch in chars {
                items.push(vm.intern_string(ch));
            }
            items
        }
        ObjData::Bytes(b) => b.bytes.iter().map(|&b| Value::Number(f64::from(b))).collect(),
        ObjData::Range(r) => {
            let r = *r;
            (0..r.count()).map(|i| Value::Number(r.element(i) as f64)).collect()
        }
        ObjData::Dict(d) => d.items.keys().copied().collect(),
        other => run_err!("cannot convert {} to list", other.type_name()),
    };
    Ok(vm.alloc_value(ObjData::List(ListObj { items })))
}

fn native_to_dict(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_dict", args, 1)?;
    let Some(id) = args[0].as_ref_id() else {
        run_err!("cannot convert {} to dict", vm.heap.type_name(args[0]));
    };
    match vm.heap.get(id) {
        ObjData::Dict(_) => Ok(args[0]),
        ObjData::Instance(instance) => {
            let fields: Vec<(crate::heap::HeapId, Value)> =
                instance.fields.iter().map(|(&k, &v)| (k, v)).collect();
            let mut dict = DictObj::default();
            for (key, value) in fields {
                dict.items.insert(Value::Ref(key), value);
            }
            Ok(vm.alloc_value(ObjData::Dict(dict)))
        }
        other => run_err!("cannot convert {} to dict", other.type_name()),
    }
}

fn native_typeof(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("typeof", args, 1)?;
    let name = vm.heap.type_name(args[0]);
    Ok(Value::Ref(vm.heap.intern(name)))
}
