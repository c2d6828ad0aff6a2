//! Bytes methods: byte-indexed operations over the raw buffer.

use crate::exceptions::{run_err, RunResult};
use crate::heap::{BytesObj, ListObj, ObjData};
use crate::value::Value;
use crate::vm::{NativeFn, Vm};

use super::support::{
    bytes_arg, check_arity, check_arity_range, int_arg, receiver_id, sequence_iter_key,
};

pub(crate) fn find(name: &str) -> Option<(&'static str, NativeFn)> {
    let entry: (&'static str, NativeFn) = match name {
        "length" => ("length", length),
        "append" => ("append", append),
        "clone" => ("clone", clone),
        "extend" => ("extend", extend),
        "pop" => ("pop", pop),
        "remove" => ("remove", remove),
        "reverse" => ("reverse", reverse),
        "first" => ("first", first),
        "last" => ("last", last),
        "get" => ("get", get),
        "is_alpha" => ("is_alpha", is_alpha),
        "is_alnum" => ("is_alnum", is_alnum),
        "is_number" => ("is_number", is_number),
        "is_lower" => ("is_lower", is_lower),
        "is_upper" => ("is_upper", is_upper),
        "is_space" => ("is_space", is_space),
        "to_list" => ("to_list", to_list),
        "to_string" => ("to_string", to_string),
        "@iter" => ("@iter", iter_key),
        "@itern" => ("@itern", iter_value),
        _ => return None,
    };
    Some(entry)
}

fn buffer<'a>(vm: &'a Vm<'_>, receiver: Value) -> &'a Vec<u8> {
    match vm.heap.get(receiver_id(receiver)) {
        ObjData::Bytes(b) => &b.bytes,
        _ => unreachable!("bytes method on non-bytes receiver"),
    }
}

fn buffer_mut<'h>(vm: &'h mut Vm<'_>, receiver: Value) -> &'h mut Vec<u8> {
    match vm.heap.get_mut(receiver_id(receiver)) {
        ObjData::Bytes(b) => &mut b.bytes,
        _ => unreachable!("bytes method on non-bytes receiver"),
    }
}

fn byte_value(vm: &Vm<'_>, name: &str, args: &[Value], index: usize) -> RunResult<u8> {
    match int_arg(&vm.heap, name, args, index)? {
        b @ 0..=255 => Ok(b as u8),
        _ => Err(crate::exceptions::RunError::new(
            "invalid byte. bytes are numbers between 0 and 255.",
        )),
    }
}

fn length(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("length", args, 0)?;
    Ok(Value::Number(buffer(vm, receiver).len() as f64))
}

fn append(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("append", args, 1)?;
    let byte = byte_value(vm, "append", args, 0)?;
    buffer_mut(vm, receiver).push(byte);
    Ok(Value::Nil)
}

fn clone(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("clone", args, 0)?;
    let bytes = buffer(vm, receiver).clone();
    Ok(vm.alloc_value(ObjData::Bytes(BytesObj { bytes })))
}

fn extend(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("extend", args, 1)?;
    let other = bytes_arg(&vm.heap, "extend", args, 0)?;
    let other_bytes = match vm.heap.get(other) {
        ObjData::Bytes(b) => b.bytes.clone(),
        _ => unreachable!("checked by bytes_arg"),
    };
    buffer_mut(vm, receiver).extend_from_slice(&other_bytes);
    Ok(Value::Nil)
}

fn pop(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("pop", args, 0)?;
    Ok(buffer_mut(vm, receiver)
        .pop()
        .map_or(Value::Nil, |b| Value::Number(f64::from(b))))
}

/// Removes the byte at an index and returns it.
fn remove(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("remove", args, 1)?;
    let index = int_arg(&vm.heap, "remove", args, 0)?;
    let bytes = buffer_mut(vm, receiver);
    let len = bytes.len() as i64;
    let at = if index < 0 { index + len } else { index };
    if !(0..len).contains(&at) {
        run_err!("bytes index {index} out of range");
    }
    Ok(Value::Number(f64::from(bytes.remove(at as usize))))
}

fn reverse(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("reverse", args, 0)?;
    buffer_mut(vm, receiver).reverse();
    Ok(Value::Nil)
}

fn first(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("first", args, 0)?;
    Ok(buffer(vm, receiver).first().map_or(Value::Nil, |&b| Value::Number(f64::from(b))))
}

fn last(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("last", args, 0)?;
    Ok(buffer(vm, receiver).last().map_or(Value::Nil, |&b| Value::Number(f64::from(b))))
}

fn get(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity_range("get", args, 1, 2)?;
    let index = int_arg(&vm.heap, "get", args, 0)?;
    let fallback = args.get(1).copied().unwrap_or(Value::Nil);
    let bytes = buffer(vm, receiver);
    let len = bytes.len() as i64;
    let at = if index < 0 { index + len } else { index };
    if (0..len).contains(&at) {
        Ok(Value::Number(f64::from(bytes[at as usize])))
    } else {
        Ok(fallback)
    }
}

fn class_check(
    vm: &mut Vm<'_>,
    receiver: Value,
    args: &[Value],
    name: &str,
    pred: fn(&u8) -> bool,
) -> RunResult<Value> {
    check_arity(name, args, 0)?;
    let bytes = buffer(vm, receiver);
    Ok(Value::Bool(!bytes.is_empty() && bytes.iter().all(pred)))
}

fn is_alpha(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    class_check(vm, receiver, args, "is_alpha", u8::is_ascii_alphabetic)
}

fn is_alnum(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    class_check(vm, receiver, args, "is_alnum", u8::is_ascii_alphanumeric)
}

fn is_number(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    class_check(vm, receiver, args, "is_number", u8::is_ascii_digit)
}

fn is_lower(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    class_check(vm, receiver, args, "is_lower", u8::is_ascii_lowercase)
}

fn is_upper(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    class_check(vm, receiver, args, "is_upper", u8::is_ascii_uppercase)
}

fn is_space(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    class_check(vm, receiver, args, "is_space", u8::is_ascii_whitespace)
}

fn to_list(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_list", args, 0)?;
    let items: Vec<Value> =
        buffer(vm, receiver).iter().map(|&b| Value::Number(f64::from(b))).collect();
    Ok(vm.alloc_value(ObjData::List(ListObj { items })))
}

/// Decodes the buffer as UTF-8, replacing invalid sequences.
fn to_string(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_string", args, 0)?;
    let text = String::from_utf8_lossy(buffer(vm, receiver)).into_owned();
    Ok(vm.intern_string(text))
}

fn iter_key(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("@iter", args, 1)?;
    let len = buffer(vm, receiver).len();
    sequence_iter_key(&vm.heap, "@iter", args, len)
}

fn iter_value(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("@itern", args, 1)?;
    let index = int_arg(&vm.heap, "@itern", args, 0)?;
    let bytes = buffer(vm, receiver);
    if index >= 0 && (index as usize) < bytes.len() {
        Ok(Value::Number(f64::from(bytes[index as usize])))
    } else {
        Ok(Value::Nil)
    }
}
