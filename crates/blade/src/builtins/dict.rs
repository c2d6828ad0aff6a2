//! Dict methods. Iteration order is insertion order everywhere,
//! including removal (which shifts, preserving the remaining order).

use crate::exceptions::{run_err, RunResult};
use crate::heap::{DictObj, ListObj, ObjData};
use crate::value::Value;
use crate::vm::{NativeFn, Vm};

use super::support::{check_arity, check_arity_range, dict_arg, int_arg, receiver_id};

pub(crate) fn find(name: &str) -> Option<(&'static str, NativeFn)> {
    let entry: (&'static str, NativeFn) = match name {
        "length" => ("length", length),
        "add" => ("add", add),
        "set" => ("set", set),
        "assign" => ("assign", set),
        "clear" => ("clear", clear),
        "clone" => ("clone", clone),
        "compact" => ("compact", compact),
        "contains" => ("contains", contains),
        "extend" => ("extend", extend),
        "get" => ("get", get),
        "keys" => ("keys", keys),
        "values" => ("values", values),
        "remove" => ("remove", remove),
        "is_empty" => ("is_empty", is_empty),
        "find_key" => ("find_key", find_key),
        "to_list" => ("to_list", to_list),
        "@iter" => ("@iter", iter_key),
        "@itern" => ("@itern", iter_value),
        _ => return None,
    };
    Some(entry)
}

fn entries<'a>(vm: &'a Vm<'_>, receiver: Value) -> &'a DictObj {
    match vm.heap.get(receiver_id(receiver)) {
        ObjData::Dict(d) => d,
        _ => unreachable!("dict method on non-dict receiver"),
    }
}

fn entries_mut<'h>(vm: &'h mut Vm<'_>, receiver: Value) -> &'h mut DictObj {
    match vm.heap.get_mut(receiver_id(receiver)) {
        ObjData::Dict(d) => d,
        _ => unreachable!("dict method on non-dict receiver"),
    }
}

fn length(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("length", args, 0)?;
    Ok(Value::Number(entries(vm, receiver).items.len() as f64))
}

/// `add` inserts a new key; an existing key is an error (use `set`).
fn add(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("add", args, 2)?;
    if entries(vm, receiver).items.contains_key(&args[0]) {
        let shown = vm.heap.value_to_repr(args[0]);
        run_err!("duplicate key {shown} in dictionary");
    }
    entries_mut(vm, receiver).items.insert(args[0], args[1]);
    Ok(Value::Nil)
}

/// `set` inserts or updates; an update keeps the key's original position.
fn set(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("set", args, 2)?;
    entries_mut(vm, receiver).items.insert(args[0], args[1]);
    Ok(args[1])
}

fn clear(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("clear", args, 0)?;
    entries_mut(vm, receiver).items.clear();
    Ok(Value::Nil)
}

fn clone(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("clone", args, 0)?;
    let mut copied = DictObj::default();
    copied.items.extend(entries(vm, receiver).items.iter().map(|(&k, &v)| (k, v)));
    Ok(vm.alloc_value(ObjData::Dict(copied)))
}

/// Drops nil-valued entries into a fresh dict.
fn compact(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("compact", args, 0)?;
    let mut kept = DictObj::default();
    kept.items.extend(
        entries(vm, receiver).items.iter().filter(|(_, v)| !v.is_nil()).map(|(&k, &v)| (k, v)),
    );
    Ok(vm.alloc_value(ObjData::Dict(kept)))
}

fn contains(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("contains", args, 1)?;
    Ok(Value::Bool(entries(vm, receiver).items.contains_key(&args[0])))
}

fn extend(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("extend", args, 1)?;
    let other = dict_arg(&vm.heap, "extend", args, 0)?;
    let pairs: Vec<(Value, Value)> = match vm.heap.get(other) {
        ObjData::Dict(d) => d.items.iter().map(|(&k, &v)| (k, v)).collect(),
        _ => unreachable!("checked by dict_arg"),
    };
    entries_mut(vm, receiver).items.extend(pairs);
    Ok(Value::Nil)
}

/// Missing keys return the default (or nil) — unlike `[]`, which raises.
fn get(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity_range("get", args, 1, 2)?;
    let fallback = args.get(1).copied().unwrap_or(Value::Nil);
    Ok(entries(vm, receiver).items.get(&args[0]).copied().unwrap_or(fallback))
}

fn keys(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("keys", args, 0)?;
    let items: Vec<Value> = entries(vm, receiver).items.keys().copied().collect();
    Ok(vm.alloc_value(ObjData::List(ListObj { items })))
}

fn values(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("values", args, 0)?;
    let items: Vec<Value> = entries(vm, receiver).items.values().copied().collect();
    Ok(vm.alloc_value(ObjData::List(ListObj { items })))
}

/// Removes a key and returns its value; order of the remaining keys is
/// preserved.
fn remove(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("remove", args, 1)?;
    Ok(entries_mut(vm, receiver).items.shift_remove(&args[0]).unwrap_or(Value::Nil))
}

fn is_empty(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_empty", args, 0)?;
    Ok(Value::Bool(entries(vm, receiver).items.is_empty()))
}

fn find_key(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("find_key", args, 1)?;
    let found =
        entries(vm, receiver).items.iter().find(|(_, &v)| v == args[0]).map(|(&k, _)| k);
    Ok(found.unwrap_or(Value::Nil))
}

/// `[[key, value], …]` in insertion order.
fn to_list(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_list", args, 0)?;
    let pairs: Vec<(Value, Value)> =
        entries(vm, receiver).items.iter().map(|(&k, &v)| (k, v)).collect();
    let mut items = Vec::with_capacity(pairs.len());
    for (key, value) in pairs {
        items.push(vm.alloc_value(ObjData::List(ListObj { items: vec![key, value] })));
    }
    Ok(vm.alloc_value(ObjData::List(ListObj { items })))
}

/// `@iter(i)`: the i-th insertion-order key, `empty` when exhausted.
fn iter_key(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("@iter", args, 1)?;
    let index = int_arg(&vm.heap, "@iter", args, 0)?;
    let dict = entries(vm, receiver);
    if index >= 0 && (index as usize) < dict.items.len() {
        Ok(*dict.items.get_index(index as usize).expect("index checked").0)
    } else {
        Ok(Value::Empty)
    }
}

/// `@itern(key)`: the value at `key`, nil when absent.
fn iter_value(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("@itern", args, 1)?;
    Ok(entries(vm, receiver).items.get(&args[0]).copied().unwrap_or(Value::Nil))
}
