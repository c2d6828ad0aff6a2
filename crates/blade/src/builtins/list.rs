//! List methods.

use crate::exceptions::{run_err, RunResult};
use crate::heap::{DictObj, HeapId, ListObj, ObjData};
use crate::value::Value;
use crate::vm::{NativeFn, Vm};

use super::support::{
    check_arity, check_arity_range, compare_values, int_arg, list_arg, receiver_id,
    sequence_iter_key,
};

pub(crate) fn find(name: &str) -> Option<(&'static str, NativeFn)> {
    let entry: (&'static str, NativeFn) = match name {
        "length" => ("length", length),
        "append" => ("append", append),
        "clear" => ("clear", clear),
        "clone" => ("clone", clone),
        "count" => ("count", count),
        "extend" => ("extend", extend),
        "index_of" => ("index_of", index_of),
        "insert" => ("insert", insert),
        "pop" => ("pop", pop),
        "shift" => ("shift", shift),
        "remove_at" => ("remove_at", remove_at),
        "remove" => ("remove", remove),
        "reverse" => ("reverse", reverse),
        "sort" => ("sort", sort),
        "contains" => ("contains", contains),
        "first" => ("first", first),
        "last" => ("last", last),
        "is_empty" => ("is_empty", is_empty),
        "take" => ("take", take),
        "get" => ("get", get),
        "compact" => ("compact", compact),
        "unique" => ("unique", unique),
        "zip" => ("zip", zip),
        "to_dict" => ("to_dict", to_dict),
        "@iter" => ("@iter", iter_key),
        "@itern" => ("@itern", iter_value),
        _ => return None,
    };
    Some(entry)
}

fn items<'a>(vm: &'a Vm<'_>, receiver: Value) -> &'a Vec<Value> {
    match vm.heap.get(receiver_id(receiver)) {
        ObjData::List(l) => &l.items,
        _ => unreachable!("list method on non-list receiver"),
    }
}

fn items_mut<'h>(vm: &'h mut Vm<'_>, receiver: Value) -> &'h mut Vec<Value> {
    match vm.heap.get_mut(receiver_id(receiver)) {
        ObjData::List(l) => &mut l.items,
        _ => unreachable!("list method on non-list receiver"),
    }
}

fn length(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("length", args, 0)?;
    Ok(Value::Number(items(vm, receiver).len() as f64))
}

fn append(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("append", args, 1)?;
    items_mut(vm, receiver).push(args[0]);
    Ok(Value::Nil)
}

fn clear(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("clear", args, 0)?;
    items_mut(vm, receiver).clear();
    Ok(Value::Nil)
}

fn clone(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("clone", args, 0)?;
    let copied = items(vm, receiver).clone();
    Ok(vm.alloc_value(ObjData::List(ListObj { items: copied })))
}

fn count(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("count", args, 1)?;
    let found = items(vm, receiver).iter().filter(|&&v| v == args[0]).count();
    Ok(Value::Number(found as f64))
}

fn extend(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("extend", args, 1)?;
    let other: HeapId = list_arg(&vm.heap, "extend", args, 0)?;
    let other_items = match vm.heap.get(other) {
        ObjData::List(l) => l.items.clone(),
        _ => unreachable!("checked by list_arg"),
    };
    items_mut(vm, receiver).extend(other_items);
    Ok(Value::Nil)
}

fn index_of(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("index_of", args, 1)?;
    let at = items(vm, receiver).iter().position(|&v| v == args[0]);
    Ok(Value::Number(at.map_or(-1.0, |i| i as f64)))
}

fn insert(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("insert", args, 2)?;
    let index = int_arg(&vm.heap, "insert", args, 1)?;
    let list = items_mut(vm, receiver);
    let at = index.clamp(0, list.len() as i64) as usize;
    list.insert(at, args[0]);
    Ok(Value::Nil)
}

fn pop(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("pop", args, 0)?;
    Ok(items_mut(vm, receiver).pop().unwrap_or(Value::Nil))
}

fn shift(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("shift", args, 0)?;
    let list = items_mut(vm, receiver);
    if list.is_empty() {
        return Ok(Value::Nil);
    }
    Ok(list.remove(0))
}

fn remove_at(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("remove_at", args, 1)?;
    let index = int_arg(&vm.heap, "remove_at", args, 0)?;
    let list = items_mut(vm, receiver);
    let len = list.len() as i64;
    let at = if index < 0 { index + len } else { index };
    if !(0..len).contains(&at) {
        run_err!("list index {index} out of range");
    }
    Ok(list.remove(at as usize))
}

fn remove(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("remove", args, 1)?;
    let list = items_mut(vm, receiver);
    if let Some(at) = list.iter().position(|&v| v == args[0]) {
        list.remove(at);
    }
    Ok(Value::Nil)
}

fn reverse(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("reverse", args, 0)?;
    items_mut(vm, receiver).reverse();
    Ok(Value::Nil)
}

fn sort(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("sort", args, 0)?;
    let mut sorted = items(vm, receiver).clone();
    sorted.sort_by(|&a, &b| compare_values(&vm.heap, a, b));
    *items_mut(vm, receiver) = sorted;
    Ok(Value::Nil)
}

fn contains(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("contains", args, 1)?;
    Ok(Value::Bool(items(vm, receiver).contains(&args[0])))
}

fn first(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("first", args, 0)?;
    Ok(items(vm, receiver).first().copied().unwrap_or(Value::Nil))
}

fn last(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("last", args, 0)?;
    Ok(items(vm, receiver).last().copied().unwrap_or(Value::Nil))
}

fn is_empty(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_empty", args, 0)?;
    Ok(Value::Bool(items(vm, receiver).is_empty()))
}

fn take(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("take", args, 1)?;
    let n = int_arg(&vm.heap, "take", args, 0)?;
    let list = items(vm, receiver);
    // a negative count takes from the end, like a negative index
    let taken: Vec<Value> = if n < 0 {
        let from = (list.len() as i64 + n).max(0) as usize;
        list[from..].to_vec()
    } else {
        list.iter().copied().take(n as usize).collect()
    };
    Ok(vm.alloc_value(ObjData::List(ListObj { items: taken })))
}

fn get(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity_range("get", args, 1, 2)?;
    let index = int_arg(&vm.heap, "get", args, 0)?;
    let fallback = args.get(1).copied().unwrap_or(Value::Nil);
    let list = items(vm, receiver);
    let len = list.len() as i64;
    let at = if index < 0 { index + len } else { index };
    if (0..len).contains(&at) {
        Ok(list[at as usize])
    } else {
        Ok(fallback)
    }
}

fn compact(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("compact", args, 0)?;
    let kept: Vec<Value> = items(vm, receiver).iter().copied().filter(|v| !v.is_nil()).collect();
    Ok(vm.alloc_value(ObjData::List(ListObj { items: kept })))
}

fn unique(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("unique", args, 0)?;
    let mut kept: Vec<Value> = Vec::new();
    for &item in items(vm, receiver) {
        if !kept.contains(&item) {
            kept.push(item);
        }
    }
    Ok(vm.alloc_value(ObjData::List(ListObj { items: kept })))
}

/// `a.zip(b, c, …)`: a list of per-index groups, sized to the receiver.
fn zip(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    let base = items(vm, receiver).clone();
    let mut others: Vec<Vec<Value>> = Vec::with_capacity(args.len());
    for i in 0..args.len() {
        let id = list_arg(&vm.heap, "zip", args, i)?;
        let other = match vm.heap.get(id) {
            ObjData::List(l) => l.items.clone(),
            _ => unreachable!("checked by list_arg"),
        };
        others.push(other);
    }

    let mut groups = Vec::with_capacity(base.len());
    for (i, &value) in base.iter().enumerate() {
        let mut group = Vec::with_capacity(args.len() + 1);
        group.push(value);
        for other in &others {
            group.push(other.get(i).copied().unwrap_or(Value::Nil));
        }
        groups.push(vm.alloc_value(ObjData::List(ListObj { items: group })));
    }
    Ok(vm.alloc_value(ObjData::List(ListObj { items: groups })))
}

/// Converts to a dict of index keys, preserving order.
fn to_dict(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_dict", args, 0)?;
    let list = items(vm, receiver).clone();
    let mut dict = DictObj::default();
    for (i, value) in list.into_iter().enumerate() {
        dict.items.insert(Value::Number(i as f64), value);
    }
    Ok(vm.alloc_value(ObjData::Dict(dict)))
}

fn iter_key(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("@iter", args, 1)?;
    let len = items(vm, receiver).len();
    sequence_iter_key(&vm.heap, "@iter", args, len)
}

fn iter_value(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("@itern", args, 1)?;
    let index = int_arg(&vm.heap, "@itern", args, 0)?;
    let list = items(vm, receiver);
    if index >= 0 && (index as usize) < list.len() {
        Ok(list[index as usize])
    } else {
        Ok(Value::Nil)
    }
}
