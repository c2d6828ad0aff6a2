//! Argument enforcement helpers shared by every native function.
//!
//! These replace the C originals' `ENFORCE_ARG_COUNT`/`ENFORCE_ARG_TYPE`
//! macro family with fallible helpers: a violation becomes a `RunError`
//! the dispatch loop turns into a catchable exception.

use crate::exceptions::{RunError, RunResult};
use crate::heap::{Heap, HeapId};
use crate::value::Value;

pub(crate) fn check_arity(name: &str, args: &[Value], expected: usize) -> RunResult<()> {
    if args.len() != expected {
        return Err(RunError::new(format!(
            "{name}() expects {expected} arguments, {} given",
            args.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_arity_range(
    name: &str,
    args: &[Value],
    min: usize,
    max: usize,
) -> RunResult<()> {
    if args.len() < min || args.len() > max {
        return Err(RunError::new(format!(
            "{name}() expects between {min} and {max} arguments, {} given",
            args.len()
        )));
    }
    Ok(())
}

fn type_mismatch(heap: &Heap, name: &str, index: usize, expected: &str, got: Value) -> RunError {
    RunError::new(format!(
        "{name}() expects argument {} as {expected}, {} given",
        index + 1,
        heap.type_name(got)
    ))
}

pub(crate) fn number_arg(heap: &Heap, name: &str, args: &[Value], index: usize) -> RunResult<f64> {
    match args.get(index).copied() {
        Some(Value::Number(n)) => Ok(n),
        Some(other) => Err(type_mismatch(heap, name, index, "number", other)),
        None => Err(RunError::new(format!("{name}() is missing argument {}", index + 1))),
    }
}

pub(crate) fn int_arg(heap: &Heap, name: &str, args: &[Value], index: usize) -> RunResult<i64> {
    let n = number_arg(heap, name, args, index)?;
    if n.trunc() != n || !n.is_finite() {
        return Err(RunError::new(format!(
            "{name}() expects argument {} as an integer number",
            index + 1
        )));
    }
    Ok(n as i64)
}

pub(crate) fn string_id_arg(
    heap: &Heap,
    name: &str,
    args: &[Value],
    index: usize,
) -> RunResult<HeapId> {
    match args.get(index).copied() {
        Some(value) if heap.is_string(value) => {
            Ok(value.as_ref_id().expect("string value is a heap object"))
        }
        Some(other) => Err(type_mismatch(heap, name, index, "string", other)),
        None => Err(RunError::new(format!("{name}() is missing argument {}", index + 1))),
    }
}

pub(crate) fn string_arg(
    heap: &Heap,
    name: &str,
    args: &[Value],
    index: usize,
) -> RunResult<String> {
    let id = string_id_arg(heap, name, args, index)?;
    Ok(heap.str_contents(id).to_string())
}

pub(crate) fn list_arg(heap: &Heap, name: &str, args: &[Value], index: usize) -> RunResult<HeapId> {
    match args.get(index).copied() {
        Some(value) if heap.is_list(value) => {
            Ok(value.as_ref_id().expect("list value is a heap object"))
        }
        Some(other) => Err(type_mismatch(heap, name, index, "list", other)),
        None => Err(RunError::new(format!("{name}() is missing argument {}", index + 1))),
    }
}

pub(crate) fn dict_arg(heap: &Heap, name: &str, args: &[Value], index: usize) -> RunResult<HeapId> {
    match args.get(index).copied() {
        Some(value) if heap.is_dict(value) => {
            Ok(value.as_ref_id().expect("dict value is a heap object"))
        }
        Some(other) => Err(type_mismatch(heap, name, index, "dict", other)),
        None => Err(RunError::new(format!("{name}() is missing argument {}", index + 1))),
    }
}

pub(crate) fn bytes_arg(
    heap: &Heap,
    name: &str,
    args: &[Value],
    index: usize,
) -> RunResult<HeapId> {
    match args.get(index).copied() {
        Some(value) if heap.is_bytes(value) => {
            Ok(value.as_ref_id().expect("bytes value is a heap object"))
        }
        Some(other) => Err(type_mismatch(heap, name, index, "bytes", other)),
        None => Err(RunError::new(format!("{name}() is missing argument {}", index + 1))),
    }
}

/// The receiver's heap id; dispatch guarantees the type, so this is a
/// plain extraction.
pub(crate) fn receiver_id(receiver: Value) -> HeapId {
    receiver.as_ref_id().expect("builtin method receiver is a heap object")
}

/// Iterator-protocol helper for index-keyed sequences: `@iter(i)` yields
/// the index itself while in range, `empty` once exhausted.
pub(crate) fn sequence_iter_key(heap: &Heap, name: &str, args: &[Value], len: usize) -> RunResult<Value> {
    let index = int_arg(heap, name, args, 0)?;
    if index >= 0 && (index as usize) < len {
        Ok(Value::Number(index as f64))
    } else {
        Ok(Value::Empty)
    }
}

/// Compares two values for builtin `sort`: numbers before strings,
/// numbers numerically, strings lexicographically, everything else by
/// type name.
pub(crate) fn compare_values(heap: &Heap, a: Value, b: Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Value::Number(_), _) => Ordering::Less,
        (_, Value::Number(_)) => Ordering::Greater,
        _ => {
            if heap.is_string(a) && heap.is_string(b) {
                let x = heap.str_contents(a.as_ref_id().expect("string"));
                let y = heap.str_contents(b.as_ref_id().expect("string"));
                x.cmp(y)
            } else {
                heap.type_name(a).cmp(heap.type_name(b))
            }
        }
    }
}

