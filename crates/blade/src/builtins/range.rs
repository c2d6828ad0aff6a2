//! Range methods. `upper` is exclusive; iteration walks toward it from
//! `lower` in either direction.

use crate::exceptions::RunResult;
use crate::heap::ObjData;
use crate::value::Value;
use crate::vm::{NativeFn, Vm};

use super::support::{check_arity, int_arg, number_arg, receiver_id, sequence_iter_key};

pub(crate) fn find(name: &str) -> Option<(&'static str, NativeFn)> {
    let entry: (&'static str, NativeFn) = match name {
        "lower" => ("lower", lower),
        "upper" => ("upper", upper),
        "range" => ("range", span),
        "within" => ("within", within),
        "@iter" => ("@iter", iter_key),
        "@itern" => ("@itern", iter_value),
        _ => return None,
    };
    Some(entry)
}

fn range_of(vm: &Vm<'_>, receiver: Value) -> crate::heap::RangeObj {
    match vm.heap.get(receiver_id(receiver)) {
        ObjData::Range(r) => *r,
        _ => unreachable!("range method on non-range receiver"),
    }
}

/// The smaller bound, regardless of direction.
fn lower(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("lower", args, 0)?;
    let r = range_of(vm, receiver);
    Ok(Value::Number(r.lower.min(r.upper) as f64))
}

/// The larger bound, regardless of direction.
fn upper(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("upper", args, 0)?;
    let r = range_of(vm, receiver);
    Ok(Value::Number(r.lower.max(r.upper) as f64))
}

fn span(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("range", args, 0)?;
    Ok(Value::Number(range_of(vm, receiver).span as f64))
}

fn within(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("within", args, 1)?;
    let n = number_arg(&vm.heap, "within", args, 0)?;
    let r = range_of(vm, receiver);
    let (lo, hi) = (r.lower.min(r.upper) as f64, r.lower.max(r.upper) as f64);
    Ok(Value::Bool(n >= lo && n <= hi))
}

fn iter_key(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("@iter", args, 1)?;
    let len = range_of(vm, receiver).count() as usize;
    sequence_iter_key(&vm.heap, "@iter", args, len)
}

fn iter_value(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("@itern", args, 1)?;
    let index = int_arg(&vm.heap, "@itern", args, 0)?;
    let r = range_of(vm, receiver);
    if index >= 0 && index < r.count() {
        Ok(Value::Number(r.element(index) as f64))
    } else {
        Ok(Value::Nil)
    }
}
