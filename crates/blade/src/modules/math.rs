//! The `math` native module: a `Math` class of static methods and
//! constants.

use std::f64::consts;

use crate::builtins::support::{check_arity, number_arg};
use crate::exceptions::RunResult;
use crate::value::Value;
use crate::vm::Vm;

use super::{ClassDef, FieldDef, FuncDef, ModuleDef};

pub fn module_def() -> ModuleDef {
    ModuleDef {
        name: "math",
        fields: Vec::new(),
        functions: Vec::new(),
        classes: vec![ClassDef {
            name: "Math",
            fields: vec![
                FieldDef { name: "Pi", is_static: true, value: |_| Value::Number(consts::PI) },
                FieldDef { name: "E", is_static: true, value: |_| Value::Number(consts::E) },
            ],
            functions: vec![
                FuncDef { name: "sin", is_static: true, function: math_sin },
                FuncDef { name: "cos", is_static: true, function: math_cos },
                FuncDef { name: "tan", is_static: true, function: math_tan },
                FuncDef { name: "sqrt", is_static: true, function: math_sqrt },
                FuncDef { name: "floor", is_static: true, function: math_floor },
                FuncDef { name: "ceil", is_static: true, function: math_ceil },
                FuncDef { name: "log", is_static: true, function: math_log },
                FuncDef { name: "exp", is_static: true, function: math_exp },
                FuncDef { name: "pow", is_static: true, function: math_pow },
                FuncDef { name: "abs", is_static: true, function: math_abs },
            ],
        }],
        preloader: None,
        unloader: None,
    }
}

fn math_sin(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("sin", args, 1)?;
    Ok(Value::Number(number_arg(&vm.heap, "sin", args, 0)?.sin()))
}

fn math_cos(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("cos", args, 1)?;
    Ok(Value::Number(number_arg(&vm.heap, "cos", args, 0)?.cos()))
}

fn math_tan(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("tan", args, 1)?;
    Ok(Value::Number(number_arg(&vm.heap, "tan", args, 0)?.tan()))
}

fn math_sqrt(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("sqrt", args, 1)?;
    Ok(Value::Number(number_arg(&vm.heap, "sqrt", args, 0)?.sqrt()))
}

fn math_floor(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("floor", args, 1)?;
    Ok(Value::Number(number_arg(&vm.heap, "floor", args, 0)?.floor()))
}

fn math_ceil(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("ceil", args, 1)?;
    Ok(Value::Number(number_arg(&vm.heap, "ceil", args, 0)?.ceil()))
}

fn math_log(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("log", args, 1)?;
    Ok(Value::Number(number_arg(&vm.heap, "log", args, 0)?.ln()))
}

fn math_exp(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("exp", args, 1)?;
    Ok(Value::Number(number_arg(&vm.heap, "exp", args, 0)?.exp()))
}

fn math_pow(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("pow", args, 2)?;
    let base = number_arg(&vm.heap, "pow", args, 0)?;
    let exponent = number_arg(&vm.heap, "pow", args, 1)?;
    Ok(Value::Number(base.powf(exponent)))
}

fn math_abs(vm: &mut Vm<'_>, _receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("abs", args, 1)?;
    Ok(Value::Number(number_arg(&vm.heap, "abs", args, 0)?.abs()))
}
