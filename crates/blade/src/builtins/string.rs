//! String methods. Indexing and lengths are codepoint-based; the
//! pattern-backed methods (`match`, `matches`, `replace`) compile their
//! pattern with the `regex` crate.

use regex::Regex;

use crate::exceptions::{run_err, RunError, RunResult};
use crate::heap::{BytesObj, ListObj, ObjData};
use crate::value::Value;
use crate::vm::{NativeFn, Vm};

use super::support::{
    check_arity, check_arity_range, int_arg, receiver_id, sequence_iter_key, string_arg,
};

pub(crate) fn find(name: &str) -> Option<(&'static str, NativeFn)> {
    let entry: (&'static str, NativeFn) = match name {
        "length" => ("length", length),
        "upper" => ("upper", upper),
        "lower" => ("lower", lower),
        "is_alpha" => ("is_alpha", is_alpha),
        "is_alnum" => ("is_alnum", is_alnum),
        "is_number" => ("is_number", is_number),
        "is_lower" => ("is_lower", is_lower),
        "is_upper" => ("is_upper", is_upper),
        "is_space" => ("is_space", is_space),
        "trim" => ("trim", trim),
        "ltrim" => ("ltrim", ltrim),
        "rtrim" => ("rtrim", rtrim),
        "join" => ("join", join),
        "split" => ("split", split),
        "index_of" => ("index_of", index_of),
        "starts_with" => ("starts_with", starts_with),
        "ends_with" => ("ends_with", ends_with),
        "count" => ("count", count),
        "to_number" => ("to_number", to_number),
        "to_list" => ("to_list", to_list),
        "to_bytes" => ("to_bytes", to_bytes),
        "lpad" => ("lpad", lpad),
        "rpad" => ("rpad", rpad),
        "match" => ("match", match_),
        "matches" => ("matches", matches_),
        "replace" => ("replace", replace),
        "@iter" => ("@iter", iter_key),
        "@itern" => ("@itern", iter_value),
        _ => return None,
    };
    Some(entry)
}

fn recv<'h>(vm: &'h Vm<'_>, receiver: Value) -> &'h str {
    vm.heap.str_contents(receiver_id(receiver))
}

fn compile_pattern(pattern: &str) -> RunResult<Regex> {
    Regex::new(pattern)
        .map_err(|err| RunError::new(format!("regular expression compilation failed: {err}")))
}

fn length(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("length", args, 0)?;
    Ok(Value::Number(vm.heap.str_value(receiver_id(receiver)).char_len as f64))
}

fn upper(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("upper", args, 0)?;
    let text = recv(vm, receiver).to_uppercase();
    Ok(vm.intern_string(text))
}

fn lower(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("lower", args, 0)?;
    let text = recv(vm, receiver).to_lowercase();
    Ok(vm.intern_string(text))
}

fn class_check(
    vm: &mut Vm<'_>,
    receiver: Value,
    args: &[Value],
    name: &str,
    pred: fn(char) -> bool,
) -> RunResult<Value> {
    check_arity(name, args, 0)?;
    let text = recv(vm, receiver);
    Ok(Value::Bool(!text.is_empty() && text.chars().all(pred)))
}

fn is_alpha(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    class_check(vm, receiver, args, "is_alpha", char::is_alphabetic)
}

fn is_alnum(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    class_check(vm, receiver, args, "is_alnum", char::is_alphanumeric)
}

fn is_number(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    class_check(vm, receiver, args, "is_number", |c| c.is_ascii_digit())
}

fn is_lower(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_lower", args, 0)?;
    let text = recv(vm, receiver);
    let has_cased = text.chars().any(char::is_alphabetic);
    Ok(Value::Bool(has_cased && !text.chars().any(char::is_uppercase)))
}

fn is_upper(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_upper", args, 0)?;
    let text = recv(vm, receiver);
    let has_cased = text.chars().any(char::is_alphabetic);
    Ok(Value::Bool(has_cased && !text.chars().any(char::is_lowercase)))
}

fn is_space(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    class_check(vm, receiver, args, "is_space", char::is_whitespace)
}

fn trim_char(vm: &Vm<'_>, name: &str, args: &[Value]) -> RunResult<Option<char>> {
    if args.is_empty() {
        return Ok(None);
    }
    let text = string_arg(&vm.heap, name, args, 0)?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(Some(ch)),
        _ => Err(RunError::new(format!("{name}() expects a single character"))),
    }
}

fn trim(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity_range("trim", args, 0, 1)?;
    let text = match trim_char(vm, "trim", args)? {
        Some(ch) => recv(vm, receiver).trim_matches(ch).to_string(),
        None => recv(vm, receiver).trim().to_string(),
    };
    Ok(vm.intern_string(text))
}

fn ltrim(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity_range("ltrim", args, 0, 1)?;
    let text = match trim_char(vm, "ltrim", args)? {
        Some(ch) => recv(vm, receiver).trim_start_matches(ch).to_string(),
        None => recv(vm, receiver).trim_start().to_string(),
    };
    Ok(vm.intern_string(text))
}

fn rtrim(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity_range("rtrim", args, 0, 1)?;
    let text = match trim_char(vm, "rtrim", args)? {
        Some(ch) => recv(vm, receiver).trim_end_matches(ch).to_string(),
        None => recv(vm, receiver).trim_end().to_string(),
    };
    Ok(vm.intern_string(text))
}

/// `sep.join(list)`: stringifies each item and joins with the receiver.
fn join(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("join", args, 1)?;
    let Some(id) = args[0].as_ref_id() else {
        run_err!("join() expects argument 1 as list");
    };
    let items = match vm.heap.get(id) {
        ObjData::List(l) => l.items.clone(),
        _ => run_err!("join() expects argument 1 as list"),
    };
    let separator = recv(vm, receiver).to_string();
    let parts: Vec<String> = items.iter().map(|&v| vm.heap.value_to_string(v)).collect();
    Ok(vm.intern_string(parts.join(&separator)))
}

fn split(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("split", args, 1)?;
    let separator = string_arg(&vm.heap, "split", args, 0)?;
    let text = recv(vm, receiver).to_string();

    let parts: Vec<String> = if separator.is_empty() {
        text.chars().map(|c| c.to_string()).collect()
    } else {
        text.split(&separator).map(ToString::to_string).collect()
    };
    let mut items = Vec::with_capacity(parts.len());
    for part in parts {
        items.push(vm.intern_string(part));
    }
    Ok(vm.alloc_value(ObjData::List(ListObj { items })))
}

fn index_of(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("index_of", args, 1)?;
    let needle = string_arg(&vm.heap, "index_of", args, 0)?;
    let text = recv(vm, receiver);
    match text.find(&needle) {
        Some(byte_at) => {
            let char_at = text[..byte_at].chars().count();
            Ok(Value::Number(char_at as f64))
        }
        None => Ok(Value::Number(-1.0)),
    }
}

fn starts_with(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("starts_with", args, 1)?;
    let prefix = string_arg(&vm.heap, "starts_with", args, 0)?;
    Ok(Value::Bool(recv(vm, receiver).starts_with(&prefix)))
}

fn ends_with(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("ends_with", args, 1)?;
    let suffix = string_arg(&vm.heap, "ends_with", args, 0)?;
    Ok(Value::Bool(recv(vm, receiver).ends_with(&suffix)))
}

fn count(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("count", args, 1)?;
    let needle = string_arg(&vm.heap, "count", args, 0)?;
    if needle.is_empty() {
        return Ok(Value::Number(0.0));
    }
    Ok(Value::Number(recv(vm, receiver).matches(&needle).count() as f64))
}

fn to_number(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_number", args, 0)?;
    let text = recv(vm, receiver).trim();
    match text.parse::<f64>() {
        Ok(n) => Ok(Value::Number(n)),
        Err(_) => run_err!("'{text}' is not a valid number"),
    }
}

fn to_list(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_list", args, 0)?;
    let chars: Vec<String> = recv(vm, receiver).chars().map(|c| c.to_string()).collect();
    let mut items = Vec::with_capacity(chars.len());
    for ch in chars {
        items.push(vm.intern_string(ch));
    }
    Ok(vm.alloc_value(ObjData::List(ListObj { items })))
}

fn to_bytes(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("to_bytes", args, 0)?;
    let bytes = recv(vm, receiver).as_bytes().to_vec();
    Ok(vm.alloc_value(ObjData::Bytes(BytesObj { bytes })))
}

fn pad(vm: &mut Vm<'_>, receiver: Value, args: &[Value], name: &str, left: bool) -> RunResult<Value> {
    check_arity_range(name, args, 1, 2)?;
    let width = int_arg(&vm.heap, name, args, 0)?.max(0) as usize;
    let fill = if args.len() == 2 {
        let text = string_arg(&vm.heap, name, args, 1)?;
        text.chars().next().unwrap_or(' ')
    } else {
        ' '
    };
    let text = recv(vm, receiver).to_string();
    let current = text.chars().count();
    if current >= width {
        return Ok(receiver);
    }
    let padding: String = std::iter::repeat(fill).take(width - current).collect();
    let padded = if left { format!("{padding}{text}") } else { format!("{text}{padding}") };
    Ok(vm.intern_string(padded))
}

fn lpad(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    pad(vm, receiver, args, "lpad", true)
}

fn rpad(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    pad(vm, receiver, args, "rpad", false)
}

/// `s.match(pattern)`: the first match, or `false` when none.
fn match_(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("match", args, 1)?;
    let pattern = string_arg(&vm.heap, "match", args, 0)?;
    let re = compile_pattern(&pattern)?;
    match re.find(recv(vm, receiver)) {
        Some(found) => {
            let text = found.as_str().to_string();
            Ok(vm.intern_string(text))
        }
        None => Ok(Value::Bool(false)),
    }
}

/// `s.matches(pattern)`: every match as a list; empty list when none.
fn matches_(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("matches", args, 1)?;
    let pattern = string_arg(&vm.heap, "matches", args, 0)?;
    let re = compile_pattern(&pattern)?;
    let found: Vec<String> =
        re.find_iter(recv(vm, receiver)).map(|m| m.as_str().to_string()).collect();
    let mut items = Vec::with_capacity(found.len());
    for text in found {
        items.push(vm.intern_string(text));
    }
    Ok(vm.alloc_value(ObjData::List(ListObj { items })))
}

/// `s.replace(pattern, replacement)`: replaces every match; `$1`-style
/// group references work in the replacement.
fn replace(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("replace", args, 2)?;
    let pattern = string_arg(&vm.heap, "replace", args, 0)?;
    let replacement = string_arg(&vm.heap, "replace", args, 1)?;
    let re = compile_pattern(&pattern)?;
    let replaced = re.replace_all(recv(vm, receiver), replacement.as_str()).into_owned();
    Ok(vm.intern_string(replaced))
}

fn iter_key(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("@iter", args, 1)?;
    let len = vm.heap.str_value(receiver_id(receiver)).char_len;
    sequence_iter_key(&vm.heap, "@iter", args, len)
}

fn iter_value(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("@itern", args, 1)?;
    let index = int_arg(&vm.heap, "@itern", args, 0)?;
    if index < 0 {
        return Ok(Value::Nil);
    }
    let ch: Option<String> = recv(vm, receiver).chars().nth(index as usize).map(|c| c.to_string());
    match ch {
        Some(ch) => Ok(vm.intern_string(ch)),
        None => Ok(Value::Nil),
    }
}
