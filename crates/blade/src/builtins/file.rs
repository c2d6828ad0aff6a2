//! File methods over `std::fs`. Closing is idempotent; the standard
//! streams carried by std-backed file objects are never closed here.

use std::fs::{self, OpenOptions};
use std::io::{Read as _, Write as _};
use std::path::Path;

use crate::exceptions::{run_err, RunError, RunResult};
use crate::heap::{FileHandle, FileObj, ObjData};
use crate::value::Value;
use crate::vm::{NativeFn, Vm};

use super::support::{check_arity, check_arity_range, int_arg, receiver_id, string_arg};

pub(crate) fn find(name: &str) -> Option<(&'static str, NativeFn)> {
    let entry: (&'static str, NativeFn) = match name {
        "exists" => ("exists", exists),
        "open" => ("open", open),
        "close" => ("close", close),
        "read" => ("read", read),
        "write" => ("write", write),
        "is_open" => ("is_open", is_open),
        "is_closed" => ("is_closed", is_closed),
        "flush" => ("flush", flush),
        "delete" => ("delete", delete),
        "rename" => ("rename", rename),
        "path" => ("path", path),
        "mode" => ("mode", mode),
        "name" => ("name", name_method),
        "copy" => ("copy", copy),
        _ => return None,
    };
    Some(entry)
}

fn with_file<'h>(vm: &'h Vm<'_>, receiver: Value) -> &'h FileObj {
    match vm.heap.get(receiver_id(receiver)) {
        ObjData::File(f) => f,
        _ => unreachable!("file method on non-file receiver"),
    }
}

fn with_file_mut<'h>(vm: &'h mut Vm<'_>, receiver: Value) -> &'h mut FileObj {
    match vm.heap.get_mut(receiver_id(receiver)) {
        ObjData::File(f) => f,
        _ => unreachable!("file method on non-file receiver"),
    }
}

fn open_handle(file: &FileObj) -> RunResult<fs::File> {
    let mut options = OpenOptions::new();
    match file.mode.as_str() {
        "r" => options.read(true),
        "w" => options.write(true).create(true).truncate(true),
        "a" => options.append(true).create(true),
        "r+" => options.read(true).write(true),
        "w+" => options.read(true).write(true).create(true).truncate(true),
        "a+" => options.read(true).append(true).create(true),
        other => return Err(RunError::new(format!("invalid file mode '{other}'"))),
    };
    options
        .open(&file.path)
        .map_err(|err| RunError::new(format!("could not open {}: {err}", file.path)))
}

/// Opens the handle if the file is not already open.
fn ensure_open(vm: &mut Vm<'_>, receiver: Value) -> RunResult<()> {
    let needs_open = {
        let file = with_file(vm, receiver);
        !file.is_open && !file.is_std()
    };
    if needs_open {
        let handle = open_handle(with_file(vm, receiver))?;
        let file = with_file_mut(vm, receiver);
        file.handle = FileHandle::Os(handle);
        file.is_open = true;
    }
    Ok(())
}

fn exists(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("exists", args, 0)?;
    Ok(Value::Bool(Path::new(&with_file(vm, receiver).path).exists()))
}

fn open(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("open", args, 0)?;
    ensure_open(vm, receiver)?;
    Ok(Value::Nil)
}

/// Idempotent; standard streams are left alone.
fn close(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("close", args, 0)?;
    let file = with_file_mut(vm, receiver);
    if !file.is_std() {
        file.handle = FileHandle::Closed;
        file.is_open = false;
    }
    Ok(Value::Nil)
}

/// Reads the whole file (or up to `n` bytes) as a string.
fn read(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity_range("read", args, 0, 1)?;
    let limit = if args.is_empty() { None } else { Some(int_arg(&vm.heap, "read", args, 0)?) };
    ensure_open(vm, receiver)?;

    let text = {
        let path = with_file(vm, receiver).path.clone();
        let file = with_file_mut(vm, receiver);
        match &mut file.handle {
            FileHandle::Os(handle) => {
                let mut buffer = String::new();
                match limit {
                    Some(n) => {
                        let mut taken = handle.take(n.max(0) as u64);
                        taken
                            .read_to_string(&mut buffer)
                            .map_err(|err| RunError::new(format!("could not read {path}: {err}")))?;
                    }
                    None => {
                        handle
                            .read_to_string(&mut buffer)
                            .map_err(|err| RunError::new(format!("could not read {path}: {err}")))?;
                    }
                }
                buffer
            }
            FileHandle::Stdin => {
                let mut buffer = String::new();
                std::io::stdin()
                    .read_line(&mut buffer)
                    .map_err(|err| RunError::new(format!("could not read stdin: {err}")))?;
                buffer
            }
            _ => run_err!("file {path} is not open for reading"),
        }
    };
    Ok(vm.intern_string(text))
}

/// Writes a string or bytes; returns the byte count written.
fn write(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("write", args, 1)?;
    let data: Vec<u8> = match args[0].as_ref_id() {
        Some(id) => match vm.heap.get(id) {
            ObjData::Str(s) => s.chars.as_bytes().to_vec(),
            ObjData::Bytes(b) => b.bytes.clone(),
            _ => run_err!("write() expects a string or bytes"),
        },
        None => run_err!("write() expects a string or bytes"),
    };
    ensure_open(vm, receiver)?;

    let path = with_file(vm, receiver).path.clone();
    let file = with_file_mut(vm, receiver);
    let written = match &mut file.handle {
        FileHandle::Os(handle) => handle
            .write(&data)
            .map_err(|err| RunError::new(format!("could not write {path}: {err}")))?,
        FileHandle::Stdout => {
            std::io::stdout()
                .write_all(&data)
                .map_err(|err| RunError::new(format!("could not write stdout: {err}")))?;
            data.len()
        }
        FileHandle::Stderr => {
            std::io::stderr()
                .write_all(&data)
                .map_err(|err| RunError::new(format!("could not write stderr: {err}")))?;
            data.len()
        }
        _ => run_err!("file {path} is not open for writing"),
    };
    Ok(Value::Number(written as f64))
}

fn is_open(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_open", args, 0)?;
    let file = with_file(vm, receiver);
    Ok(Value::Bool(file.is_std() || file.is_open))
}

fn is_closed(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("is_closed", args, 0)?;
    let file = with_file(vm, receiver);
    Ok(Value::Bool(!file.is_std() && !file.is_open))
}

fn flush(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("flush", args, 0)?;
    let file = with_file_mut(vm, receiver);
    if let FileHandle::Os(handle) = &mut file.handle {
        let _ = handle.flush();
    }
    Ok(Value::Nil)
}

fn delete(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("delete", args, 0)?;
    let path = with_file(vm, receiver).path.clone();
    match fs::remove_file(&path) {
        Ok(()) => Ok(Value::Bool(true)),
        Err(err) => run_err!("could not delete {path}: {err}"),
    }
}

fn rename(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("rename", args, 1)?;
    let new_path = string_arg(&vm.heap, "rename", args, 0)?;
    let path = with_file(vm, receiver).path.clone();
    match fs::rename(&path, &new_path) {
        Ok(()) => {
            with_file_mut(vm, receiver).path = new_path;
            Ok(Value::Bool(true))
        }
        Err(err) => run_err!("could not rename {path}: {err}"),
    }
}

fn path(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("path", args, 0)?;
    let path = with_file(vm, receiver).path.clone();
    Ok(vm.intern_string(path))
}

fn mode(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("mode", args, 0)?;
    let mode = with_file(vm, receiver).mode.clone();
    Ok(vm.intern_string(mode))
}

fn name_method(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("name", args, 0)?;
    let path = with_file(vm, receiver).path.clone();
    let base = Path::new(&path)
        .file_name()
        .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
    Ok(vm.intern_string(base))
}

fn copy(vm: &mut Vm<'_>, receiver: Value, args: &[Value]) -> RunResult<Value> {
    check_arity("copy", args, 1)?;
    let destination = string_arg(&vm.heap, "copy", args, 0)?;
    let path = with_file(vm, receiver).path.clone();
    match fs::copy(&path, &destination) {
        Ok(_) => Ok(Value::Bool(true)),
        Err(err) => run_err!("could not copy {path}: {err}"),
    }
}
