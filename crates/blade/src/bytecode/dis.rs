//! Bytecode disassembler, behind the CLI's `-d` flag and the VM's
//! instruction tracing.

use std::fmt::Write as _;

use crate::heap::Heap;

use super::{Blob, Opcode, TRY_NO_ADDRESS, TRY_NO_CLASS};

/// Renders a whole blob, one instruction per line.
#[must_use]
pub fn disassemble_blob(heap: &Heap, blob: &Blob, name: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {name} ==");
    let mut offset = 0;
    while offset < blob.code.len() {
        offset = disassemble_instruction(heap, blob, offset, &mut out);
    }
    out
}

/// Renders the instruction at `offset`, returning the next offset.
pub fn disassemble_instruction(
    heap: &Heap,
    blob: &Blob,
    offset: usize,
    out: &mut String,
) -> usize {
    let _ = write!(out, "{offset:04} ");
    if offset > 0 && blob.line_at(offset) == blob.line_at(offset - 1) {
        let _ = write!(out, "   | ");
    } else {
        let _ = write!(out, "{:4} ", blob.line_at(offset));
    }

    let Some(op) = Opcode::from_repr(blob.code[offset]) else {
        let _ = writeln!(out, "?? {:#04x}", blob.code[offset]);
        return offset + 1;
    };

    let name = mnemonic(op);
    match op {
        Opcode::Constant
        | Opcode::DefineGlobal
        | Opcode::GetGlobal
        | Opcode::SetGlobal
        | Opcode::GetProperty
        | Opcode::SetProperty
        | Opcode::GetSelfProperty
        | Opcode::Class
        | Opcode::GetSuper
        | Opcode::CallImport
        | Opcode::ImportAll
        | Opcode::ImportAllNative
        | Opcode::EjectImport
        | Opcode::EjectNativeImport
        | Opcode::Switch => {
            let idx = blob.read_u16(offset + 1);
            let shown = constant_repr(heap, blob, idx);
            let _ = writeln!(out, "{name:<16} {idx:4} '{shown}'");
            offset + 3
        }
        Opcode::GetLocal
        | Opcode::SetLocal
        | Opcode::GetUpValue
        | Opcode::SetUpValue
        | Opcode::PopN
        | Opcode::List
        | Opcode::Dict => {
            let slot = blob.read_u16(offset + 1);
            let _ = writeln!(out, "{name:<16} {slot:4}");
            offset + 3
        }
        Opcode::Jump | Opcode::JumpIfFalse | Opcode::BreakPlaceholder => {
            let jump = blob.read_u16(offset + 1) as usize;
            let _ = writeln!(out, "{name:<16} {offset:4} -> {}", offset + 3 + jump);
            offset + 3
        }
        Opcode::Loop => {
            let jump = blob.read_u16(offset + 1) as usize;
            let _ = writeln!(out, "{name:<16} {offset:4} -> {}", offset + 3 - jump);
            offset + 3
        }
        Opcode::Call | Opcode::GetIndex => {
            let operand = blob.code[offset + 1];
            let _ = writeln!(out, "{name:<16} {operand:4}");
            offset + 2
        }
        Opcode::Invoke | Opcode::InvokeSelf | Opcode::SuperInvoke | Opcode::SuperInvokeSelf => {
            let idx = blob.read_u16(offset + 1);
            let argc = blob.code[offset + 3];
            let shown = constant_repr(heap, blob, idx);
            let _ = writeln!(out, "{name:<16} ({argc} args) {idx:4} '{shown}'");
            offset + 4
        }
        Opcode::Method | Opcode::ClassProperty => {
            let idx = blob.read_u16(offset + 1);
            let is_static = blob.code[offset + 3];
            let shown = constant_repr(heap, blob, idx);
            let marker = if is_static == 1 { " static" } else { "" };
            let _ = writeln!(out, "{name:<16} {idx:4} '{shown}'{marker}");
            offset + 4
        }
        Opcode::SelectImport | Opcode::SelectNativeImport | Opcode::NativeModule => {
            let module = blob.read_u16(offset + 1);
            let field = blob.read_u16(offset + 3);
            let _ = writeln!(
                out,
                "{name:<16} {:?} . {:?}",
                constant_repr(heap, blob, module),
                constant_repr(heap, blob, field)
            );
            offset + 5
        }
        Opcode::Try => {
            let class = blob.read_u16(offset + 1);
            let catch = blob.read_u16(offset + 3);
            let finally = blob.read_u16(offset + 5);
            let class_repr = if class == TRY_NO_CLASS {
                "-".to_string()
            } else {
                constant_repr(heap, blob, class)
            };
            let catch_repr = fmt_address(catch);
            let finally_repr = fmt_address(finally);
            let _ = writeln!(out, "{name:<16} {class_repr} catch {catch_repr} finally {finally_repr}");
            offset + 7
        }
        Opcode::Closure => {
            let idx = blob.read_u16(offset + 1);
            let shown = constant_repr(heap, blob, idx);
            let _ = writeln!(out, "{name:<16} {idx:4} {shown}");
            let mut cursor = offset + 3;
            let function_id = blob.constants[idx as usize]
                .as_ref_id()
                .expect("closure constant must be a function");
            for _ in 0..heap.function(function_id).up_value_count {
                let is_local = blob.code[cursor];
                let index = blob.read_u16(cursor + 1);
                let what = if is_local == 1 { "local" } else { "up-value" };
                let _ = writeln!(out, "{cursor:04}    |                {what} {index}");
                cursor += 3;
            }
            cursor
        }
        _ => {
            let _ = writeln!(out, "{name}");
            offset + 1
        }
    }
}

fn fmt_address(address: u16) -> String {
    if address == TRY_NO_ADDRESS { "-".to_string() } else { format!("{address}") }
}

fn constant_repr(heap: &Heap, blob: &Blob, idx: u16) -> String {
    blob.constants
        .get(idx as usize)
        .map_or_else(|| "<bad constant>".to_string(), |v| heap.value_to_repr(*v))
}

fn mnemonic(op: Opcode) -> &'static str {
    match op {
        Opcode::Constant => "load",
        Opcode::Nil => "nil",
        Opcode::True => "true",
        Opcode::False => "false",
        Opcode::Empty => "empty",
        Opcode::One => "one",
        Opcode::Add => "add",
        Opcode::Subtract => "sub",
        Opcode::Multiply => "mul",
        Opcode::Divide => "div",
        Opcode::FDivide => "fdiv",
        Opcode::Reminder => "rmod",
        Opcode::Pow => "pow",
        Opcode::Negate => "neg",
        Opcode::BitAnd => "band",
        Opcode::BitOr => "bor",
        Opcode::BitXor => "bxor",
        Opcode::LShift => "lshift",
        Opcode::RShift => "rshift",
        Opcode::BitNot => "bnot",
        Opcode::Equal => "eq",
        Opcode::Greater => "gt",
        Opcode::Less => "less",
        Opcode::Not => "not",
        Opcode::Pop => "pop",
        Opcode::PopN => "popn",
        Opcode::Dup => "dup",
        Opcode::CloseUpValue => "clupval",
        Opcode::Jump => "jump",
        Opcode::JumpIfFalse => "fjump",
        Opcode::Loop => "loop",
        Opcode::BreakPlaceholder => "brkpl",
        Opcode::DefineGlobal => "dglob",
        Opcode::GetGlobal => "gglob",
        Opcode::SetGlobal => "sglob",
        Opcode::GetLocal => "gloc",
        Opcode::SetLocal => "sloc",
        Opcode::GetUpValue => "gupval",
        Opcode::SetUpValue => "supval",
        Opcode::GetProperty => "gprop",
        Opcode::SetProperty => "sprop",
        Opcode::GetSelfProperty => "gsprop",
        Opcode::Call => "call",
        Opcode::Invoke => "invoke",
        Opcode::InvokeSelf => "sinvoke",
        Opcode::SuperInvoke => "pinvoke",
        Opcode::SuperInvokeSelf => "psinvoke",
        Opcode::Return => "ret",
        Opcode::Closure => "closure",
        Opcode::Class => "class",
        Opcode::Method => "method",
        Opcode::ClassProperty => "classprop",
        Opcode::Inherit => "inherit",
        Opcode::GetSuper => "gsuper",
        Opcode::List => "list",
        Opcode::Range => "range",
        Opcode::Dict => "dict",
        Opcode::GetIndex => "gindex",
        Opcode::GetRangedIndex => "grindex",
        Opcode::SetIndex => "sindex",
        Opcode::CallImport => "cimport",
        Opcode::NativeModule => "nimport",
        Opcode::SelectImport => "simport",
        Opcode::SelectNativeImport => "snimport",
        Opcode::ImportAll => "aimport",
        Opcode::ImportAllNative => "animport",
        Opcode::EjectImport => "eimport",
        Opcode::EjectNativeImport => "enimport",
        Opcode::Try => "try",
        Opcode::PopTry => "ptry",
        Opcode::PublishTry => "pubtry",
        Opcode::BeginCatch => "bcatch",
        Opcode::EndCatch => "ecatch",
        Opcode::Die => "die",
        Opcode::Echo => "echo",
        Opcode::Stringify => "str",
        Opcode::Assert => "assert",
        Opcode::Switch => "switch",
        Opcode::Choice => "choice",
    }
}

#[cfg(test)]
mod tests {
    use super::{disassemble_blob, Blob, Opcode};
    use crate::heap::Heap;
    use crate::value::Value;

    #[test]
    fn renders_offsets_lines_and_operands() {
        let heap = Heap::new();
        let mut blob = Blob::new();
        let idx = blob.add_constant(Value::Number(42.0));
        blob.write_op(Opcode::Constant, 1);
        blob.write_u16(idx as u16, 1);
        blob.write_op(Opcode::Echo, 1);
        blob.write_op(Opcode::Return, 2);

        let text = disassemble_blob(&heap, &blob, "<script>");
        assert!(text.contains("== <script> =="));
        assert!(text.contains("load"));
        assert!(text.contains("'42'"));
        assert!(text.contains("echo"));
    }
}
