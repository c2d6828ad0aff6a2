//! The single-pass compiler.
//!
//! Statements are parsed by recursive descent and expressions by Pratt
//! precedence climbing; bytecode is emitted directly into the current
//! function's [`Blob`] — no AST is materialized. Nested function
//! compilation uses an explicit stack of [`CompilerState`] records rather
//! than recursion through linked compiler structs.
//!
//! Imports are resolved and compiled here, at compile time: a source
//! module becomes a function constant executed by `CallImport`; a native
//! module becomes a `NativeModule` instruction naming the registered
//! module.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::bytecode::{Blob, Opcode, TRY_NO_ADDRESS, TRY_NO_CLASS};
use crate::heap::{
    FunctionKind, FunctionObj, Heap, HeapId, ModuleObj, ObjData, SwitchObj, Table,
};
use crate::modules;
use crate::scanner::Scanner;
use crate::token::{Token, TokenKind};
use crate::value::Value;

/// Maximum parameters to a function, and maximum call arguments.
const MAX_FUNCTION_PARAMETERS: usize = 255;
/// Maximum locals per function.
const MAX_LOCALS: usize = 256;
/// Maximum captured variables per function.
const MAX_UP_VALUES: usize = 256;

/// A compile-time diagnostic with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub message: String,
    pub line: u32,
    pub file: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SyntaxError:\n    File: {}, Line: {}\n    Error: {}", self.file, self.line, self.message)
    }
}

impl std::error::Error for CompileError {}

/// Where and how a compilation unit resolves imports.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Path shown in diagnostics and used as the module file.
    pub file_path: String,
    /// Directory imports are resolved against first.
    pub directory: PathBuf,
    /// Standard-library root tried after the local directory.
    pub std_root: Option<PathBuf>,
}

impl CompileOptions {
    #[must_use]
    pub fn for_file(path: &Path) -> Self {
        Self {
            file_path: path.display().to_string(),
            directory: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            std_root: modules::default_std_root(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Conditional,
    Or,
    And,
    Equality,
    Comparison,
    BitOr,
    BitXor,
    BitAnd,
    Shift,
    Range,
    Term,
    Factor,
    Unary,
    Call,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Self::None => Self::Assignment,
            Self::Assignment => Self::Conditional,
            Self::Conditional => Self::Or,
            Self::Or => Self::And,
            Self::And => Self::Equality,
            Self::Equality => Self::Comparison,
            Self::Comparison => Self::BitOr,
            Self::BitOr => Self::BitXor,
            Self::BitXor => Self::BitAnd,
            Self::BitAnd => Self::Shift,
            Self::Shift => Self::Range,
            Self::Range => Self::Term,
            Self::Term => Self::Factor,
            Self::Factor => Self::Unary,
            Self::Unary | Self::Call => Self::Call,
        }
    }
}

type ParseFn = fn(&mut Parser<'_, '_>, bool);

struct ParseRule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

const fn rule(
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
) -> ParseRule {
    ParseRule { prefix, infix, precedence }
}

#[derive(Debug, Clone)]
struct Local {
    name: String,
    depth: i32,
    is_captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpValueDesc {
    index: u16,
    is_local: bool,
}

/// Per-function compiler record; lives on an explicit stack while nested
/// functions compile.
struct CompilerState {
    blob: Blob,
    kind: FunctionKind,
    name: Option<HeapId>,
    arity: usize,
    is_variadic: bool,
    locals: Vec<Local>,
    up_values: Vec<UpValueDesc>,
    scope_depth: i32,
}

impl CompilerState {
    fn new(kind: FunctionKind, name: Option<HeapId>) -> Self {
        // slot zero aliases `self` inside methods, the callee elsewhere
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer | FunctionKind::Private => "self",
            _ => "",
        };
        Self {
            blob: Blob::new(),
            kind,
            name,
            arity: 0,
            is_variadic: false,
            locals: vec![Local { name: slot_zero.to_string(), depth: 0, is_captured: false }],
            up_values: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassCompiler {
    name: String,
    has_superclass: bool,
}

/// What an assignable expression resolved to; drives GET/SET emission.
#[derive(Clone, Copy)]
enum AssignTarget {
    Slot { get: Opcode, set: Opcode, arg: u16 },
    Property { name: u16, self_prop: bool },
    Index,
}

pub struct Parser<'src, 'ctx> {
    scanner: Scanner<'src>,
    source: &'src str,
    heap: &'ctx mut Heap,
    module: HeapId,
    options: &'ctx CompileOptions,
    /// Canonical paths of files currently being compiled; guards import cycles.
    chain: &'ctx mut Vec<String>,

    previous: Token,
    current: Token,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,

    compilers: Vec<CompilerState>,
    classes: Vec<ClassCompiler>,

    in_block: bool,
    is_returning: bool,
    loop_start: Option<usize>,
    loop_scope_depth: i32,
}

/// Compiles `source` as the top-level code of `module`, returning the
/// script function. All compile errors are collected and returned together.
pub fn compile_module(
    heap: &mut Heap,
    source: &str,
    module: HeapId,
    options: &CompileOptions,
    chain: &mut Vec<String>,
) -> Result<HeapId, Vec<CompileError>> {
    let mut parser = Parser {
        scanner: Scanner::new(source),
        source,
        heap,
        module,
        options,
        chain,
        previous: Token::synthetic(TokenKind::Eof),
        current: Token::synthetic(TokenKind::Eof),
        had_error: false,
        panic_mode: false,
        errors: Vec::new(),
        compilers: vec![CompilerState::new(FunctionKind::Script, None)],
        classes: Vec::new(),
        in_block: false,
        is_returning: false,
        loop_start: None,
        loop_scope_depth: 0,
    };

    parser.advance();
    while !parser.matches(TokenKind::Eof) {
        parser.declaration();
    }

    let function = parser.end_compiler();
    if parser.had_error {
        Err(parser.errors)
    } else {
        Ok(function)
    }
}

impl<'src, 'ctx> Parser<'src, 'ctx> {
    // --- error reporting ----------------------------------------------------

    fn error_at(&mut self, token: Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;

        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            TokenKind::Newline => " at newline".to_string(),
            _ => format!(" at '{}'", token.lexeme(self.source)),
        };
        self.errors.push(CompileError {
            message: format!("{message}{location}"),
            line: token.line,
            file: self.options.file_path.clone(),
        });
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    // --- token plumbing -----------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.scanner.take_error();
            self.error_at_current(&message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(message);
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume_statement_end(&mut self) {
        // the last statement in a block may omit its terminator
        if self.in_block && self.check(TokenKind::RBrace) {
            return;
        }
        if self.matches(TokenKind::Semicolon) {
            while self.matches(TokenKind::Semicolon) || self.matches(TokenKind::Newline) {}
            return;
        }
        if self.matches(TokenKind::Eof) {
            return;
        }
        self.consume(TokenKind::Newline, "end of statement expected");
        while self.matches(TokenKind::Semicolon) || self.matches(TokenKind::Newline) {}
    }

    fn ignore_whitespace(&mut self) {
        while self.matches(TokenKind::Newline) {}
    }

    fn lexeme(&self, token: Token) -> &'src str {
        token.lexeme(self.source)
    }

    // --- emission -----------------------------------------------------------

    fn state(&mut self) -> &mut CompilerState {
        self.compilers.last_mut().expect("compiler stack is never empty")
    }

    fn state_ref(&self) -> &CompilerState {
        self.compilers.last().expect("compiler stack is never empty")
    }

    fn blob_len(&self) -> usize {
        self.state_ref().blob.code.len()
    }

    fn emit_op(&mut self, op: Opcode) {
        let line = self.previous.line;
        self.state().blob.write_op(op, line);
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.state().blob.write(byte, line);
    }

    fn emit_u16(&mut self, operand: u16) {
        let line = self.previous.line;
        self.state().blob.write_u16(operand, line);
    }

    fn emit_op_u16(&mut self, op: Opcode, operand: u16) {
        self.emit_op(op);
        self.emit_u16(operand);
    }

    fn emit_return(&mut self) {
        if self.state_ref().kind == FunctionKind::Initializer {
            self.emit_op_u16(Opcode::GetLocal, 0);
        } else {
            self.emit_op(Opcode::Nil);
        }
        self.emit_op(Opcode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u16 {
        let index = self.state().blob.add_constant(value);
        if index >= usize::from(u16::MAX) {
            self.error("too many constants in current scope");
            return 0;
        }
        index as u16
    }

    fn emit_constant(&mut self, value: Value) {
        let index = self.make_constant(value);
        self.emit_op_u16(Opcode::Constant, index);
    }

    fn string_constant(&mut self, text: &str) -> u16 {
        let id = self.heap.intern(text);
        self.make_constant(Value::Ref(id))
    }

    fn identifier_constant(&mut self, token: Token) -> u16 {
        let name = self.lexeme(token).to_string();
        self.string_constant(&name)
    }

    /// Emits a jump with a placeholder offset; returns the operand position.
    fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit_op(op);
        self.emit_u16(0xffff);
        self.blob_len() - 2
    }

    fn patch_jump(&mut self, operand_at: usize) {
        // -2 adjusts for the operand itself
        let jump = self.blob_len() - operand_at - 2;
        if jump > usize::from(u16::MAX) {
            self.error("body of conditional block too large");
            return;
        }
        self.state().blob.patch_u16(operand_at, jump as u16);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(Opcode::Loop);
        let offset = self.blob_len() - loop_start + 2;
        if offset > usize::from(u16::MAX) {
            self.error("loop body too large");
        }
        self.emit_u16(offset as u16);
    }

    // --- scopes and variables ----------------------------------------------

    fn begin_scope(&mut self) {
        self.state().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.state().scope_depth -= 1;
        let depth = self.state_ref().scope_depth;
        loop {
            let top = self.state_ref().locals.last().map(|l| (l.depth, l.is_captured));
            match top {
                Some((local_depth, captured)) if local_depth > depth => {
                    if captured {
                        self.emit_op(Opcode::CloseUpValue);
                    } else {
                        self.emit_op(Opcode::Pop);
                    }
                    self.state().locals.pop();
                }
                _ => break,
            }
        }
    }

    /// Emits pops for locals above `depth` without forgetting them;
    /// used by `break` and `continue`.
    fn discard_locals(&mut self, depth: i32) {
        let ops: Vec<Opcode> = self
            .state_ref()
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth > depth)
            .map(|l| if l.is_captured { Opcode::CloseUpValue } else { Opcode::Pop })
            .collect();
        for op in ops {
            self.emit_op(op);
        }
    }

    fn add_local(&mut self, name: &str) -> usize {
        if self.state_ref().locals.len() >= MAX_LOCALS {
            self.error("too many local variables in scope");
            return 0;
        }
        self.state().locals.push(Local { name: name.to_string(), depth: -1, is_captured: false });
        self.state_ref().locals.len() - 1
    }

    fn declare_variable(&mut self) {
        if self.state_ref().scope_depth == 0 {
            return; // globals are implicitly declared
        }
        let name = self.lexeme(self.previous).to_string();
        let depth = self.state_ref().scope_depth;
        let duplicate = self
            .state_ref()
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth == -1 || l.depth >= depth)
            .any(|l| l.name == name);
        if duplicate {
            self.error(&format!("{name} already declared in current scope"));
        }
        self.add_local(&name);
    }

    fn parse_variable(&mut self, message: &str) -> u16 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.state_ref().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous)
    }

    fn mark_initialized(&mut self) {
        if self.state_ref().scope_depth == 0 {
            return;
        }
        let depth = self.state_ref().scope_depth;
        if let Some(local) = self.state().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u16) {
        if self.state_ref().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_u16(Opcode::DefineGlobal, global);
    }

    fn resolve_local(&mut self, compiler: usize, name: &str) -> Option<u16> {
        let found = self.compilers[compiler]
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.name == name)
            .map(|(i, l)| (i, l.depth));
        if let Some((index, depth)) = found {
            if depth == -1 {
                self.error("cannot read local variable in its own initializer");
            }
            return Some(index as u16);
        }
        None
    }

    fn add_up_value(&mut self, compiler: usize, index: u16, is_local: bool) -> u16 {
        let desc = UpValueDesc { index, is_local };
        if let Some(existing) =
            self.compilers[compiler].up_values.iter().position(|u| *u == desc)
        {
            return existing as u16;
        }
        if self.compilers[compiler].up_values.len() >= MAX_UP_VALUES {
            self.error("too many closure variables in function");
            return 0;
        }
        self.compilers[compiler].up_values.push(desc);
        (self.compilers[compiler].up_values.len() - 1) as u16
    }

    fn resolve_up_value(&mut self, compiler: usize, name: &str) -> Option<u16> {
        if compiler == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(compiler - 1, name) {
            self.compilers[compiler - 1].locals[local as usize].is_captured = true;
            return Some(self.add_up_value(compiler, local, true));
        }
        if let Some(up) = self.resolve_up_value(compiler - 1, name) {
            return Some(self.add_up_value(compiler, up, false));
        }
        None
    }

    // --- function assembly --------------------------------------------------

    fn end_compiler(&mut self) -> HeapId {
        self.emit_return();
        let state = self.compilers.pop().expect("compiler stack is never empty");
        let function = FunctionObj {
            arity: state.arity,
            is_variadic: state.is_variadic,
            up_value_count: state.up_values.len(),
            blob: state.blob,
            name: state.name,
            module: self.module,
            kind: state.kind,
        };
        let id = self.heap.allocate(ObjData::Function(function));
        if !self.compilers.is_empty() {
            // reference the finished function from the enclosing one
            let constant = self.make_constant(Value::Ref(id));
            if state.up_values.is_empty() {
                self.emit_op_u16(Opcode::Constant, constant);
            } else {
                self.emit_op_u16(Opcode::Closure, constant);
                for desc in &state.up_values {
                    self.emit_byte(u8::from(desc.is_local));
                    self.emit_u16(desc.index);
                }
            }
        }
        id
    }

    fn function_body(&mut self, kind: FunctionKind, name: HeapId) {
        self.compilers.push(CompilerState::new(kind, Some(name)));
        self.begin_scope();

        self.consume(TokenKind::LParen, "expected '(' after function name");
        if !self.check(TokenKind::RParen) {
            loop {
                self.state().arity += 1;
                if self.state_ref().arity > MAX_FUNCTION_PARAMETERS {
                    self.error_at_current("too many function parameters");
                }
                if self.matches(TokenKind::TriDot) {
                    self.state().is_variadic = true;
                    self.add_local("__args__");
                    self.mark_initialized();
                    break;
                }
                let constant = self.parse_variable("expected parameter name");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "expected ')' after function parameters");

        self.consume(TokenKind::LBrace, "expected '{' before function body");
        self.block();
        self.end_compiler();
    }

    // --- expressions --------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.ignore_whitespace();
        self.advance();

        let Some(prefix) = get_rule(self.previous.kind).prefix else {
            self.error("expected expression");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            let infix = get_rule(self.previous.kind).infix.expect("infix rule with precedence");
            infix(self, can_assign);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("invalid assignment target");
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RParen) {
            loop {
                self.ignore_whitespace();
                self.expression();
                count += 1;
                if count > MAX_FUNCTION_PARAMETERS {
                    self.error("too many arguments to a function call");
                }
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.ignore_whitespace();
        self.consume(TokenKind::RParen, "expected ')' after argument list");
        count as u8
    }

    /// Shared GET/OP/SET emission for every assignable target shape.
    fn assignment(&mut self, target: AssignTarget, can_assign: bool) {
        let compound = [
            (TokenKind::PlusEq, Opcode::Add),
            (TokenKind::MinusEq, Opcode::Subtract),
            (TokenKind::MultiplyEq, Opcode::Multiply),
            (TokenKind::DivideEq, Opcode::Divide),
            (TokenKind::PowEq, Opcode::Pow),
            (TokenKind::PercentEq, Opcode::Reminder),
            (TokenKind::FloorEq, Opcode::FDivide),
            (TokenKind::AmpEq, Opcode::BitAnd),
            (TokenKind::BarEq, Opcode::BitOr),
            (TokenKind::XorEq, Opcode::BitXor),
            (TokenKind::TildeEq, Opcode::BitNot),
            (TokenKind::LShiftEq, Opcode::LShift),
            (TokenKind::RShiftEq, Opcode::RShift),
        ];

        if can_assign && self.matches(TokenKind::Equal) {
            self.ignore_whitespace();
            self.expression();
            self.emit_set(target);
            return;
        }
        if can_assign {
            for (kind, op) in compound {
                if self.matches(kind) {
                    self.emit_get_for_set(target);
                    self.ignore_whitespace();
                    self.expression();
                    self.emit_op(op);
                    self.emit_set(target);
                    return;
                }
            }
            if self.matches(TokenKind::Increment) {
                self.emit_get_for_set(target);
                self.emit_op(Opcode::One);
                self.emit_op(Opcode::Add);
                self.emit_set(target);
                return;
            }
            if self.matches(TokenKind::Decrement) {
                self.emit_get_for_set(target);
                self.emit_op(Opcode::One);
                self.emit_op(Opcode::Subtract);
                self.emit_set(target);
                return;
            }
        }
        self.emit_get(target);
    }

    fn emit_get(&mut self, target: AssignTarget) {
        match target {
            AssignTarget::Slot { get, arg, .. } => self.emit_op_u16(get, arg),
            AssignTarget::Property { name, self_prop } => {
                let op = if self_prop { Opcode::GetSelfProperty } else { Opcode::GetProperty };
                self.emit_op_u16(op, name);
            }
            AssignTarget::Index => {
                self.emit_op(Opcode::GetIndex);
                self.emit_byte(0);
            }
        }
    }

    /// GET that preserves what SET will need on the stack.
    fn emit_get_for_set(&mut self, target: AssignTarget) {
        match target {
            AssignTarget::Slot { get, arg, .. } => self.emit_op_u16(get, arg),
            AssignTarget::Property { name, self_prop } => {
                self.emit_op(Opcode::Dup);
                let op = if self_prop { Opcode::GetSelfProperty } else { Opcode::GetProperty };
                self.emit_op_u16(op, name);
            }
            AssignTarget::Index => {
                self.emit_op(Opcode::GetIndex);
                self.emit_byte(1);
            }
        }
    }

    fn emit_set(&mut self, target: AssignTarget) {
        match target {
            AssignTarget::Slot { set, arg, .. } => self.emit_op_u16(set, arg),
            AssignTarget::Property { name, .. } => self.emit_op_u16(Opcode::SetProperty, name),
            AssignTarget::Index => self.emit_op(Opcode::SetIndex),
        }
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let compiler = self.compilers.len() - 1;
        let target = if let Some(slot) = self.resolve_local(compiler, name) {
            AssignTarget::Slot { get: Opcode::GetLocal, set: Opcode::SetLocal, arg: slot }
        } else if let Some(up) = self.resolve_up_value(compiler, name) {
            AssignTarget::Slot { get: Opcode::GetUpValue, set: Opcode::SetUpValue, arg: up }
        } else {
            let arg = self.string_constant(name);
            AssignTarget::Slot { get: Opcode::GetGlobal, set: Opcode::SetGlobal, arg }
        };
        self.assignment(target, can_assign);
    }

    // --- string literals ----------------------------------------------------

    /// Decodes a string-ish token's content: the span always carries one
    /// delimiter byte at each end, which is stripped before unescaping.
    fn decode_string(&mut self, token: Token) -> String {
        let raw = self.lexeme(token);
        let inner = &raw[1..raw.len().saturating_sub(1)];
        let mut out = String::with_capacity(inner.len());
        let bytes = inner.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let c = bytes[i];
            if c != b'\\' || i + 1 >= bytes.len() {
                // plain byte; copy the whole UTF-8 sequence untouched
                let ch_len = utf8_len(c);
                out.push_str(&inner[i..i + ch_len]);
                i += ch_len;
                continue;
            }
            let escape = bytes[i + 1];
            i += 2;
            match escape {
                b'0' => out.push('\0'),
                b'\'' => out.push('\''),
                b'"' => out.push('"'),
                b'a' => out.push('\x07'),
                b'b' => out.push('\x08'),
                b'f' => out.push('\x0c'),
                b'n' => out.push('\n'),
                b'r' => out.push('\r'),
                b't' => out.push('\t'),
                b'v' => out.push('\x0b'),
                b'\\' => out.push('\\'),
                b'$' => out.push('$'),
                b'x' => i += self.push_hex_escape(inner, i, 2, &mut out),
                b'u' => i += self.push_hex_escape(inner, i, 4, &mut out),
                b'U' => i += self.push_hex_escape(inner, i, 8, &mut out),
                other => {
                    // unknown escapes pass through verbatim
                    out.push('\\');
                    out.push(other as char);
                }
            }
        }
        out
    }

    fn push_hex_escape(&mut self, inner: &str, at: usize, count: usize, out: &mut String) -> usize {
        let digits = inner.get(at..at + count).unwrap_or("");
        match u32::from_str_radix(digits, 16).ok().and_then(char::from_u32) {
            Some(ch) if digits.len() == count => {
                out.push(ch);
                count
            }
            _ => {
                self.error("invalid escape sequence");
                0
            }
        }
    }

    // --- statements ---------------------------------------------------------

    fn declaration(&mut self) {
        self.ignore_whitespace();

        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Def) {
            self.function_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration(false);
        } else {
            self.statement();
        }

        self.ignore_whitespace();
        if self.panic_mode {
            self.synchronize();
        }
        self.ignore_whitespace();
    }

    fn statement(&mut self) {
        self.ignore_whitespace();

        if self.matches(TokenKind::Echo) {
            self.echo_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::Iter) {
            self.iter_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::Using) {
            self.using_statement();
        } else if self.matches(TokenKind::Try) {
            self.try_statement();
        } else if self.matches(TokenKind::Die) {
            self.die_statement();
        } else if self.matches(TokenKind::Assert) {
            self.assert_statement();
        } else if self.matches(TokenKind::Import) {
            self.import_statement();
        } else if self.matches(TokenKind::Continue) {
            self.continue_statement();
        } else if self.matches(TokenKind::Break) {
            self.break_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::LBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement(false);
        }

        self.ignore_whitespace();
    }

    fn block(&mut self) {
        let was_in_block = self.in_block;
        self.in_block = true;
        self.ignore_whitespace();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.in_block = was_in_block;
        self.consume(TokenKind::RBrace, "expected '}' after block");
    }

    fn var_declaration(&mut self, is_initializer: bool) {
        loop {
            let global = self.parse_variable("variable name expected");
            if self.matches(TokenKind::Equal) {
                self.expression();
            } else {
                self.emit_op(Opcode::Nil);
            }
            self.define_variable(global);
            if !self.matches(TokenKind::Comma) {
                break;
            }
        }
        if is_initializer {
            self.consume(TokenKind::Semicolon, "expected ';' after initializer");
            self.ignore_whitespace();
        } else {
            self.consume_statement_end();
        }
    }

    fn expression_statement(&mut self, is_initializer: bool) {
        self.expression();
        if is_initializer {
            self.consume(TokenKind::Semicolon, "expected ';' after initializer");
            self.ignore_whitespace();
        } else {
            self.consume_statement_end();
        }
        self.emit_op(Opcode::Pop);
    }

    fn echo_statement(&mut self) {
        self.expression();
        self.consume_statement_end();
        self.emit_op(Opcode::Echo);
    }

    fn if_statement(&mut self) {
        self.expression();

        let then_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);
        self.statement();

        let else_jump = self.emit_jump(Opcode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(Opcode::Pop);

        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let surrounding_start = self.loop_start;
        let surrounding_depth = self.loop_scope_depth;
        self.loop_start = Some(self.blob_len());
        self.loop_scope_depth = self.state_ref().scope_depth;

        self.expression();
        let exit_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);

        self.statement();
        self.emit_loop(self.loop_start.expect("loop start was just set"));

        self.patch_jump(exit_jump);
        self.emit_op(Opcode::Pop);
        self.end_loop();

        self.loop_start = surrounding_start;
        self.loop_scope_depth = surrounding_depth;
    }

    /// `iter init; cond; step { body }` — a C-style loop. The step section
    /// is emitted before the body and entered by a backward jump, so
    /// `continue` lands on the step.
    fn iter_statement(&mut self) {
        self.begin_scope();

        if self.matches(TokenKind::Semicolon) {
            // no initializer
            self.ignore_whitespace();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration(true);
        } else {
            self.expression_statement(true);
        }

        let surrounding_start = self.loop_start;
        let surrounding_depth = self.loop_scope_depth;
        let mut loop_start = self.blob_len();
        self.loop_scope_depth = self.state_ref().scope_depth;

        let mut exit_jump = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "expected ';' after condition");
            self.ignore_whitespace();
            exit_jump = Some(self.emit_jump(Opcode::JumpIfFalse));
            self.emit_op(Opcode::Pop);
        }

        if !self.check(TokenKind::LBrace) {
            let body_jump = self.emit_jump(Opcode::Jump);
            let step_start = self.blob_len();
            self.expression();
            self.ignore_whitespace();
            self.emit_op(Opcode::Pop);
            self.emit_loop(loop_start);
            loop_start = step_start;
            self.patch_jump(body_jump);
        }
        self.loop_start = Some(loop_start);

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(Opcode::Pop);
        }
        self.end_loop();

        self.loop_start = surrounding_start;
        self.loop_scope_depth = surrounding_depth;
        self.end_scope();
    }

    /// `for key[, value] in expr { body }`, desugared over the iterator
    /// protocol: `@iter(i)` yields the i-th key or `empty` when exhausted,
    /// `@itern(key)` yields the element at that key.
    fn for_statement(&mut self) {
        self.begin_scope();

        let iter_name = self.string_constant("@iter");
        let itern_name = self.string_constant("@itern");

        self.consume(TokenKind::Identifier, "expected variable name after 'for'");
        let first = self.lexeme(self.previous).to_string();
        let (key_name, value_name) = if self.matches(TokenKind::Comma) {
            self.consume(TokenKind::Identifier, "expected variable name after ','");
            (first, self.lexeme(self.previous).to_string())
        } else {
            // the single-variable form binds elements, with a hidden key;
            // the space makes the name unaddressable from source
            (" key ".to_string(), first)
        };

        self.consume(TokenKind::In, "expected 'in' after for loop variable(s)");

        // hidden iterable and loop-index locals
        self.expression();
        let iterable = self.add_local(" iterable ");
        self.mark_initialized();
        let zero = self.make_constant(Value::Number(0.0));
        self.emit_op_u16(Opcode::Constant, zero);
        let index = self.add_local(" index ");
        self.mark_initialized();

        // key = iterable.@iter(0)
        self.emit_op_u16(Opcode::GetLocal, iterable as u16);
        self.emit_op_u16(Opcode::GetLocal, index as u16);
        self.emit_op_u16(Opcode::Invoke, iter_name);
        self.emit_byte(1);
        let key = self.add_local(&key_name);
        self.mark_initialized();

        self.emit_op(Opcode::Nil);
        let value = self.add_local(&value_name);
        self.mark_initialized();

        let surrounding_start = self.loop_start;
        let surrounding_depth = self.loop_scope_depth;
        self.loop_scope_depth = self.state_ref().scope_depth;

        // while key != empty
        let cond_start = self.blob_len();
        self.emit_op_u16(Opcode::GetLocal, key as u16);
        self.emit_op(Opcode::Empty);
        self.emit_op(Opcode::Equal);
        self.emit_op(Opcode::Not);
        let exit_jump = self.emit_jump(Opcode::JumpIfFalse);
        self.emit_op(Opcode::Pop);

        // the step section sits before the body; `continue` jumps here
        let body_jump = self.emit_jump(Opcode::Jump);
        let step_start = self.blob_len();
        self.emit_op_u16(Opcode::GetLocal, index as u16);
        self.emit_op(Opcode::One);
        self.emit_op(Opcode::Add);
        self.emit_op_u16(Opcode::SetLocal, index as u16);
        self.emit_op(Opcode::Pop);
        self.emit_op_u16(Opcode::GetLocal, iterable as u16);
        self.emit_op_u16(Opcode::GetLocal, index as u16);
        self.emit_op_u16(Opcode::Invoke, iter_name);
        self.emit_byte(1);
        self.emit_op_u16(Opcode::SetLocal, key as u16);
        self.emit_op(Opcode::Pop);
        self.emit_loop(cond_start);
        self.patch_jump(body_jump);
        self.loop_start = Some(step_start);

        // value = iterable.@itern(key)
        self.emit_op_u16(Opcode::GetLocal, iterable as u16);
        self.emit_op_u16(Opcode::GetLocal, key as u16);
        self.emit_op_u16(Opcode::Invoke, itern_name);
        self.emit_byte(1);
        self.emit_op_u16(Opcode::SetLocal, value as u16);
        self.emit_op(Opcode::Pop);

        self.statement();
        self.emit_loop(step_start);

        self.patch_jump(exit_jump);
        self.emit_op(Opcode::Pop);
        self.end_loop();

        self.loop_start = surrounding_start;
        self.loop_scope_depth = surrounding_depth;
        self.end_scope();
    }

    /// Rewrites every `BreakPlaceholder` since the innermost loop start
    /// into a forward jump to the current position.
    fn end_loop(&mut self) {
        let Some(start) = self.loop_start else { return };
        let mut i = start;
        while i < self.blob_len() {
            if self.state_ref().blob.code[i] == Opcode::BreakPlaceholder as u8 {
                self.state().blob.code[i] = Opcode::Jump as u8;
                self.patch_jump(i + 1);
                i += 3;
            } else {
                i += 1 + self.instruction_operand_width(i);
            }
        }
    }

    /// Operand width of the instruction at `offset`, including closure
    /// capture descriptors.
    fn instruction_operand_width(&self, offset: usize) -> usize {
        let blob = &self.state_ref().blob;
        let op = Opcode::from_repr(blob.code[offset]).expect("compiler emitted a valid opcode");
        if op == Opcode::Closure {
            let constant = blob.read_u16(offset + 1);
            let function = blob.constants[constant as usize]
                .as_ref_id()
                .expect("closure constant is a function");
            2 + self.heap.function(function).up_value_count * 3
        } else {
            op.operand_width()
        }
    }

    fn continue_statement(&mut self) {
        let Some(start) = self.loop_start else {
            self.error("'continue' can only be used in a loop");
            return;
        };
        self.consume_statement_end();
        self.discard_locals(self.loop_scope_depth);
        self.emit_loop(start);
    }

    fn break_statement(&mut self) {
        if self.loop_start.is_none() {
            self.error("'break' can only be used in a loop");
            return;
        }
        self.consume_statement_end();
        self.discard_locals(self.loop_scope_depth);
        let _ = self.emit_jump(Opcode::BreakPlaceholder);
    }

    fn return_statement(&mut self) {
        self.is_returning = true;
        if self.state_ref().kind == FunctionKind::Script {
            self.error("cannot return from top-level code");
        }

        if self.matches(TokenKind::Semicolon) || self.matches(TokenKind::Newline) {
            self.emit_return();
        } else {
            if self.state_ref().kind == FunctionKind::Initializer {
                self.error("cannot return value from constructor");
            }
            self.expression();
            self.consume_statement_end();
            self.emit_op(Opcode::Return);
        }
        self.is_returning = false;
    }

    fn assert_statement(&mut self) {
        self.expression();
        if self.matches(TokenKind::Comma) {
            self.ignore_whitespace();
            self.expression();
        } else {
            self.emit_op(Opcode::Nil);
        }
        self.consume_statement_end();
        self.emit_op(Opcode::Assert);
    }

    fn die_statement(&mut self) {
        self.expression();
        self.consume_statement_end();
        self.emit_op(Opcode::Die);
    }

    // --- using / when -------------------------------------------------------

    fn using_statement(&mut self) {
        self.expression();
        self.ignore_whitespace();
        self.consume(TokenKind::LBrace, "expected '{' after using expression");
        self.ignore_whitespace();

        if self.all_when_labels_are_literals() {
            self.using_switch_table();
        } else {
            self.using_equality_chain();
        }
    }

    /// Lookahead over the `using` body deciding the compilation strategy.
    /// The scanner is cheap to clone, so this skims raw tokens and rewinds.
    fn all_when_labels_are_literals(&mut self) -> bool {
        let scanner = self.scanner.clone();
        let (previous, current) = (self.previous, self.current);

        let mut depth = 1usize;
        let mut literal = true;
        let mut token = self.current;
        'scan: loop {
            match token.kind {
                TokenKind::Eof | TokenKind::Error => break,
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                TokenKind::When if depth == 1 => {
                    // every label token until '{' must be a literal or comma
                    loop {
                        token = self.scanner.scan_token();
                        match token.kind {
                            TokenKind::LBrace => {
                                // the body opener; the outer match counts it
                                continue 'scan;
                            }
                            TokenKind::RegNumber
                            | TokenKind::BinNumber
                            | TokenKind::OctNumber
                            | TokenKind::HexNumber
                            | TokenKind::Literal
                            | TokenKind::True
                            | TokenKind::False
                            | TokenKind::Nil
                            | TokenKind::Comma
                            | TokenKind::Newline => {}
                            _ => {
                                literal = false;
                                break 'scan;
                            }
                        }
                    }
                }
                _ => {}
            }
            token = self.scanner.scan_token();
        }

        self.scanner = scanner;
        self.previous = previous;
        self.current = current;
        literal
    }

    /// The value of a literal label token, for switch-table keys.
    fn literal_label_value(&mut self) -> Option<Value> {
        if self.matches(TokenKind::True) {
            return Some(Value::Bool(true));
        }
        if self.matches(TokenKind::False) {
            return Some(Value::Bool(false));
        }
        if self.matches(TokenKind::Nil) {
            return Some(Value::Nil);
        }
        if self.matches(TokenKind::RegNumber)
            || self.matches(TokenKind::BinNumber)
            || self.matches(TokenKind::OctNumber)
            || self.matches(TokenKind::HexNumber)
        {
            return Some(Value::Number(self.number_value(self.previous)));
        }
        if self.matches(TokenKind::Literal) {
            let text = self.decode_string(self.previous);
            let id = self.heap.intern_owned(text);
            return Some(Value::Ref(id));
        }
        self.error_at_current("expected literal in when label");
        None
    }

    /// Every label is a compile-time literal: build a switch-table constant
    /// mapping label to relative jump.
    fn using_switch_table(&mut self) {
        let switch_id = self.heap.allocate(ObjData::Switch(SwitchObj::default()));
        let constant = self.make_constant(Value::Ref(switch_id));
        self.emit_op_u16(Opcode::Switch, constant);
        let dispatch_base = self.blob_len();

        let mut seen_default = false;
        let mut end_jumps = Vec::new();

        while !self.matches(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            if self.matches(TokenKind::When) {
                if seen_default {
                    self.error("cannot have another case after a default case");
                }
                let mut labels = Vec::new();
                loop {
                    self.ignore_whitespace();
                    if let Some(value) = self.literal_label_value() {
                        labels.push(value);
                    }
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                let offset = (self.blob_len() - dispatch_base) as i32;
                if let ObjData::Switch(switch) = self.heap.get_mut(switch_id) {
                    for label in labels {
                        switch.table.insert(label, offset);
                    }
                }
                self.statement();
                end_jumps.push(self.emit_jump(Opcode::Jump));
            } else if self.matches(TokenKind::Default) {
                seen_default = true;
                let offset = (self.blob_len() - dispatch_base) as i32;
                if let ObjData::Switch(switch) = self.heap.get_mut(switch_id) {
                    switch.default_jump = offset;
                }
                self.statement();
                end_jumps.push(self.emit_jump(Opcode::Jump));
            } else {
                self.error_at_current("expected 'when' or 'default' case");
                self.advance();
            }
            self.ignore_whitespace();
        }

        let exit = (self.blob_len() - dispatch_base) as i32;
        if let ObjData::Switch(switch) = self.heap.get_mut(switch_id) {
            if !seen_default {
                switch.default_jump = -1;
            }
            switch.exit_jump = exit;
        }
        for jump in end_jumps {
            self.patch_jump(jump);
        }
    }

    /// Fallback strategy when a label is not a compile-time literal:
    /// a chain of duplicate-compare-branch sequences. Falling through
    /// every case lands in the default body, when one exists.
    fn using_equality_chain(&mut self) {
        let mut seen_default = false;
        let mut end_jumps = Vec::new();

        while !self.matches(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            if self.matches(TokenKind::When) {
                if seen_default {
                    self.error("cannot have another case after a default case");
                }
                let mut body_jumps = Vec::new();
                loop {
                    self.ignore_whitespace();
                    self.emit_op(Opcode::Dup);
                    self.expression();
                    self.emit_op(Opcode::Equal);
                    let no_match = self.emit_jump(Opcode::JumpIfFalse);
                    self.emit_op(Opcode::Pop);
                    body_jumps.push(self.emit_jump(Opcode::Jump));
                    self.patch_jump(no_match);
                    self.emit_op(Opcode::Pop);
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
                let skip_body = self.emit_jump(Opcode::Jump);
                for jump in body_jumps {
                    self.patch_jump(jump);
                }
                self.statement();
                end_jumps.push(self.emit_jump(Opcode::Jump));
                self.patch_jump(skip_body);
            } else if self.matches(TokenKind::Default) {
                seen_default = true;
                self.statement();
                end_jumps.push(self.emit_jump(Opcode::Jump));
            } else {
                self.error_at_current("expected 'when' or 'default' case");
                self.advance();
            }
            self.ignore_whitespace();
        }

        for jump in end_jumps {
            self.patch_jump(jump);
        }
        self.emit_op(Opcode::Pop);
    }

    // --- try / catch / finally ----------------------------------------------

    fn try_statement(&mut self) {
        self.begin_scope();
        self.ignore_whitespace();

        // reserve the exception slot up front so the stack shape is the
        // same on the normal path and the catch path
        self.emit_op(Opcode::Nil);
        let exception_slot = self.add_local(" exception ");
        self.mark_initialized();

        // register the try instruction now; operands are patched below
        self.emit_op(Opcode::Try);
        let class_at = self.blob_len();
        self.emit_u16(TRY_NO_CLASS);
        let catch_at = self.blob_len();
        self.emit_u16(TRY_NO_ADDRESS);
        let finally_at = self.blob_len();
        self.emit_u16(TRY_NO_ADDRESS);

        self.consume(TokenKind::LBrace, "expected '{' after 'try'");
        self.begin_scope();
        self.block();
        self.end_scope();
        self.emit_op(Opcode::PopTry);
        let skip_catch = self.emit_jump(Opcode::Jump);

        self.ignore_whitespace();
        let mut has_catch = false;
        let mut inner_finally_at = None;
        if self.matches(TokenKind::Catch) {
            has_catch = true;
            self.consume(TokenKind::Identifier, "expected exception class name after 'catch'");
            let class_constant = self.identifier_constant(self.previous);
            self.state().blob.patch_u16(class_at, class_constant);
            let catch_address = self.blob_len() as u16;
            self.state().blob.patch_u16(catch_at, catch_address);

            // a finally-only guard so `die` inside the catch body still
            // reaches the finally block
            self.emit_op(Opcode::Try);
            self.emit_u16(TRY_NO_CLASS);
            self.emit_u16(TRY_NO_ADDRESS);
            inner_finally_at = Some(self.blob_len());
            self.emit_u16(TRY_NO_ADDRESS);

            // bind the staged exception into the reserved slot
            self.emit_op(Opcode::BeginCatch);
            self.emit_op_u16(Opcode::SetLocal, exception_slot as u16);
            self.emit_op(Opcode::Pop);
            if self.matches(TokenKind::As) {
                self.consume(TokenKind::Identifier, "expected exception variable name");
                let name = self.lexeme(self.previous).to_string();
                self.state().locals[exception_slot].name = name;
            }
            self.ignore_whitespace();
            self.consume(TokenKind::LBrace, "expected '{' after catch clause");
            self.begin_scope();
            self.block();
            self.end_scope();
            self.emit_op(Opcode::PopTry);
            self.emit_op(Opcode::EndCatch);
        }

        self.patch_jump(skip_catch);
        self.ignore_whitespace();

        let finally_address = self.blob_len() as u16;
        let mut has_finally = false;
        if self.matches(TokenKind::Finally) {
            has_finally = true;
            self.state().blob.patch_u16(finally_at, finally_address);
            if let Some(inner) = inner_finally_at {
                self.state().blob.patch_u16(inner, finally_address);
            }
            self.ignore_whitespace();
            self.consume(TokenKind::LBrace, "expected '{' after 'finally'");
            self.begin_scope();
            self.block();
            self.end_scope();
            self.emit_op(Opcode::PublishTry);
        }

        if !has_catch && !has_finally {
            self.error("expected 'catch' or 'finally' after try block");
        }
        self.end_scope();
    }

    // --- imports ------------------------------------------------------------

    fn import_statement(&mut self) {
        self.consume(TokenKind::Identifier, "expected module name after 'import'");
        let mut parts = vec![self.lexeme(self.previous).to_string()];
        while self.matches(TokenKind::Dot) {
            self.consume(TokenKind::Identifier, "expected name after '.' in import path");
            parts.push(self.lexeme(self.previous).to_string());
        }

        let mut binding = parts.last().cloned().unwrap_or_default();
        let mut aliased = false;
        if self.matches(TokenKind::As) {
            self.consume(TokenKind::Identifier, "expected alias name after 'as'");
            binding = self.lexeme(self.previous).to_string();
            aliased = true;
        }

        // selector list: { name, ... } or { * }
        let mut selectors: Vec<String> = Vec::new();
        let mut select_all = false;
        if self.matches(TokenKind::LBrace) {
            self.ignore_whitespace();
            if self.matches(TokenKind::Multiply) {
                select_all = true;
            } else {
                loop {
                    self.ignore_whitespace();
                    self.consume(TokenKind::Identifier, "expected name in import selector");
                    selectors.push(self.lexeme(self.previous).to_string());
                    self.ignore_whitespace();
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                }
            }
            self.ignore_whitespace();
            self.consume(TokenKind::RBrace, "expected '}' after import selectors");
        }
        self.consume_statement_end();

        let relative = parts.join("/");
        if let Some(path) =
            modules::resolve_source_module(&self.options.directory, self.options.std_root.as_deref(), &relative)
        {
            self.import_source_module(&path, &binding, &selectors, select_all, aliased);
        } else if modules::native_module_exists(parts[0].as_str()) && parts.len() == 1 {
            self.import_native_module(&parts[0], &binding, &selectors, select_all, aliased);
        } else {
            self.error(&format!("module '{}' not found", parts.join(".")));
        }
    }

    fn import_source_module(
        &mut self,
        path: &Path,
        binding: &str,
        selectors: &[String],
        select_all: bool,
        aliased: bool,
    ) {
        let canonical = path
            .canonicalize()
            .map_or_else(|_| path.display().to_string(), |p| p.display().to_string());
        if self.chain.iter().any(|p| p == &canonical) {
            self.error("a module cannot import itself");
            return;
        }
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                self.error(&format!("could not read module '{canonical}': {err}"));
                return;
            }
        };

        let module = self.heap.allocate(ObjData::Module(ModuleObj {
            name: binding.to_string(),
            file: canonical.clone(),
            values: Table::default(),
            preloader: None,
            unloader: None,
        }));

        let nested_options = CompileOptions {
            file_path: canonical.clone(),
            directory: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            std_root: self.options.std_root.clone(),
        };
        self.chain.push(canonical.clone());
        let compiled = compile_module(self.heap, &source, module, &nested_options, self.chain);
        self.chain.pop();

        match compiled {
            Ok(function) => {
                let constant = self.make_constant(Value::Ref(function));
                self.emit_op_u16(Opcode::CallImport, constant);
                self.emit_op(Opcode::Pop);

                let path_constant = self.string_constant(&canonical);
                if select_all {
                    self.emit_op_u16(Opcode::ImportAll, path_constant);
                } else {
                    for name in selectors {
                        let name_constant = self.string_constant(name);
                        self.emit_op_u16(Opcode::SelectImport, path_constant);
                        self.emit_u16(name_constant);
                    }
                }
                if (select_all || !selectors.is_empty()) && !aliased {
                    let binding_constant = self.string_constant(binding);
                    self.emit_op_u16(Opcode::EjectImport, binding_constant);
                }
            }
            Err(nested) => {
                self.had_error = true;
                self.errors.extend(nested);
            }
        }
    }

    fn import_native_module(
        &mut self,
        name: &str,
        binding: &str,
        selectors: &[String],
        select_all: bool,
        aliased: bool,
    ) {
        let name_constant = self.string_constant(name);
        let binding_constant = self.string_constant(binding);
        self.emit_op_u16(Opcode::NativeModule, name_constant);
        self.emit_u16(binding_constant);
        self.emit_op(Opcode::Pop);

        if select_all {
            self.emit_op_u16(Opcode::ImportAllNative, name_constant);
        } else {
            for selector in selectors {
                let selector_constant = self.string_constant(selector);
                self.emit_op_u16(Opcode::SelectNativeImport, name_constant);
                self.emit_u16(selector_constant);
            }
        }
        if (select_all || !selectors.is_empty()) && !aliased {
            self.emit_op_u16(Opcode::EjectNativeImport, binding_constant);
        }
    }

    // --- functions and classes ----------------------------------------------

    fn function_declaration(&mut self) {
        let global = self.parse_variable("function name expected");
        let name = self.heap.intern(self.lexeme(self.previous));
        self.mark_initialized();
        self.function_body(FunctionKind::Function, name);
        self.define_variable(global);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "class name expected");
        let name_constant = self.identifier_constant(self.previous);
        let class_name = self.lexeme(self.previous).to_string();
        self.declare_variable();

        self.emit_op_u16(Opcode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassCompiler { name: class_name.clone(), has_superclass: false });

        let mut scoped = false;
        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "name of superclass expected");
            let superclass = self.lexeme(self.previous).to_string();
            if superclass == class_name {
                self.error("a class cannot inherit from itself");
            }
            self.named_variable(&superclass, false);

            self.begin_scope();
            scoped = true;
            self.add_local("parent");
            self.define_variable(0);

            self.named_variable(&class_name, false);
            self.emit_op(Opcode::Inherit);
            if let Some(class) = self.classes.last_mut() {
                class.has_superclass = true;
            }
        }

        self.named_variable(&class_name, false);

        self.ignore_whitespace();
        self.consume(TokenKind::LBrace, "expected '{' before class body");
        self.ignore_whitespace();
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            let is_static = self.matches(TokenKind::Static);
            if self.matches(TokenKind::Var) {
                self.class_field(is_static);
            } else {
                self.method(&class_name, is_static);
            }
            self.ignore_whitespace();
        }
        self.consume(TokenKind::RBrace, "expected '}' after class body");
        self.emit_op(Opcode::Pop);

        if scoped {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn class_field(&mut self, is_static: bool) {
        self.consume(TokenKind::Identifier, "class property name expected");
        let name_constant = self.identifier_constant(self.previous);
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(Opcode::Nil);
        }
        self.consume_statement_end();
        self.ignore_whitespace();
        self.emit_op_u16(Opcode::ClassProperty, name_constant);
        self.emit_byte(u8::from(is_static));
    }

    fn method(&mut self, class_name: &str, is_static: bool) {
        self.consume(TokenKind::Identifier, "method name expected");
        let constant = self.identifier_constant(self.previous);
        let method_name = self.lexeme(self.previous).to_string();
        let name = self.heap.intern(&method_name);

        let kind = if is_static {
            FunctionKind::Static
        } else if method_name == class_name {
            FunctionKind::Initializer
        } else if method_name.starts_with('_') {
            FunctionKind::Private
        } else {
            FunctionKind::Method
        };
        self.function_body(kind, name);
        self.emit_op_u16(Opcode::Method, constant);
        self.emit_byte(u8::from(is_static));
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if matches!(self.current.kind, TokenKind::Newline | TokenKind::Semicolon) {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Def
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::Using
                | TokenKind::When
                | TokenKind::Iter
                | TokenKind::While
                | TokenKind::Echo
                | TokenKind::Assert
                | TokenKind::Try
                | TokenKind::Die
                | TokenKind::Return
                | TokenKind::Import
                | TokenKind::Static
                | TokenKind::SelfKw
                | TokenKind::Parent => return,
                _ => {}
            }
            self.advance();
        }
    }

    fn number_value(&mut self, token: Token) -> f64 {
        let lexeme = self.lexeme(token);
        let parsed = match token.kind {
            TokenKind::BinNumber => i64::from_str_radix(&lexeme[2..], 2).ok().map(|v| v as f64),
            TokenKind::OctNumber => i64::from_str_radix(&lexeme[2..], 8).ok().map(|v| v as f64),
            TokenKind::HexNumber => i64::from_str_radix(&lexeme[2..], 16).ok().map(|v| v as f64),
            _ => lexeme.parse::<f64>().ok(),
        };
        match parsed {
            Some(value) => value,
            None => {
                self.error("invalid number literal");
                0.0
            }
        }
    }
}

// --- parse rule handlers (free functions, so the table stays plain data) ---

fn grouping(p: &mut Parser<'_, '_>, _can_assign: bool) {
    p.ignore_whitespace();
    p.expression();
    p.ignore_whitespace();
    p.consume(TokenKind::RParen, "expected ')' after grouped expression");
}

fn call_expr(p: &mut Parser<'_, '_>, _can_assign: bool) {
    let argc = p.argument_list();
    p.emit_op(Opcode::Call);
    p.emit_byte(argc);
}

fn list_literal(p: &mut Parser<'_, '_>, _can_assign: bool) {
    let mut count: u16 = 0;
    p.ignore_whitespace();
    if !p.check(TokenKind::RBracket) {
        loop {
            p.ignore_whitespace();
            if p.check(TokenKind::RBracket) {
                break; // allow a trailing comma
            }
            p.expression();
            p.ignore_whitespace();
            count += 1;
            if !p.matches(TokenKind::Comma) {
                break;
            }
        }
    }
    p.ignore_whitespace();
    p.consume(TokenKind::RBracket, "expected ']' at end of list");
    p.emit_op_u16(Opcode::List, count);
}

fn dict_literal(p: &mut Parser<'_, '_>, _can_assign: bool) {
    let mut count: u16 = 0;
    p.ignore_whitespace();
    if !p.check(TokenKind::RBrace) {
        loop {
            p.ignore_whitespace();
            if p.check(TokenKind::RBrace) {
                break; // allow the last pair to end with a comma
            }
            if p.matches(TokenKind::Identifier) {
                // bare identifiers are shorthand for string keys
                let name = p.lexeme(p.previous).to_string();
                let id = p.heap.intern_owned(name);
                p.emit_constant(Value::Ref(id));
            } else {
                p.expression();
            }
            p.ignore_whitespace();
            p.consume(TokenKind::Colon, "expected ':' after dictionary key");
            p.ignore_whitespace();
            p.expression();
            count += 1;
            p.ignore_whitespace();
            if !p.matches(TokenKind::Comma) {
                break;
            }
        }
    }
    p.ignore_whitespace();
    p.consume(TokenKind::RBrace, "expected '}' after dictionary");
    p.emit_op_u16(Opcode::Dict, count);
}

fn indexing(p: &mut Parser<'_, '_>, can_assign: bool) {
    p.ignore_whitespace();
    p.expression();
    if p.matches(TokenKind::Comma) {
        // two-index (slice) form; never assignable
        p.ignore_whitespace();
        p.expression();
        p.consume(TokenKind::RBracket, "expected ']' at end of index");
        p.emit_op(Opcode::GetRangedIndex);
        return;
    }
    p.consume(TokenKind::RBracket, "expected ']' at end of index");
    p.assignment(AssignTarget::Index, can_assign);
}

fn dot(p: &mut Parser<'_, '_>, can_assign: bool) {
    p.ignore_whitespace();
    p.consume(TokenKind::Identifier, "expected property name after '.'");
    let name = p.identifier_constant(p.previous);

    if p.matches(TokenKind::LParen) {
        let argc = p.argument_list();
        p.emit_op_u16(Opcode::Invoke, name);
        p.emit_byte(argc);
    } else {
        p.assignment(AssignTarget::Property { name, self_prop: false }, can_assign);
    }
}

fn variable(p: &mut Parser<'_, '_>, can_assign: bool) {
    let name = p.lexeme(p.previous).to_string();
    p.named_variable(&name, can_assign);
}

fn self_expr(p: &mut Parser<'_, '_>, can_assign: bool) {
    if p.classes.is_empty() {
        p.error("cannot use keyword 'self' outside of a class");
        return;
    }

    if p.check(TokenKind::Dot) {
        // the `self.name` form may reach private members
        p.advance();
        p.consume(TokenKind::Identifier, "expected property name after '.'");
        let name = p.identifier_constant(p.previous);

        if p.matches(TokenKind::LParen) {
            p.named_variable("self", false);
            let argc = p.argument_list();
            p.emit_op_u16(Opcode::InvokeSelf, name);
            p.emit_byte(argc);
        } else {
            p.named_variable("self", false);
            p.assignment(AssignTarget::Property { name, self_prop: true }, can_assign);
        }
        return;
    }
    p.named_variable("self", false);
}

fn parent_expr(p: &mut Parser<'_, '_>, _can_assign: bool) {
    let in_class = !p.classes.is_empty();
    let has_superclass = p.classes.last().is_some_and(|c| c.has_superclass);
    if !in_class {
        p.error("cannot use keyword 'parent' outside of a class");
    } else if !has_superclass {
        p.error("cannot use keyword 'parent' in a class without a parent");
    }

    p.consume(TokenKind::Dot, "expected '.' after parent");
    p.consume(TokenKind::Identifier, "expected parent class method name after '.'");
    let name = p.identifier_constant(p.previous);
    let is_private = p.lexeme(p.previous).starts_with('_');

    p.named_variable("self", false);
    if p.matches(TokenKind::LParen) {
        let argc = p.argument_list();
        p.named_variable("parent", false);
        let op = if is_private { Opcode::SuperInvokeSelf } else { Opcode::SuperInvoke };
        p.emit_op_u16(op, name);
        p.emit_byte(argc);
    } else {
        p.named_variable("parent", false);
        p.emit_op_u16(Opcode::GetSuper, name);
    }
}

fn number(p: &mut Parser<'_, '_>, _can_assign: bool) {
    let value = p.number_value(p.previous);
    p.emit_constant(Value::Number(value));
}

fn string(p: &mut Parser<'_, '_>, _can_assign: bool) {
    let text = p.decode_string(p.previous);
    let id = p.heap.intern_owned(text);
    p.emit_constant(Value::Ref(id));
}

/// `"a${expr}b"` — alternate string parts and stringified expressions,
/// concatenated left to right.
fn string_interpolation(p: &mut Parser<'_, '_>, _can_assign: bool) {
    let mut have_accumulator = false;
    loop {
        let segment = p.decode_string(p.previous);
        if !segment.is_empty() {
            let id = p.heap.intern_owned(segment);
            p.emit_constant(Value::Ref(id));
            if have_accumulator {
                p.emit_op(Opcode::Add);
            }
            have_accumulator = true;
        }

        p.ignore_whitespace();
        p.expression();
        p.emit_op(Opcode::Stringify);
        if have_accumulator {
            p.emit_op(Opcode::Add);
        }
        have_accumulator = true;

        if !p.matches(TokenKind::Interpolation) {
            break;
        }
    }

    p.consume(TokenKind::Literal, "unterminated string interpolation");
    let tail = p.decode_string(p.previous);
    if !tail.is_empty() {
        let id = p.heap.intern_owned(tail);
        p.emit_constant(Value::Ref(id));
        p.emit_op(Opcode::Add);
    }
}

fn literal(p: &mut Parser<'_, '_>, _can_assign: bool) {
    match p.previous.kind {
        TokenKind::Nil => p.emit_op(Opcode::Nil),
        TokenKind::True => p.emit_op(Opcode::True),
        TokenKind::False => p.emit_op(Opcode::False),
        TokenKind::Empty => {
            let in_method = matches!(
                p.state_ref().kind,
                FunctionKind::Method
                    | FunctionKind::Initializer
                    | FunctionKind::Private
                    | FunctionKind::Static
            );
            if !in_method && !p.is_returning {
                p.error("the empty keyword is only valid inside methods and return statements");
            }
            p.emit_op(Opcode::Empty);
        }
        _ => {}
    }
}

fn unary(p: &mut Parser<'_, '_>, _can_assign: bool) {
    let op = p.previous.kind;
    p.parse_precedence(Precedence::Unary);
    match op {
        TokenKind::Minus => p.emit_op(Opcode::Negate),
        TokenKind::Bang => p.emit_op(Opcode::Not),
        TokenKind::Tilde => p.emit_op(Opcode::BitNot),
        _ => {}
    }
}

fn binary(p: &mut Parser<'_, '_>, _can_assign: bool) {
    let op = p.previous.kind;
    let precedence = get_rule(op).precedence.next();
    p.parse_precedence(precedence);

    match op {
        TokenKind::Plus => p.emit_op(Opcode::Add),
        TokenKind::Minus => p.emit_op(Opcode::Subtract),
        TokenKind::Multiply => p.emit_op(Opcode::Multiply),
        TokenKind::Divide => p.emit_op(Opcode::Divide),
        TokenKind::Percent => p.emit_op(Opcode::Reminder),
        TokenKind::Pow => p.emit_op(Opcode::Pow),
        TokenKind::Floor => p.emit_op(Opcode::FDivide),
        TokenKind::EqualEq => p.emit_op(Opcode::Equal),
        TokenKind::BangEq => {
            p.emit_op(Opcode::Equal);
            p.emit_op(Opcode::Not);
        }
        TokenKind::Greater => p.emit_op(Opcode::Greater),
        TokenKind::GreaterEq => {
            p.emit_op(Opcode::Less);
            p.emit_op(Opcode::Not);
        }
        TokenKind::Less => p.emit_op(Opcode::Less),
        TokenKind::LessEq => {
            p.emit_op(Opcode::Greater);
            p.emit_op(Opcode::Not);
        }
        TokenKind::Amp => p.emit_op(Opcode::BitAnd),
        TokenKind::Bar => p.emit_op(Opcode::BitOr),
        TokenKind::Xor => p.emit_op(Opcode::BitXor),
        TokenKind::LShift => p.emit_op(Opcode::LShift),
        TokenKind::RShift => p.emit_op(Opcode::RShift),
        TokenKind::Range => p.emit_op(Opcode::Range),
        _ => {}
    }
}

fn and_expr(p: &mut Parser<'_, '_>, _can_assign: bool) {
    let end_jump = p.emit_jump(Opcode::JumpIfFalse);
    p.emit_op(Opcode::Pop);
    p.parse_precedence(Precedence::And);
    p.patch_jump(end_jump);
}

fn or_expr(p: &mut Parser<'_, '_>, _can_assign: bool) {
    let else_jump = p.emit_jump(Opcode::JumpIfFalse);
    let end_jump = p.emit_jump(Opcode::Jump);
    p.patch_jump(else_jump);
    p.emit_op(Opcode::Pop);
    p.parse_precedence(Precedence::Or);
    p.patch_jump(end_jump);
}

/// `cond ? then : else` — both branches evaluate, `Choice` selects.
fn conditional(p: &mut Parser<'_, '_>, _can_assign: bool) {
    p.ignore_whitespace();
    p.parse_precedence(Precedence::Conditional.next());
    p.ignore_whitespace();
    p.consume(TokenKind::Colon, "expected ':' in conditional expression");
    p.ignore_whitespace();
    p.parse_precedence(Precedence::Conditional.next());
    p.emit_op(Opcode::Choice);
}

fn get_rule(kind: TokenKind) -> ParseRule {
    match kind {
        TokenKind::LParen => rule(Some(grouping), Some(call_expr), Precedence::Call),
        TokenKind::LBracket => rule(Some(list_literal), Some(indexing), Precedence::Call),
        TokenKind::LBrace => rule(Some(dict_literal), None, Precedence::None),
        TokenKind::Dot => rule(None, Some(dot), Precedence::Call),
        TokenKind::Bang => rule(Some(unary), None, Precedence::None),
        TokenKind::BangEq => rule(None, Some(binary), Precedence::Equality),
        TokenKind::EqualEq => rule(None, Some(binary), Precedence::Equality),
        TokenKind::Less | TokenKind::LessEq | TokenKind::Greater | TokenKind::GreaterEq => {
            rule(None, Some(binary), Precedence::Comparison)
        }
        TokenKind::Plus => rule(None, Some(binary), Precedence::Term),
        TokenKind::Minus => rule(Some(unary), Some(binary), Precedence::Term),
        TokenKind::Multiply | TokenKind::Divide | TokenKind::Floor | TokenKind::Percent
        | TokenKind::Pow => rule(None, Some(binary), Precedence::Factor),
        TokenKind::Amp => rule(None, Some(binary), Precedence::BitAnd),
        TokenKind::Bar => rule(None, Some(binary), Precedence::BitOr),
        TokenKind::Xor => rule(None, Some(binary), Precedence::BitXor),
        TokenKind::LShift | TokenKind::RShift => rule(None, Some(binary), Precedence::Shift),
        TokenKind::Range => rule(None, Some(binary), Precedence::Range),
        TokenKind::Tilde => rule(Some(unary), None, Precedence::None),
        TokenKind::Question => rule(None, Some(conditional), Precedence::Conditional),
        TokenKind::And => rule(None, Some(and_expr), Precedence::And),
        TokenKind::Or => rule(None, Some(or_expr), Precedence::Or),
        TokenKind::True | TokenKind::False | TokenKind::Nil | TokenKind::Empty => {
            rule(Some(literal), None, Precedence::None)
        }
        TokenKind::Literal => rule(Some(string), None, Precedence::None),
        TokenKind::Interpolation => rule(Some(string_interpolation), None, Precedence::None),
        TokenKind::RegNumber
        | TokenKind::BinNumber
        | TokenKind::OctNumber
        | TokenKind::HexNumber => rule(Some(number), None, Precedence::None),
        TokenKind::Identifier => rule(Some(variable), None, Precedence::None),
        TokenKind::SelfKw => rule(Some(self_expr), None, Precedence::None),
        TokenKind::Parent => rule(Some(parent_expr), None, Precedence::None),
        _ => rule(None, None, Precedence::None),
    }
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{compile_module, CompileOptions};
    use crate::bytecode::Opcode;
    use crate::heap::{Heap, HeapId, ModuleObj, ObjData, Table};

    fn test_module(heap: &mut Heap) -> HeapId {
        heap.allocate(ObjData::Module(ModuleObj {
            name: "<test>".to_string(),
            file: "<test>".to_string(),
            values: Table::default(),
            preloader: None,
            unloader: None,
        }))
    }

    fn compile_ok(source: &str) -> (Heap, HeapId) {
        let mut heap = Heap::new();
        let module = test_module(&mut heap);
        let options = CompileOptions::default();
        let mut chain = Vec::new();
        let function = compile_module(&mut heap, source, module, &options, &mut chain)
            .unwrap_or_else(|errs| panic!("compile failed: {errs:?}"));
        (heap, function)
    }

    fn compile_err(source: &str) -> String {
        let mut heap = Heap::new();
        let module = test_module(&mut heap);
        let options = CompileOptions::default();
        let mut chain = Vec::new();
        match compile_module(&mut heap, source, module, &options, &mut chain) {
            Ok(_) => panic!("expected compile error"),
            Err(errors) => errors[0].message.clone(),
        }
    }

    fn ops(heap: &Heap, function: HeapId) -> Vec<Opcode> {
        let blob = &heap.function(function).blob;
        let mut out = Vec::new();
        let mut i = 0;
        while i < blob.code.len() {
            let op = Opcode::from_repr(blob.code[i]).unwrap();
            out.push(op);
            i += 1 + if op == Opcode::Closure {
                let constant = blob.read_u16(i + 1);
                let f = blob.constants[constant as usize].as_ref_id().unwrap();
                2 + heap.function(f).up_value_count * 3
            } else {
                op.operand_width()
            };
        }
        out
    }

    #[test]
    fn compiles_echo_of_a_sum() {
        let (heap, function) = compile_ok("echo 1 + 2");
        assert_eq!(
            ops(&heap, function),
            vec![
                Opcode::Constant,
                Opcode::Constant,
                Opcode::Add,
                Opcode::Echo,
                Opcode::Nil,
                Opcode::Return,
            ]
        );
    }

    #[test]
    fn same_source_compiles_to_identical_bytecode() {
        let source = "var x = 10\nwhile x > 0 { x -= 1 }\necho x";
        let (heap_a, fn_a) = compile_ok(source);
        let (heap_b, fn_b) = compile_ok(source);
        assert_eq!(heap_a.function(fn_a).blob.code, heap_b.function(fn_b).blob.code);
    }

    #[test]
    fn captured_functions_compile_to_closures() {
        let (heap, function) =
            compile_ok("def make() { var n = 0\n def inc() { n = n + 1\n return n }\n return inc }");
        let script_ops = ops(&heap, function);
        assert!(script_ops.contains(&Opcode::Constant));
        // the outer function constant carries the inner closure
        let outer = heap
            .function(function)
            .blob
            .constants
            .iter()
            .filter_map(|c| c.as_ref_id())
            .find(|&id| matches!(heap.get(id), ObjData::Function(_)))
            .expect("outer function constant");
        assert!(ops(&heap, outer).contains(&Opcode::Closure));
    }

    #[test]
    fn break_placeholders_are_rewritten() {
        let (heap, function) = compile_ok("while true { break }");
        let compiled = ops(&heap, function);
        assert!(compiled.contains(&Opcode::Jump));
        assert!(!compiled.contains(&Opcode::BreakPlaceholder));
    }

    #[test]
    fn literal_using_builds_a_switch_table() {
        let (heap, function) =
            compile_ok("using 2 { when 1 { echo \"a\" } when 2 { echo \"b\" } default { echo \"c\" } }");
        assert!(ops(&heap, function).contains(&Opcode::Switch));
    }

    #[test]
    fn non_literal_using_falls_back_to_equality_chain() {
        let (heap, function) =
            compile_ok("var v = 2\nusing 2 { when v { echo \"a\" } default { echo \"c\" } }");
        let compiled = ops(&heap, function);
        assert!(!compiled.contains(&Opcode::Switch));
        assert!(compiled.contains(&Opcode::Dup));
        assert!(compiled.contains(&Opcode::Equal));
    }

    #[test]
    fn try_catch_finally_emits_handler_ops() {
        let (heap, function) = compile_ok(
            "try { echo 1 } catch Exception as e { echo 2 } finally { echo 3 }",
        );
        let compiled = ops(&heap, function);
        assert!(compiled.contains(&Opcode::Try));
        assert!(compiled.contains(&Opcode::PopTry));
        assert!(compiled.contains(&Opcode::BeginCatch));
        assert!(compiled.contains(&Opcode::EndCatch));
        assert!(compiled.contains(&Opcode::PublishTry));
    }

    #[test]
    fn rejects_top_level_return() {
        assert!(compile_err("return 5").contains("cannot return from top-level code"));
    }

    #[test]
    fn rejects_self_outside_class() {
        assert!(compile_err("echo self").contains("outside of a class"));
    }

    #[test]
    fn rejects_duplicate_local() {
        let message = compile_err("def f() { var a = 1\n var a = 2 }");
        assert!(message.contains("already declared"));
    }

    #[test]
    fn number_bases_parse_to_the_same_constant_kind() {
        let (heap, function) = compile_ok("echo 0b101 + 0c7 + 0xff + 1.5");
        let constants = &heap.function(function).blob.constants;
        let numbers: Vec<f64> = constants.iter().filter_map(|v| v.as_number()).collect();
        assert_eq!(numbers, vec![5.0, 7.0, 255.0, 1.5]);
    }

    #[test]
    fn interpolation_compiles_to_concatenation() {
        let (heap, function) = compile_ok("var s = \"a\"\necho \"x${s}y\"");
        let compiled = ops(&heap, function);
        assert!(compiled.contains(&Opcode::Stringify));
        assert!(compiled.contains(&Opcode::Add));
    }
}
