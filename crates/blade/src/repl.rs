//! Line-based REPL session support.
//!
//! The terminal loop itself lives in the CLI; this module owns the parts
//! that must survive between entries: the shared `<repl>` module (so
//! later inputs see earlier definitions) and the continuation scanner
//! that decides whether a line still has unmatched `{`/`(`/`[` or an
//! open quote and needs another line before compiling.

use crate::compiler::CompileOptions;
use crate::heap::HeapId;
use crate::vm::{RunOutcome, Vm};

/// Tracks open delimiters across buffered REPL input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OpenDelimiters {
    pub braces: usize,
    pub parens: usize,
    pub brackets: usize,
    pub single_quote: bool,
    pub double_quote: bool,
}

impl OpenDelimiters {
    /// Is more input required before the buffer can compile?
    #[must_use]
    pub fn pending(&self) -> bool {
        self.braces > 0
            || self.parens > 0
            || self.brackets > 0
            || self.single_quote
            || self.double_quote
    }

    /// Folds one input line into the delimiter counts.
    pub fn feed(&mut self, line: &str) {
        let bytes = line.as_bytes();
        for (i, &c) in bytes.iter().enumerate() {
            let escaped = i > 0 && bytes[i - 1] == b'\\';
            match c {
                b'\'' if !self.double_quote && !escaped => {
                    self.single_quote = !self.single_quote;
                }
                b'"' if !self.single_quote && !escaped => {
                    self.double_quote = !self.double_quote;
                }
                _ if self.single_quote || self.double_quote => {}
                b'{' => self.braces += 1,
                b'}' => self.braces = self.braces.saturating_sub(1),
                b'(' => self.parens += 1,
                b')' => self.parens = self.parens.saturating_sub(1),
                b'[' => self.brackets += 1,
                b']' => self.brackets = self.brackets.saturating_sub(1),
                _ => {}
            }
        }
    }
}

/// A REPL session: one shared module plus input buffering state.
pub struct ReplSession {
    module: HeapId,
    options: CompileOptions,
    buffer: String,
    delimiters: OpenDelimiters,
}

impl ReplSession {
    pub fn new(vm: &mut Vm<'_>) -> Self {
        vm.repl_mode = true;
        let module = vm.new_module("", "<repl>");
        Self {
            module,
            options: CompileOptions {
                file_path: "<repl>".to_string(),
                directory: std::env::current_dir().unwrap_or_default(),
                std_root: crate::modules::default_std_root(),
            },
            buffer: String::new(),
            delimiters: OpenDelimiters::default(),
        }
    }

    /// The prompt reflecting continuation state: `> `, `| ` inside an
    /// open bracket pair, or blank continuation inside a string.
    #[must_use]
    pub fn prompt(&self) -> &'static str {
        if self.delimiters.single_quote || self.delimiters.double_quote {
            "  "
        } else if self.delimiters.pending() {
            "| "
        } else {
            "> "
        }
    }

    /// Feeds one input line. Returns the outcome when the buffer formed a
    /// complete input and was executed, `None` when more input is needed.
    pub fn feed_line(&mut self, vm: &mut Vm<'_>, line: &str) -> Option<RunOutcome> {
        self.delimiters.feed(line);
        self.buffer.push_str(line);
        if !line.is_empty() {
            self.buffer.push('\n');
        }

        if self.delimiters.pending() {
            return None;
        }

        let source = std::mem::take(&mut self.buffer);
        self.delimiters = OpenDelimiters::default();
        Some(vm.run_module_source(self.module, &source, &self.options))
    }

    /// Drops buffered input (used on interrupt).
    pub fn reset_input(&mut self) {
        self.buffer.clear();
        self.delimiters = OpenDelimiters::default();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::OpenDelimiters;

    #[test]
    fn brackets_require_continuation() {
        let mut state = OpenDelimiters::default();
        state.feed("def f() {");
        assert!(state.pending());
        state.feed("}");
        assert!(!state.pending());
    }

    #[test]
    fn quotes_track_across_lines() {
        let mut state = OpenDelimiters::default();
        state.feed("var s = \"abc");
        assert!(state.pending());
        state.feed("def\"");
        assert!(!state.pending());
    }

    #[test]
    fn braces_inside_strings_do_not_count() {
        let mut state = OpenDelimiters::default();
        state.feed("var s = \"{\"");
        assert_eq!(state.braces, 0);
        assert!(!state.pending());
    }

    #[test]
    fn escaped_quotes_stay_open() {
        let mut state = OpenDelimiters::default();
        state.feed("var s = \"a\\\"b");
        assert!(state.pending());
    }
}
