//! The lexer.
//!
//! Produces a token stream over a UTF-8 source buffer with line tracking.
//! Newlines are significant (statement terminators); spaces, tabs, `#`
//! line comments, and nested `/* … */` block comments are skipped.
//!
//! String interpolation: inside a string literal, an unescaped `${` emits
//! an [`TokenKind::Interpolation`] token and pushes the opening quote on a
//! bounded internal stack; when the matching `}` is scanned and the stack
//! is non-empty, scanning resumes in string mode with the popped quote.
//! Every string-ish token's span carries exactly one delimiter byte at
//! each end (quote or `}` / quote or `$`), which the compiler strips.

use smallvec::SmallVec;

use crate::token::{Token, TokenKind};

/// Upper bound on `${…}` nesting depth.
pub const MAX_INTERPOLATION_NESTING: usize = 8;

#[derive(Clone)]
pub struct Scanner<'src> {
    source: &'src str,
    bytes: &'src [u8],
    start: usize,
    current: usize,
    line: u32,
    interpolating: SmallVec<[u8; MAX_INTERPOLATION_NESTING]>,
    error: Option<String>,
}

impl<'src> Scanner<'src> {
    #[must_use]
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
            interpolating: SmallVec::new(),
            error: None,
        }
    }

    /// The message attached to the most recent [`TokenKind::Error`] token.
    #[must_use]
    pub fn take_error(&mut self) -> String {
        self.error.take().unwrap_or_else(|| "unknown scan error".to_string())
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() { 0 } else { self.bytes[self.current] }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.bytes.len() { 0 } else { self.bytes[self.current + 1] }
    }

    fn previous(&self) -> u8 {
        if self.current == 0 { 0 } else { self.bytes[self.current - 1] }
    }

    fn advance(&mut self) -> u8 {
        let c = self.bytes[self.current];
        self.current += 1;
        if c == b'\n' {
            self.line += 1;
        }
        c
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.bytes[self.current] != expected {
            return false;
        }
        self.advance();
        true
    }

    fn make_token(&self, kind: TokenKind) -> Token {
        Token { kind, start: self.start, end: self.current, line: self.line }
    }

    fn error_token(&mut self, message: impl Into<String>) -> Token {
        self.error = Some(message.into());
        self.make_token(TokenKind::Error)
    }

    /// Skips spaces, line comments, and nested block comments. Returns an
    /// error token for an unterminated block comment.
    fn skip_whitespace(&mut self) -> Option<Token> {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.advance();
                }
                b'#' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.advance();
                    }
                }
                b'/' if self.peek_next() == b'*' => {
                    self.advance();
                    self.advance();
                    if let Some(err) = self.skip_block_comment() {
                        return Some(err);
                    }
                }
                _ => return None,
            }
        }
    }

    fn skip_block_comment(&mut self) -> Option<Token> {
        let mut nesting = 1;
        while nesting > 0 {
            if self.is_at_end() {
                return Some(self.error_token("unclosed block comment"));
            }
            if self.peek() == b'/' && self.peek_next() == b'*' {
                self.advance();
                self.advance();
                nesting += 1;
            } else if self.peek() == b'*' && self.peek_next() == b'/' {
                self.advance();
                self.advance();
                nesting -= 1;
            } else {
                self.advance();
            }
        }
        None
    }

    pub fn scan_token(&mut self) -> Token {
        if let Some(err) = self.skip_whitespace() {
            return err;
        }

        self.start = self.current;
        if self.is_at_end() {
            return self.make_token(TokenKind::Eof);
        }

        let c = self.advance();
        if c.is_ascii_digit() {
            return self.number();
        }
        if c.is_ascii_alphabetic() || c == b'_' || c == b'@' {
            return self.identifier();
        }

        match c {
            b'(' => self.make_token(TokenKind::LParen),
            b')' => self.make_token(TokenKind::RParen),
            b'[' => self.make_token(TokenKind::LBracket),
            b']' => self.make_token(TokenKind::RBracket),
            b'{' => self.make_token(TokenKind::LBrace),
            b'}' => {
                if let Some(quote) = self.interpolating.pop() {
                    return self.string(quote);
                }
                self.make_token(TokenKind::RBrace)
            }
            b';' => self.make_token(TokenKind::Semicolon),
            b':' => self.make_token(TokenKind::Colon),
            b',' => self.make_token(TokenKind::Comma),
            b'?' => self.make_token(TokenKind::Question),
            b'!' => {
                let kind = if self.matches(b'=') { TokenKind::BangEq } else { TokenKind::Bang };
                self.make_token(kind)
            }
            b'.' => {
                if self.matches(b'.') {
                    let kind =
                        if self.matches(b'.') { TokenKind::TriDot } else { TokenKind::Range };
                    self.make_token(kind)
                } else {
                    self.make_token(TokenKind::Dot)
                }
            }
            b'+' => {
                let kind = if self.matches(b'+') {
                    TokenKind::Increment
                } else if self.matches(b'=') {
                    TokenKind::PlusEq
                } else {
                    TokenKind::Plus
                };
                self.make_token(kind)
            }
            b'-' => {
                let kind = if self.matches(b'-') {
                    TokenKind::Decrement
                } else if self.matches(b'=') {
                    TokenKind::MinusEq
                } else {
                    TokenKind::Minus
                };
                self.make_token(kind)
            }
            b'*' => {
                let kind = if self.matches(b'*') {
                    if self.matches(b'=') { TokenKind::PowEq } else { TokenKind::Pow }
                } else if self.matches(b'=') {
                    TokenKind::MultiplyEq
                } else {
                    TokenKind::Multiply
                };
                self.make_token(kind)
            }
            b'/' => {
                let kind = if self.matches(b'/') {
                    if self.matches(b'=') { TokenKind::FloorEq } else { TokenKind::Floor }
                } else if self.matches(b'=') {
                    TokenKind::DivideEq
                } else {
                    TokenKind::Divide
                };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.matches(b'=') { TokenKind::EqualEq } else { TokenKind::Equal };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.matches(b'<') {
                    if self.matches(b'=') { TokenKind::LShiftEq } else { TokenKind::LShift }
                } else if self.matches(b'=') {
                    TokenKind::LessEq
                } else {
                    TokenKind::Less
                };
                self.make_token(kind)
            }
            b'>' => {
                let kind = if self.matches(b'>') {
                    if self.matches(b'=') { TokenKind::RShiftEq } else { TokenKind::RShift }
                } else if self.matches(b'=') {
                    TokenKind::GreaterEq
                } else {
                    TokenKind::Greater
                };
                self.make_token(kind)
            }
            b'%' => {
                let kind =
                    if self.matches(b'=') { TokenKind::PercentEq } else { TokenKind::Percent };
                self.make_token(kind)
            }
            b'&' => {
                let kind = if self.matches(b'=') { TokenKind::AmpEq } else { TokenKind::Amp };
                self.make_token(kind)
            }
            b'|' => {
                let kind = if self.matches(b'=') { TokenKind::BarEq } else { TokenKind::Bar };
                self.make_token(kind)
            }
            b'~' => {
                let kind = if self.matches(b'=') { TokenKind::TildeEq } else { TokenKind::Tilde };
                self.make_token(kind)
            }
            b'^' => {
                let kind = if self.matches(b'=') { TokenKind::XorEq } else { TokenKind::Xor };
                self.make_token(kind)
            }
            b'\n' => self.make_token(TokenKind::Newline),
            b'"' => self.string(b'"'),
            b'\'' => self.string(b'\''),
            _ => self.error_token(format!("unexpected character '{}'", c as char)),
        }
    }

    /// Scans string content until the closing quote or an interpolation
    /// opener. The returned span keeps one delimiter byte at each end.
    fn string(&mut self, quote: u8) -> Token {
        loop {
            if self.is_at_end() {
                return self.error_token("unterminated string (opening quote not matched)");
            }
            let c = self.peek();
            if c == quote && self.previous() != b'\\' {
                break;
            }
            if c == b'$' && self.peek_next() == b'{' && self.previous() != b'\\' {
                if self.interpolating.len() >= MAX_INTERPOLATION_NESTING {
                    return self.error_token("maximum interpolation nesting exceeded");
                }
                self.interpolating.push(quote);
                self.current += 1; // keep the '$' as the trailing delimiter
                let token = self.make_token(TokenKind::Interpolation);
                self.current += 1; // step over '{'
                return token;
            }
            self.advance();
        }
        self.advance(); // the closing quote
        self.make_token(TokenKind::Literal)
    }

    fn number(&mut self) -> Token {
        if self.previous() == b'0' {
            if self.matches(b'b') {
                while matches!(self.peek(), b'0' | b'1') {
                    self.advance();
                }
                return self.make_token(TokenKind::BinNumber);
            }
            if self.matches(b'c') {
                while matches!(self.peek(), b'0'..=b'7') {
                    self.advance();
                }
                return self.make_token(TokenKind::OctNumber);
            }
            if self.matches(b'x') {
                while self.peek().is_ascii_hexdigit() {
                    self.advance();
                }
                return self.make_token(TokenKind::HexNumber);
            }
        }

        while self.peek().is_ascii_digit() {
            self.advance();
        }
        // a dot is part of the number only when a digit follows
        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }
        self.make_token(TokenKind::RegNumber)
    }

    fn identifier(&mut self) -> Token {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.advance();
        }
        let kind = keyword_kind(&self.source[self.start..self.current]);
        self.make_token(kind)
    }
}

fn keyword_kind(word: &str) -> TokenKind {
    match word {
        "and" => TokenKind::And,
        "as" => TokenKind::As,
        "assert" => TokenKind::Assert,
        "break" => TokenKind::Break,
        "catch" => TokenKind::Catch,
        "class" => TokenKind::Class,
        "continue" => TokenKind::Continue,
        "def" => TokenKind::Def,
        "default" => TokenKind::Default,
        "die" => TokenKind::Die,
        "echo" => TokenKind::Echo,
        "else" => TokenKind::Else,
        "empty" => TokenKind::Empty,
        "false" => TokenKind::False,
        "finally" => TokenKind::Finally,
        "for" => TokenKind::For,
        "if" => TokenKind::If,
        "import" => TokenKind::Import,
        "in" => TokenKind::In,
        "iter" => TokenKind::Iter,
        "nil" => TokenKind::Nil,
        "or" => TokenKind::Or,
        "parent" => TokenKind::Parent,
        "return" => TokenKind::Return,
        "self" => TokenKind::SelfKw,
        "static" => TokenKind::Static,
        "true" => TokenKind::True,
        "try" => TokenKind::Try,
        "using" => TokenKind::Using,
        "var" => TokenKind::Var,
        "when" => TokenKind::When,
        "while" => TokenKind::While,
        _ => TokenKind::Identifier,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::Scanner;
    use crate::token::TokenKind;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(source);
        let mut out = Vec::new();
        loop {
            let token = scanner.scan_token();
            let kind = token.kind;
            out.push(kind);
            if kind == TokenKind::Eof || kind == TokenKind::Error {
                break;
            }
        }
        out
    }

    #[test]
    fn scans_compound_operators() {
        assert_eq!(
            kinds("a **= b << 2"),
            vec![
                TokenKind::Identifier,
                TokenKind::PowEq,
                TokenKind::Identifier,
                TokenKind::LShift,
                TokenKind::RegNumber,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn newlines_are_tokens_but_comments_are_not() {
        assert_eq!(
            kinds("1 # comment\n/* block /* nested */ */ 2"),
            vec![TokenKind::RegNumber, TokenKind::Newline, TokenKind::RegNumber, TokenKind::Eof]
        );
    }

    #[test]
    fn number_bases_scan_distinctly() {
        assert_eq!(
            kinds("0b101 0c17 0xff 1.25"),
            vec![
                TokenKind::BinNumber,
                TokenKind::OctNumber,
                TokenKind::HexNumber,
                TokenKind::RegNumber,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn interpolation_splits_the_string() {
        let source = "\"a${x}b\"";
        let mut scanner = Scanner::new(source);
        let first = scanner.scan_token();
        assert_eq!(first.kind, TokenKind::Interpolation);
        assert_eq!(first.lexeme(source), "\"a$");
        let expr = scanner.scan_token();
        assert_eq!(expr.kind, TokenKind::Identifier);
        assert_eq!(expr.lexeme(source), "x");
        let rest = scanner.scan_token();
        assert_eq!(rest.kind, TokenKind::Literal);
        assert_eq!(rest.lexeme(source), "}b\"");
    }

    #[test]
    fn at_names_scan_as_identifiers() {
        let source = "@iter";
        let mut scanner = Scanner::new(source);
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Identifier);
        assert_eq!(token.lexeme(source), "@iter");
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let mut scanner = Scanner::new("\"abc");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Error);
        assert!(scanner.take_error().contains("unterminated"));
    }

    #[test]
    fn lines_advance_inside_block_comments() {
        let mut scanner = Scanner::new("/*\n\n*/x");
        let token = scanner.scan_token();
        assert_eq!(token.kind, TokenKind::Identifier);
        assert_eq!(token.line, 3);
    }
}
