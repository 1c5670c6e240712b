//! Tokenizer for Python source.
//!
//! Produces the token stream the parser in [`super::syntax`] consumes,
//! including synthesized `Newline`, `Indent` and `Dedent` tokens. Replacement
//! fields of f-strings are tokenized recursively so that expressions hidden
//! inside `f"{...}"` are visible to the validator.

use thiserror::Error;

/// Lexical or structural error in a script.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (line {line})")]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, line: usize) -> Self {
        Self {
            message: message.into(),
            line,
        }
    }
}

/// A token plus the 1-based line it starts on.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Name(String),
    Number,
    /// String or bytes literal with escapes decoded.
    Str(String),
    /// Formatted string: literal text plus one token stream per replacement
    /// field, each wrapped in parentheses.
    FString {
        literal: String,
        fields: Vec<Vec<Token>>,
    },
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    EndMarker,
}

const OPS3: &[&str] = &["**=", "//=", ">>=", "<<=", "..."];

const OPS2: &[&str] = &[
    "**", "//", "<<", ">>", "<=", ">=", "==", "!=", "->", ":=", "+=", "-=", "*=", "/=", "%=",
    "&=", "|=", "^=", "@=",
];

const OPS1: &[&str] = &[
    "+", "-", "*", "/", "%", "@", "&", "|", "^", "~", "<", ">", "(", ")", "[", "]", "{", "}",
    ",", ":", ";", ".", "=",
];

const STRING_PREFIXES: &[&str] = &["r", "u", "b", "f", "br", "rb", "fr", "rf"];

const TAB_SIZE: usize = 8;

/// Tokenize a complete module.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source, 1).run()
}

/// Tokenize source whose first line is `first_line` in the enclosing script.
fn tokenize_at(source: &str, first_line: usize) -> Result<Vec<Token>, SyntaxError> {
    Lexer::new(source, first_line).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
    indents: Vec<usize>,
    brackets: Vec<(char, usize)>,
}

impl Lexer {
    fn new(source: &str, first_line: usize) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: first_line,
            tokens: Vec::new(),
            indents: vec![0],
            brackets: Vec::new(),
        }
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind, line: usize) {
        self.tokens.push(Token { kind, line });
    }

    fn run(mut self) -> Result<Vec<Token>, SyntaxError> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.brackets.is_empty() {
                at_line_start = false;
                let width = self.measure_indent();
                match self.peek_at(0) {
                    None => break,
                    Some('#') | Some('\n') | Some('\r') => {
                        self.skip_blank_line();
                        at_line_start = true;
                        continue;
                    }
                    Some(_) => self.handle_indent(width)?,
                }
            }

            let c = self.chars[self.pos];
            match c {
                ' ' | '\t' | '\x0c' | '\r' => self.pos += 1,
                '#' => self.skip_comment(),
                '\n' => {
                    self.pos += 1;
                    if self.brackets.is_empty() {
                        self.push_newline();
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                '\\' => self.line_continuation()?,
                '"' | '\'' => self.lex_string("")?,
                '.' if self.peek_at(1).is_some_and(|n| n.is_ascii_digit()) => self.lex_number(),
                c if c.is_ascii_digit() => self.lex_number(),
                c if is_ident_start(c) => self.lex_name_or_string()?,
                _ => self.lex_op()?,
            }
        }

        self.finish()
    }

    fn measure_indent(&mut self) -> usize {
        let mut width = 0;
        while let Some(c) = self.peek_at(0) {
            match c {
                ' ' => width += 1,
                '\t' => width = (width / TAB_SIZE + 1) * TAB_SIZE,
                '\x0c' => width = 0,
                _ => break,
            }
            self.pos += 1;
        }
        width
    }

    fn handle_indent(&mut self, width: usize) -> Result<(), SyntaxError> {
        let current = self.indents.last().copied().unwrap_or(0);
        if width > current {
            self.indents.push(width);
            self.push(TokenKind::Indent, self.line);
        } else if width < current {
            while self.indents.last().is_some_and(|&level| width < level) {
                self.indents.pop();
                self.push(TokenKind::Dedent, self.line);
            }
            if self.indents.last().copied().unwrap_or(0) != width {
                return Err(SyntaxError::new(
                    "unindent does not match any outer indentation level",
                    self.line,
                ));
            }
        }
        Ok(())
    }

    fn skip_comment(&mut self) {
        while self.peek_at(0).is_some_and(|c| c != '\n') {
            self.pos += 1;
        }
    }

    fn skip_blank_line(&mut self) {
        self.skip_comment();
        if self.peek_at(0) == Some('\n') {
            self.pos += 1;
            self.line += 1;
        }
    }

    fn push_newline(&mut self) {
        let needs_newline = self
            .tokens
            .last()
            .is_some_and(|t| t.kind != TokenKind::Newline);
        if needs_newline {
            self.push(TokenKind::Newline, self.line);
        }
    }

    fn line_continuation(&mut self) -> Result<(), SyntaxError> {
        match (self.peek_at(1), self.peek_at(2)) {
            (Some('\n'), _) => self.pos += 2,
            (Some('\r'), Some('\n')) => self.pos += 3,
            _ => {
                return Err(SyntaxError::new(
                    "unexpected character after line continuation character",
                    self.line,
                ));
            }
        }
        self.line += 1;
        Ok(())
    }

    fn lex_name_or_string(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        while self.peek_at(0).is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        let quote_follows = matches!(self.peek_at(0), Some('"') | Some('\''));
        let lower = name.to_ascii_lowercase();
        if quote_follows && STRING_PREFIXES.contains(&lower.as_str()) {
            return self.lex_string(&lower);
        }

        self.push(TokenKind::Name(name), self.line);
        Ok(())
    }

    fn lex_number(&mut self) {
        let start = self.pos;
        let is_hex = matches!(
            (self.peek_at(0), self.peek_at(1)),
            (Some('0'), Some('x') | Some('X'))
        );
        while let Some(c) = self.peek_at(0) {
            let exponent_sign = (c == '+' || c == '-')
                && !is_hex
                && self.pos > start
                && matches!(self.chars[self.pos - 1], 'e' | 'E');
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.push(TokenKind::Number, self.line);
    }

    fn lex_string(&mut self, prefix: &str) -> Result<(), SyntaxError> {
        let start_line = self.line;
        let quote = self.chars[self.pos];
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        let raw = prefix.contains('r');
        let formatted = prefix.contains('f');
        self.pos += if triple { 3 } else { 1 };

        let mut body = String::new();
        loop {
            let Some(c) = self.peek_at(0) else {
                let message = if triple {
                    "unterminated triple-quoted string literal"
                } else {
                    "unterminated string literal"
                };
                return Err(SyntaxError::new(message, start_line));
            };

            if c == '\\' {
                body.push(c);
                self.pos += 1;
                if let Some(next) = self.peek_at(0) {
                    body.push(next);
                    self.pos += 1;
                    if next == '\n' {
                        self.line += 1;
                    }
                }
                continue;
            }

            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }

            if c == '\n' {
                if !triple {
                    return Err(SyntaxError::new("unterminated string literal", start_line));
                }
                self.line += 1;
            }

            body.push(c);
            self.pos += 1;
        }

        let kind = if formatted {
            let (literal, fields) = split_fstring(&body, raw, start_line)?;
            TokenKind::FString { literal, fields }
        } else if raw {
            TokenKind::Str(body)
        } else {
            TokenKind::Str(unescape(&body))
        };
        self.push(kind, start_line);
        Ok(())
    }

    fn lex_op(&mut self) -> Result<(), SyntaxError> {
        let Some(op) = [OPS3, OPS2, OPS1]
            .iter()
            .flat_map(|table| table.iter())
            .copied()
            .find(|op| self.matches_at(op))
        else {
            let c = self.chars[self.pos];
            return Err(SyntaxError::new(
                format!("invalid character '{c}'"),
                self.line,
            ));
        };

        match op {
            "(" | "[" | "{" => {
                let open = self.chars[self.pos];
                self.brackets.push((open, self.line));
            }
            ")" | "]" | "}" => {
                let close = self.chars[self.pos];
                match self.brackets.pop() {
                    None => {
                        return Err(SyntaxError::new(format!("unmatched '{close}'"), self.line));
                    }
                    Some((open, _)) if closing_for(open) != close => {
                        return Err(SyntaxError::new(
                            format!(
                                "closing parenthesis '{close}' does not match opening parenthesis '{open}'"
                            ),
                            self.line,
                        ));
                    }
                    Some(_) => {}
                }
            }
            _ => {}
        }

        self.pos += op.chars().count();
        self.push(TokenKind::Op(op), self.line);
        Ok(())
    }

    fn matches_at(&self, op: &str) -> bool {
        op.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn finish(mut self) -> Result<Vec<Token>, SyntaxError> {
        if let Some(&(open, line)) = self.brackets.last() {
            return Err(SyntaxError::new(format!("'{open}' was never closed"), line));
        }

        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(TokenKind::Dedent, self.line);
        }
        self.push(TokenKind::EndMarker, self.line);
        Ok(self.tokens)
    }
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

fn closing_for(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Split an f-string body into its literal text and tokenized fields.
fn split_fstring(
    body: &str,
    raw: bool,
    start_line: usize,
) -> Result<(String, Vec<Vec<Token>>), SyntaxError> {
    let chars: Vec<char> = body.chars().collect();
    let mut literal = String::new();
    let mut fields = Vec::new();
    let mut line = start_line;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '{' if chars.get(i + 1) == Some(&'{') => {
                literal.push('{');
                i += 2;
            }
            '{' => i = read_field(&chars, i + 1, &mut line, &mut fields)?,
            '}' if chars.get(i + 1) == Some(&'}') => {
                literal.push('}');
                i += 2;
            }
            '}' => {
                return Err(SyntaxError::new(
                    "f-string: single '}' is not allowed",
                    line,
                ));
            }
            c => {
                if c == '\n' {
                    line += 1;
                }
                literal.push(c);
                i += 1;
            }
        }
    }

    let literal = if raw { literal } else { unescape(&literal) };
    Ok((literal, fields))
}

/// Read one replacement field starting just after its `{`.
///
/// Returns the index just past the closing `}`.
fn read_field(
    chars: &[char],
    start: usize,
    line: &mut usize,
    fields: &mut Vec<Vec<Token>>,
) -> Result<usize, SyntaxError> {
    let field_line = *line;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut i = start;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            if c == '\\' {
                i += 2;
                continue;
            }
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        let prev = if i > start { chars.get(i - 1).copied() } else { None };
        let next = chars.get(i + 1).copied();
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' if depth > 0 => depth -= 1,
            '}' => break,
            '!' if depth == 0 && next != Some('=') => break,
            ':' if depth == 0 => break,
            '=' if depth == 0
                && next != Some('=')
                && !matches!(prev, Some('=' | '!' | '<' | '>')) =>
            {
                break;
            }
            '\n' => *line += 1,
            _ => {}
        }
        i += 1;
    }

    if i >= chars.len() {
        return Err(SyntaxError::new("f-string: expecting '}'", field_line));
    }

    let expr: String = chars[start..i].iter().collect();
    if expr.trim().is_empty() {
        return Err(SyntaxError::new(
            "f-string: empty expression not allowed",
            field_line,
        ));
    }

    let mut tokens = tokenize_at(&format!("({expr})"), field_line)?;
    tokens.retain(|t| !matches!(t.kind, TokenKind::Newline | TokenKind::EndMarker));
    fields.push(tokens);

    if chars.get(i) == Some(&'=') {
        i += 1;
    }
    if chars.get(i) == Some(&'!') {
        i += 1;
        while i < chars.len() && chars[i] != ':' && chars[i] != '}' {
            i += 1;
        }
    }
    if chars.get(i) == Some(&':') {
        i += 1;
        loop {
            match chars.get(i) {
                None | Some('}') => break,
                Some('{') => i = read_field(chars, i + 1, line, fields)?,
                Some(c) => {
                    if *c == '\n' {
                        *line += 1;
                    }
                    i += 1;
                }
            }
        }
    }

    if chars.get(i) != Some(&'}') {
        return Err(SyntaxError::new("f-string: expecting '}'", field_line));
    }
    Ok(i + 1)
}

/// Decode backslash escapes of a non-raw literal.
fn unescape(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(esc) = chars.next() else {
            out.push('\\');
            break;
        };
        match esc {
            '\n' => {}
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'v' => out.push('\x0b'),
            '\\' | '\'' | '"' => out.push(esc),
            'x' | 'u' | 'U' => {
                let width = match esc {
                    'x' => 2,
                    'u' => 4,
                    _ => 8,
                };
                let digits: String = (0..width).filter_map(|_| chars.next_if(|d| d.is_ascii_hexdigit())).collect();
                match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if digits.len() == width => out.push(decoded),
                    _ => {
                        out.push('\\');
                        out.push(esc);
                        out.push_str(&digits);
                    }
                }
            }
            '0'..='7' => {
                let mut digits = String::from(esc);
                while digits.len() < 3 {
                    match chars.next_if(|d| matches!(d, '0'..='7')) {
                        Some(d) => digits.push(d),
                        None => break,
                    }
                }
                match u32::from_str_radix(&digits, 8).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => out.push_str(&digits),
                }
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }

    out
}
