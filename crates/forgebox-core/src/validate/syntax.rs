//! Syntax tree for Python scripts.
//!
//! The tree keeps exactly what policy checks need: import statements, the
//! names each statement binds, and the expressions it evaluates, reduced to
//! names, attribute chains, calls, subscripts and literals. Operators and
//! control-flow keywords are dropped.

use std::collections::HashSet;

use super::lexer::{SyntaxError, Token, TokenKind, tokenize};

/// Python hard keywords.
pub const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

const COMPOUND_KEYWORDS: &[&str] = &[
    "if", "elif", "else", "while", "for", "try", "except", "finally", "with", "def", "class",
    "async",
];

const SOFT_COMPOUND_KEYWORDS: &[&str] = &["match", "case"];

const AUGMENTED_OPS: &[&str] = &[
    "+=", "-=", "*=", "/=", "//=", "%=", "@=", "&=", "|=", "^=", ">>=", "<<=", "**=",
];

pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

/// A parsed script.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub body: Vec<Stmt>,
}

/// `name [as asname]` in an import statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alias {
    pub name: String,
    pub asname: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefKind {
    Function,
    Class,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `import a.b [as c], ...`
    Import { names: Vec<Alias>, line: usize },
    /// `from [.]module import name [as alias], ...`
    ImportFrom {
        module: Option<String>,
        level: usize,
        names: Vec<Alias>,
        line: usize,
    },
    /// Function or class header. `header` holds the expressions the
    /// header evaluates: parameter annotations and defaults, the return
    /// annotation, and base-class and keyword arguments of a class.
    Def {
        kind: DefKind,
        name: String,
        params: Vec<String>,
        header: Vec<Expr>,
        line: usize,
    },
    /// Any other statement, reduced to the names it binds and the
    /// expressions it evaluates.
    Simple {
        bindings: Vec<String>,
        exprs: Vec<Expr>,
        line: usize,
    },
    /// A block-introducing statement and its body.
    Compound {
        header: Box<Stmt>,
        body: Vec<Stmt>,
        line: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Name {
        id: String,
        line: usize,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
        line: usize,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        line: usize,
    },
    Subscript {
        value: Box<Expr>,
        index: Vec<Expr>,
        line: usize,
    },
    /// Number (`value: None`) or string literal.
    Literal {
        value: Option<String>,
        line: usize,
    },
    /// Parenthesized, list, set or dict display.
    Collection {
        items: Vec<Expr>,
        line: usize,
    },
    FormattedString {
        literal: String,
        values: Vec<Expr>,
        line: usize,
    },
}

impl Expr {
    pub fn line(&self) -> usize {
        match self {
            Expr::Name { line, .. }
            | Expr::Attribute { line, .. }
            | Expr::Call { line, .. }
            | Expr::Subscript { line, .. }
            | Expr::Literal { line, .. }
            | Expr::Collection { line, .. }
            | Expr::FormattedString { line, .. } => *line,
        }
    }
}

/// Parse a complete script.
pub fn parse(source: &str) -> Result<Module, SyntaxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let body = parser.parse_block(false)?;
    Ok(Module { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_block(&mut self, nested: bool) -> Result<Vec<Stmt>, SyntaxError> {
        let mut body = Vec::new();
        while let Some(token) = self.peek() {
            match token.kind {
                TokenKind::EndMarker => break,
                TokenKind::Dedent => {
                    self.pos += 1;
                    if nested {
                        break;
                    }
                }
                TokenKind::Indent => {
                    return Err(SyntaxError::new("unexpected indent", token.line));
                }
                TokenKind::Newline => self.pos += 1,
                _ => body.extend(self.parse_line()?),
            }
        }
        Ok(body)
    }

    fn parse_line(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|t| !matches!(t.kind, TokenKind::Newline | TokenKind::EndMarker))
        {
            self.pos += 1;
        }
        let tokens = self.tokens[start..self.pos].to_vec();
        if self.peek().is_some_and(|t| t.kind == TokenKind::Newline) {
            self.pos += 1;
        }

        if !starts_compound(&tokens) {
            return split_top_level(&tokens, ";")
                .into_iter()
                .filter(|segment| !segment.is_empty())
                .map(parse_simple)
                .collect();
        }

        let line = tokens[0].line;
        let Some(colon) = find_top_level(&tokens, ":") else {
            return Err(SyntaxError::new("expected ':'", line));
        };
        let header = parse_header(&tokens[..colon])?;
        let inline = &tokens[colon + 1..];

        let body = if inline.is_empty() {
            match self.peek() {
                Some(Token {
                    kind: TokenKind::Indent,
                    ..
                }) => {
                    self.pos += 1;
                    self.parse_block(true)?
                }
                next => {
                    let at = next.map_or(line, |t| t.line);
                    return Err(SyntaxError::new("expected an indented block", at));
                }
            }
        } else {
            split_top_level(inline, ";")
                .into_iter()
                .filter(|segment| !segment.is_empty())
                .map(parse_simple)
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(vec![Stmt::Compound {
            header: Box::new(header),
            body,
            line,
        }])
    }
}

fn first_name(tokens: &[Token]) -> Option<&str> {
    match tokens.first().map(|t| &t.kind) {
        Some(TokenKind::Name(name)) => Some(name.as_str()),
        _ => None,
    }
}

fn starts_compound(tokens: &[Token]) -> bool {
    match first_name(tokens) {
        Some(name) if COMPOUND_KEYWORDS.contains(&name) => true,
        Some(name) if SOFT_COMPOUND_KEYWORDS.contains(&name) => {
            tokens.len() > 2 && tokens.last().is_some_and(|t| t.kind == TokenKind::Op(":"))
        }
        _ => false,
    }
}

/// Indices of `op` at bracket depth zero, ignoring colons and defaults that
/// belong to a `lambda`.
fn top_level_positions(tokens: &[Token], op: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut depth = 0usize;
    let mut lambdas = 0usize;

    for (i, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::Op("(" | "[" | "{") => depth += 1,
            TokenKind::Op(")" | "]" | "}") => depth = depth.saturating_sub(1),
            TokenKind::Name(name) if depth == 0 && name == "lambda" => lambdas += 1,
            TokenKind::Op(":") if depth == 0 && lambdas > 0 => lambdas -= 1,
            TokenKind::Op(found) if depth == 0 && lambdas == 0 && *found == op => {
                positions.push(i)
            }
            _ => {}
        }
    }

    positions
}

fn find_top_level(tokens: &[Token], op: &str) -> Option<usize> {
    top_level_positions(tokens, op).first().copied()
}

fn split_top_level<'t>(tokens: &'t [Token], op: &str) -> Vec<&'t [Token]> {
    let mut segments = Vec::new();
    let mut start = 0;
    for at in top_level_positions(tokens, op) {
        segments.push(&tokens[start..at]);
        start = at + 1;
    }
    segments.push(&tokens[start..]);
    segments
}

fn parse_header(tokens: &[Token]) -> Result<Stmt, SyntaxError> {
    let tokens = match first_name(tokens) {
        Some("async") => &tokens[1..],
        _ => tokens,
    };
    let line = tokens.first().map_or(0, |t| t.line);

    match first_name(tokens) {
        Some("def") => parse_def(tokens, DefKind::Function),
        Some("class") => parse_def(tokens, DefKind::Class),
        _ => {
            let mut bindings = Vec::new();
            let exprs = parse_exprs(tokens, false, &HashSet::new(), &mut bindings)?;
            Ok(Stmt::Simple {
                bindings,
                exprs,
                line,
            })
        }
    }
}

fn parse_def(tokens: &[Token], kind: DefKind) -> Result<Stmt, SyntaxError> {
    let line = tokens[0].line;
    let name = match tokens.get(1).map(|t| &t.kind) {
        Some(TokenKind::Name(name)) if !is_keyword(name) => name.clone(),
        _ => return Err(SyntaxError::new("invalid syntax", line)),
    };

    let mut params = Vec::new();
    let mut header = Vec::new();
    let mut bindings = Vec::new();
    let mut rest = &tokens[2..];

    if rest.first().is_some_and(|t| t.kind == TokenKind::Op("(")) {
        let close = matching_close(rest, 0)?;
        let inner = &rest[1..close];
        let positions = if kind == DefKind::Function {
            parameter_positions(inner)
        } else {
            HashSet::new()
        };
        let mut ordered: Vec<usize> = positions.iter().copied().collect();
        ordered.sort_unstable();
        for at in ordered {
            if let TokenKind::Name(param) = &inner[at].kind {
                params.push(param.clone());
            }
        }
        header.extend(parse_exprs(inner, true, &positions, &mut bindings)?);
        rest = &rest[close + 1..];
    } else if kind == DefKind::Function {
        return Err(SyntaxError::new("invalid syntax", line));
    }

    match rest.first().map(|t| &t.kind) {
        None => {}
        Some(TokenKind::Op("->")) if kind == DefKind::Function => {
            header.extend(parse_exprs(&rest[1..], false, &HashSet::new(), &mut bindings)?);
        }
        Some(_) => return Err(SyntaxError::new("invalid syntax", rest[0].line)),
    }

    for binding in bindings {
        if !params.contains(&binding) {
            params.push(binding);
        }
    }
    Ok(Stmt::Def {
        kind,
        name,
        params,
        header,
        line,
    })
}

/// Positions of parameter names inside a `def` parameter list.
fn parameter_positions(inner: &[Token]) -> HashSet<usize> {
    let mut positions = HashSet::new();
    let mut depth = 0usize;
    let mut expect_name = true;

    for (i, token) in inner.iter().enumerate() {
        match &token.kind {
            TokenKind::Op("(" | "[" | "{") => {
                depth += 1;
                expect_name = false;
            }
            TokenKind::Op(")" | "]" | "}") => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            TokenKind::Op(",") => expect_name = true,
            TokenKind::Op("*" | "**" | "/") => {}
            TokenKind::Name(name) if expect_name && !is_keyword(name) => {
                positions.insert(i);
                expect_name = false;
            }
            _ => expect_name = false,
        }
    }

    positions
}

fn parse_simple(tokens: &[Token]) -> Result<Stmt, SyntaxError> {
    let line = tokens[0].line;
    match first_name(tokens) {
        Some("import") => parse_import(tokens),
        Some("from") => parse_from(tokens),
        Some("global" | "nonlocal") => {
            let bindings = tokens[1..]
                .iter()
                .filter_map(|t| match &t.kind {
                    TokenKind::Name(name) => Some(name.clone()),
                    _ => None,
                })
                .collect();
            Ok(Stmt::Simple {
                bindings,
                exprs: Vec::new(),
                line,
            })
        }
        Some(name) if COMPOUND_KEYWORDS.contains(&name) => {
            Err(SyntaxError::new("invalid syntax", line))
        }
        _ => parse_assignment(tokens),
    }
}

fn parse_assignment(tokens: &[Token]) -> Result<Stmt, SyntaxError> {
    let line = tokens[0].line;
    let mut bindings = Vec::new();
    let mut exprs = Vec::new();
    let none = HashSet::new();

    let augmented = AUGMENTED_OPS
        .iter()
        .filter_map(|op| find_top_level(tokens, op))
        .min();
    let starts_with_keyword = first_name(tokens).is_some_and(is_keyword);

    let (targets, values): (Vec<&[Token]>, Vec<&[Token]>) = if let Some(at) = augmented {
        (vec![&tokens[..at]], vec![&tokens[at + 1..]])
    } else if let Some(colon) = find_top_level(tokens, ":").filter(|_| !starts_with_keyword) {
        let mut values = split_top_level(&tokens[colon + 1..], "=");
        values.retain(|segment| !segment.is_empty());
        (vec![&tokens[..colon]], values)
    } else {
        let mut parts = split_top_level(tokens, "=");
        let value = parts.pop().unwrap_or_default();
        (parts, vec![value])
    };

    for target in targets {
        for expr in parse_exprs(target, false, &none, &mut bindings)? {
            bind_target(expr, &mut bindings, &mut exprs);
        }
    }
    for value in values {
        exprs.extend(parse_exprs(value, false, &none, &mut bindings)?);
    }

    Ok(Stmt::Simple {
        bindings,
        exprs,
        line,
    })
}

/// Split an assignment target into bound names and evaluated expressions.
fn bind_target(target: Expr, bindings: &mut Vec<String>, exprs: &mut Vec<Expr>) {
    match target {
        Expr::Name { id, .. } => bindings.push(id),
        Expr::Collection { items, .. } => {
            for item in items {
                bind_target(item, bindings, exprs);
            }
        }
        other => exprs.push(other),
    }
}

fn parse_import(tokens: &[Token]) -> Result<Stmt, SyntaxError> {
    let line = tokens[0].line;
    let mut names = Vec::new();
    for segment in split_top_level(&tokens[1..], ",") {
        names.push(parse_alias(segment, line)?);
    }
    Ok(Stmt::Import { names, line })
}

fn parse_from(tokens: &[Token]) -> Result<Stmt, SyntaxError> {
    let line = tokens[0].line;
    let mut i = 1;
    let mut level = 0;
    while let Some(token) = tokens.get(i) {
        match token.kind {
            TokenKind::Op(".") => level += 1,
            TokenKind::Op("...") => level += 3,
            _ => break,
        }
        i += 1;
    }

    let import_at = tokens[i..]
        .iter()
        .position(|t| matches!(&t.kind, TokenKind::Name(n) if n == "import"))
        .map(|p| p + i)
        .ok_or_else(|| SyntaxError::new("invalid syntax: expected 'import'", line))?;

    let module = if import_at > i {
        Some(dotted_name(&tokens[i..import_at], line)?)
    } else if level == 0 {
        return Err(SyntaxError::new("invalid syntax: expected module name", line));
    } else {
        None
    };

    let mut rest = &tokens[import_at + 1..];
    let parenthesized = rest.first().is_some_and(|t| t.kind == TokenKind::Op("("))
        && rest.last().is_some_and(|t| t.kind == TokenKind::Op(")"));
    if parenthesized {
        rest = &rest[1..rest.len() - 1];
    }

    let mut names = Vec::new();
    if rest.len() == 1 && rest[0].kind == TokenKind::Op("*") {
        names.push(Alias {
            name: "*".to_string(),
            asname: None,
        });
    } else {
        let segments = split_top_level(rest, ",");
        let last = segments.len().saturating_sub(1);
        for (n, segment) in segments.into_iter().enumerate() {
            if segment.is_empty() && parenthesized && n == last && n > 0 {
                continue;
            }
            let alias = parse_alias(segment, line)?;
            if alias.name.contains('.') {
                return Err(SyntaxError::new("invalid syntax in import", line));
            }
            names.push(alias);
        }
    }

    Ok(Stmt::ImportFrom {
        module,
        level,
        names,
        line,
    })
}

fn parse_alias(tokens: &[Token], line: usize) -> Result<Alias, SyntaxError> {
    let as_at = tokens
        .iter()
        .position(|t| matches!(&t.kind, TokenKind::Name(n) if n == "as"));

    let (name_tokens, asname) = match as_at {
        Some(at) => match &tokens[at + 1..] {
            [
                Token {
                    kind: TokenKind::Name(alias),
                    ..
                },
            ] if !is_keyword(alias) => (&tokens[..at], Some(alias.clone())),
            _ => return Err(SyntaxError::new("invalid syntax in import", line)),
        },
        None => (tokens, None),
    };

    Ok(Alias {
        name: dotted_name(name_tokens, line)?,
        asname,
    })
}

fn dotted_name(tokens: &[Token], line: usize) -> Result<String, SyntaxError> {
    let mut name = String::new();
    let mut expect_name = true;
    for token in tokens {
        match (&token.kind, expect_name) {
            (TokenKind::Name(part), true) if !is_keyword(part) => {
                name.push_str(part);
                expect_name = false;
            }
            (TokenKind::Op("."), false) => {
                name.push('.');
                expect_name = true;
            }
            _ => return Err(SyntaxError::new("invalid syntax in import", token.line)),
        }
    }
    if expect_name {
        return Err(SyntaxError::new("invalid syntax in import", line));
    }
    Ok(name)
}

fn matching_close(tokens: &[Token], open: usize) -> Result<usize, SyntaxError> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::Op("(" | "[" | "{") => depth += 1,
            TokenKind::Op(")" | "]" | "}") => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => {}
        }
    }
    Err(SyntaxError::new(
        "bracket was never closed",
        tokens[open].line,
    ))
}

/// Positions of names that an expression binds rather than reads:
/// `lambda` parameters, `for` targets, `as` targets and walrus targets.
fn binding_positions(tokens: &[Token]) -> HashSet<usize> {
    let mut positions = HashSet::new();

    for (i, token) in tokens.iter().enumerate() {
        let TokenKind::Name(name) = &token.kind else {
            continue;
        };
        match name.as_str() {
            "lambda" => {
                let mut depth = 0usize;
                let mut expect_name = true;
                for (j, next) in tokens.iter().enumerate().skip(i + 1) {
                    match &next.kind {
                        TokenKind::Op("(" | "[" | "{") => depth += 1,
                        TokenKind::Op(")" | "]" | "}") if depth == 0 => break,
                        TokenKind::Op(")" | "]" | "}") => depth -= 1,
                        _ if depth > 0 => {}
                        TokenKind::Op(":") => break,
                        TokenKind::Op(",") => expect_name = true,
                        TokenKind::Op("*" | "**" | "/") => {}
                        TokenKind::Name(param) if expect_name && !is_keyword(param) => {
                            positions.insert(j);
                            expect_name = false;
                        }
                        _ => expect_name = false,
                    }
                }
            }
            "for" => {
                let mut depth = 0usize;
                for (j, next) in tokens.iter().enumerate().skip(i + 1) {
                    match &next.kind {
                        TokenKind::Op("(" | "[" | "{") => depth += 1,
                        TokenKind::Op(")" | "]" | "}") if depth == 0 => break,
                        TokenKind::Op(")" | "]" | "}") => depth -= 1,
                        TokenKind::Name(n) if n == "in" && depth == 0 => break,
                        TokenKind::Name(n) if !is_keyword(n) => {
                            let after = tokens.get(j + 1).map(|t| &t.kind);
                            let before = tokens.get(j - 1).map(|t| &t.kind);
                            let is_trailer_base =
                                matches!(after, Some(TokenKind::Op("." | "(" | "[")));
                            let is_attribute = matches!(before, Some(TokenKind::Op(".")));
                            if !is_trailer_base && !is_attribute {
                                positions.insert(j);
                            }
                        }
                        _ => {}
                    }
                }
            }
            "as" => {
                let target_follows = matches!(
                    tokens.get(i + 1).map(|t| &t.kind),
                    Some(TokenKind::Name(target)) if !is_keyword(target)
                );
                if target_follows {
                    positions.insert(i + 1);
                }
            }
            _ => {
                if tokens
                    .get(i + 1)
                    .is_some_and(|t| t.kind == TokenKind::Op(":="))
                {
                    positions.insert(i);
                }
            }
        }
    }

    positions
}

fn is_keyword_argument(tokens: &[Token], i: usize) -> bool {
    let followed_by_assign = tokens
        .get(i + 1)
        .is_some_and(|t| t.kind == TokenKind::Op("="));
    let starts_argument = i == 0 || matches!(tokens[i - 1].kind, TokenKind::Op("," | "("));
    followed_by_assign && starts_argument
}

/// Parse a run of tokens into the expressions it evaluates.
///
/// `nested` is true inside brackets, where `name=` introduces a keyword
/// argument. Names at `preset` positions are bindings, as are the targets
/// found by [`binding_positions`].
fn parse_exprs(
    tokens: &[Token],
    nested: bool,
    preset: &HashSet<usize>,
    bindings: &mut Vec<String>,
) -> Result<Vec<Expr>, SyntaxError> {
    let mut binders = binding_positions(tokens);
    binders.extend(preset.iter().copied());

    let mut exprs = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        match &token.kind {
            TokenKind::Name(id) if binders.contains(&i) => {
                bindings.push(id.clone());
                i += 1;
            }
            TokenKind::Name(id) if is_keyword(id) => i += 1,
            TokenKind::Name(_) if nested && is_keyword_argument(tokens, i) => i += 1,
            TokenKind::Op("(" | "[" | "{")
            | TokenKind::Name(_)
            | TokenKind::Number
            | TokenKind::Str(_)
            | TokenKind::FString { .. } => {
                let (expr, next) = parse_atom(tokens, i, bindings)?;
                exprs.push(expr);
                i = next;
            }
            TokenKind::Op(".") => {
                return Err(SyntaxError::new("invalid syntax", token.line));
            }
            _ => i += 1,
        }
    }

    Ok(exprs)
}

fn parse_atom(
    tokens: &[Token],
    start: usize,
    bindings: &mut Vec<String>,
) -> Result<(Expr, usize), SyntaxError> {
    let line = tokens[start].line;
    let none = HashSet::new();

    let (mut expr, mut i) = match &tokens[start].kind {
        TokenKind::Name(id) => (
            Expr::Name {
                id: id.clone(),
                line,
            },
            start + 1,
        ),
        TokenKind::Number => (Expr::Literal { value: None, line }, start + 1),
        TokenKind::Str(_) | TokenKind::FString { .. } => {
            // Adjacent literals concatenate.
            let mut literal = String::new();
            let mut values = Vec::new();
            let mut formatted = false;
            let mut i = start;
            while let Some(token) = tokens.get(i) {
                match &token.kind {
                    TokenKind::Str(text) => literal.push_str(text),
                    TokenKind::FString {
                        literal: text,
                        fields,
                    } => {
                        formatted = true;
                        literal.push_str(text);
                        for field in fields {
                            values.extend(parse_exprs(field, false, &none, bindings)?);
                        }
                    }
                    _ => break,
                }
                i += 1;
            }
            let expr = if formatted {
                Expr::FormattedString {
                    literal,
                    values,
                    line,
                }
            } else {
                Expr::Literal {
                    value: Some(literal),
                    line,
                }
            };
            (expr, i)
        }
        TokenKind::Op("(" | "[" | "{") => {
            let close = matching_close(tokens, start)?;
            let items = parse_exprs(&tokens[start + 1..close], true, &none, bindings)?;
            (Expr::Collection { items, line }, close + 1)
        }
        _ => return Err(SyntaxError::new("invalid syntax", line)),
    };

    loop {
        match tokens.get(i).map(|t| &t.kind) {
            Some(TokenKind::Op(".")) => match tokens.get(i + 1) {
                Some(Token {
                    kind: TokenKind::Name(attr),
                    line,
                }) => {
                    expr = Expr::Attribute {
                        value: Box::new(expr),
                        attr: attr.clone(),
                        line: *line,
                    };
                    i += 2;
                }
                _ => {
                    return Err(SyntaxError::new(
                        "invalid syntax: expected attribute name after '.'",
                        tokens[i].line,
                    ));
                }
            },
            Some(TokenKind::Op("(")) => {
                let close = matching_close(tokens, i)?;
                let args = parse_exprs(&tokens[i + 1..close], true, &none, bindings)?;
                expr = Expr::Call {
                    func: Box::new(expr),
                    args,
                    line: tokens[i].line,
                };
                i = close + 1;
            }
            Some(TokenKind::Op("[")) => {
                let close = matching_close(tokens, i)?;
                let index = parse_exprs(&tokens[i + 1..close], true, &none, bindings)?;
                expr = Expr::Subscript {
                    value: Box::new(expr),
                    index,
                    line: tokens[i].line,
                };
                i = close + 1;
            }
            _ => break,
        }
    }

    Ok((expr, i))
}

/// Tree traversal in the style of `syn::visit`.
///
/// Override a `visit_*` method to intercept a node; call the matching
/// `walk_*` function to continue into its children.
pub trait Visit {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

pub fn walk_module<V: Visit + ?Sized>(visitor: &mut V, module: &Module) {
    for stmt in &module.body {
        visitor.visit_stmt(stmt);
    }
}

pub fn walk_stmt<V: Visit + ?Sized>(visitor: &mut V, stmt: &Stmt) {
    match stmt {
        Stmt::Import { .. } | Stmt::ImportFrom { .. } => {}
        Stmt::Def { header, .. } => {
            for expr in header {
                visitor.visit_expr(expr);
            }
        }
        Stmt::Simple { exprs, .. } => {
            for expr in exprs {
                visitor.visit_expr(expr);
            }
        }
        Stmt::Compound { header, body, .. } => {
            visitor.visit_stmt(header);
            for stmt in body {
                visitor.visit_stmt(stmt);
            }
        }
    }
}

pub fn walk_expr<V: Visit + ?Sized>(visitor: &mut V, expr: &Expr) {
    match expr {
        Expr::Name { .. } | Expr::Literal { .. } => {}
        Expr::Attribute { value, .. } => visitor.visit_expr(value),
        Expr::Call { func, args, .. } => {
            visitor.visit_expr(func);
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        Expr::Subscript { value, index, .. } => {
            visitor.visit_expr(value);
            for item in index {
                visitor.visit_expr(item);
            }
        }
        Expr::Collection { items, .. } => {
            for item in items {
                visitor.visit_expr(item);
            }
        }
        Expr::FormattedString { values, .. } => {
            for value in values {
                visitor.visit_expr(value);
            }
        }
    }
}
