//! # Operation Resolution
//!
//! Resolves the subscription name from the operation document carried by a
//! `start` frame. This is not a general document parser: it recognizes just
//! enough structure to select one operation, reject anything that is not a
//! single subscription selection, and return the root field name. Argument
//! lists, directives, and nested selection sets are skipped by balancing.

use super::errors::{SchemaError, SchemaResult};

/// The resolved subscription selection of a `start` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionOperation {
    /// Root field name, i.e. the declared subscription name
    pub field: String,
}

/// Resolve the single subscription selection of an operation document.
///
/// When the document declares several operations, `operation_name` selects
/// one; a document with exactly one operation needs none.
pub fn parse_subscription(
    query: &str,
    operation_name: Option<&str>,
) -> SchemaResult<SubscriptionOperation> {
    let tokens = tokenize(query)?;
    let operations = parse_document(&tokens)?;

    if operations.is_empty() {
        return Err(SchemaError::InvalidOperation(
            "document contains no operation".to_string(),
        ));
    }

    let operation = match operation_name {
        Some(wanted) => operations
            .iter()
            .find(|op| op.name.as_deref() == Some(wanted))
            .ok_or_else(|| {
                SchemaError::InvalidOperation(format!("operation '{}' not found", wanted))
            })?,
        None => {
            if operations.len() > 1 {
                return Err(SchemaError::InvalidOperation(
                    "document contains multiple operations; operationName is required"
                        .to_string(),
                ));
            }
            &operations[0]
        }
    };

    if operation.kind != OperationKind::Subscription {
        return Err(SchemaError::InvalidOperation(
            "operation is not a subscription".to_string(),
        ));
    }

    match operation.roots.as_slice() {
        [field] => Ok(SubscriptionOperation {
            field: field.clone(),
        }),
        _ => Err(SchemaError::InvalidOperation(
            "subscription must select exactly one root field".to_string(),
        )),
    }
}

// =============================================================================
// Tokenizer
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Identifier or keyword
    Name(String),
    /// Single punctuator
    Punct(char),
    /// Fragment spread `...`
    Spread,
    /// String or number literal; content is irrelevant here
    Scalar,
}

fn tokenize(src: &str) -> SchemaResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            _ if c.is_whitespace() || c == ',' => {
                chars.next();
            }
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '"' => {
                read_string(&mut chars)?;
                tokens.push(Token::Scalar);
            }
            '.' => {
                chars.next();
                if chars.next() != Some('.') || chars.next() != Some('.') {
                    return Err(SchemaError::InvalidOperation(
                        "unexpected '.' in document".to_string(),
                    ));
                }
                tokens.push(Token::Spread);
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        name.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Name(name));
            }
            _ if c.is_ascii_digit() || c == '-' => {
                chars.next();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '.' || c == '+' || c == '-' {
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Scalar);
            }
            '{' | '}' | '(' | ')' | '[' | ']' | ':' | '$' | '@' | '=' | '!' | '|' | '&' => {
                chars.next();
                tokens.push(Token::Punct(c));
            }
            _ => {
                return Err(SchemaError::InvalidOperation(format!(
                    "unexpected character '{}' in document",
                    c
                )));
            }
        }
    }

    Ok(tokens)
}

/// Consume a string literal, including the `"""` block form.
fn read_string(chars: &mut std::iter::Peekable<std::str::Chars>) -> SchemaResult<()> {
    chars.next(); // opening quote

    // Block string: two more quotes follow the opener.
    if chars.peek() == Some(&'"') {
        chars.next();
        if chars.peek() == Some(&'"') {
            chars.next();
            let mut run = 0;
            for c in chars.by_ref() {
                if c == '"' {
                    run += 1;
                    if run == 3 {
                        return Ok(());
                    }
                } else {
                    run = 0;
                }
            }
            return Err(SchemaError::InvalidOperation(
                "unterminated block string".to_string(),
            ));
        }
        // Empty string `""`.
        return Ok(());
    }

    let mut escaped = false;
    for c in chars.by_ref() {
        if escaped {
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == '"' {
            return Ok(());
        }
    }
    Err(SchemaError::InvalidOperation(
        "unterminated string".to_string(),
    ))
}

// =============================================================================
// Document structure
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

#[derive(Debug)]
struct Operation {
    kind: OperationKind,
    name: Option<String>,
    roots: Vec<String>,
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.pos);
        self.pos += 1;
        t
    }

    fn eat_punct(&mut self, c: char) -> bool {
        if self.peek() == Some(&Token::Punct(c)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Skip past a balanced `open`..`close` region, cursor on `open`.
    fn skip_balanced(&mut self, open: char, close: char) -> SchemaResult<()> {
        let mut depth = 0usize;
        while let Some(token) = self.next() {
            match token {
                Token::Punct(c) if *c == open => depth += 1,
                Token::Punct(c) if *c == close => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
        Err(SchemaError::InvalidOperation(format!(
            "unbalanced '{}' in document",
            open
        )))
    }

    /// Skip zero or more directives (`@name` with optional arguments).
    fn skip_directives(&mut self) -> SchemaResult<()> {
        while self.eat_punct('@') {
            match self.next() {
                Some(Token::Name(_)) => {}
                _ => {
                    return Err(SchemaError::InvalidOperation(
                        "expected directive name after '@'".to_string(),
                    ))
                }
            }
            if self.peek() == Some(&Token::Punct('(')) {
                self.skip_balanced('(', ')')?;
            }
        }
        Ok(())
    }
}

fn parse_document(tokens: &[Token]) -> SchemaResult<Vec<Operation>> {
    let mut cursor = Cursor { tokens, pos: 0 };
    let mut operations = Vec::new();

    while let Some(token) = cursor.peek() {
        match token {
            // Shorthand `{ ... }` is an anonymous query.
            Token::Punct('{') => {
                let roots = parse_root_selections(&mut cursor)?;
                operations.push(Operation {
                    kind: OperationKind::Query,
                    name: None,
                    roots,
                });
            }
            Token::Name(word) if word == "fragment" => {
                cursor.next();
                skip_fragment(&mut cursor)?;
            }
            Token::Name(word) => {
                let kind = match word.as_str() {
                    "query" => OperationKind::Query,
                    "mutation" => OperationKind::Mutation,
                    "subscription" => OperationKind::Subscription,
                    other => {
                        return Err(SchemaError::InvalidOperation(format!(
                            "expected operation type, found '{}'",
                            other
                        )))
                    }
                };
                cursor.next();

                let name = match cursor.peek() {
                    Some(Token::Name(n)) => {
                        let n = n.clone();
                        cursor.next();
                        Some(n)
                    }
                    _ => None,
                };

                if cursor.peek() == Some(&Token::Punct('(')) {
                    cursor.skip_balanced('(', ')')?;
                }
                cursor.skip_directives()?;

                let roots = parse_root_selections(&mut cursor)?;
                operations.push(Operation { kind, name, roots });
            }
            other => {
                return Err(SchemaError::InvalidOperation(format!(
                    "unexpected token {:?} at document top level",
                    other
                )));
            }
        }
    }

    Ok(operations)
}

/// Parse the top-level fields of a selection set, cursor on `{`.
fn parse_root_selections(cursor: &mut Cursor) -> SchemaResult<Vec<String>> {
    if !cursor.eat_punct('{') {
        return Err(SchemaError::InvalidOperation(
            "expected selection set".to_string(),
        ));
    }

    let mut roots = Vec::new();
    loop {
        match cursor.next() {
            Some(Token::Punct('}')) => return Ok(roots),
            Some(Token::Spread) => {
                return Err(SchemaError::InvalidOperation(
                    "fragment spreads are not supported at the subscription root".to_string(),
                ));
            }
            Some(Token::Name(first)) => {
                // For `alias: field`, the second name is the schema field.
                let field = if cursor.eat_punct(':') {
                    match cursor.next() {
                        Some(Token::Name(n)) => n.clone(),
                        _ => {
                            return Err(SchemaError::InvalidOperation(
                                "expected field name after alias".to_string(),
                            ))
                        }
                    }
                } else {
                    first.clone()
                };

                if cursor.peek() == Some(&Token::Punct('(')) {
                    cursor.skip_balanced('(', ')')?;
                }
                cursor.skip_directives()?;
                if cursor.peek() == Some(&Token::Punct('{')) {
                    cursor.skip_balanced('{', '}')?;
                }

                roots.push(field);
            }
            other => {
                return Err(SchemaError::InvalidOperation(format!(
                    "unexpected token {:?} in selection set",
                    other
                )));
            }
        }
    }
}

/// Skip a fragment definition, cursor past the `fragment` keyword.
fn skip_fragment(cursor: &mut Cursor) -> SchemaResult<()> {
    // fragment Name on Type [directives] { ... }
    while let Some(token) = cursor.peek() {
        if token == &Token::Punct('{') {
            return cursor.skip_balanced('{', '}');
        }
        cursor.next();
    }
    Err(SchemaError::InvalidOperation(
        "unterminated fragment definition".to_string(),
    ))
}
