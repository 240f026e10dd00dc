use super::tokenize::{self, Token};
use super::types::{Loc, Located};
use crate::common;
use std::fmt::Display;

#[derive(Debug, PartialEq, Clone)]
pub enum Error {
    UnexpectedToken(Token, &'static str),
    UnexpectedEndOfStream(&'static str),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnexpectedToken(tk, msg) => write!(f, "unexpected token '{}': expected {}", tk, msg),
            Error::UnexpectedEndOfStream(msg) => {
                write!(f, "unexpected end of statement: expected {}", msg)
            }
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operand {
    Integer(i64),
    Float(f32),
    String(Vec<u8>),
    /// A data label or a constant.
    Identifier(String),
    /// `@name`, a code label.
    LabelRef(String),
    /// `value:@label`, one case of a `SWITCH`. The value is an `Integer` or an `Identifier`.
    Case(Box<Operand>, String),
    /// `count dup (values...)`. The count is an `Integer` or an `Identifier`.
    Dup(Box<Operand>, Vec<Located<Operand>>),
}

#[derive(Debug, PartialEq, Clone)]
pub enum Body {
    Directive(String, Vec<Located<Operand>>),
    Instruction(String, Vec<Located<Operand>>),
}

#[derive(Debug, PartialEq, Clone)]
pub struct Statement {
    pub label: Option<Located<String>>,
    pub body: Option<Located<Body>>,
}

struct Parser {
    tokens: std::iter::Peekable<std::vec::IntoIter<Located<Token>>>,
    last: Option<Loc>,
}

impl Parser {
    fn new(tokens: tokenize::Statement) -> Self {
        Parser {
            last: tokens.last().and_then(Located::loc),
            tokens: tokens.into_iter().peekable(),
        }
    }

    fn peek(&mut self) -> Option<&Token> {
        self.tokens.peek().map(Located::get)
    }

    fn next(&mut self, expected: &'static str) -> Result<Located<Token>, Located<Error>> {
        self.tokens.next().ok_or_else(|| {
            Located::with_option_loc(self.last, Error::UnexpectedEndOfStream(expected))
        })
    }

    fn expect(&mut self, want: Token, expected: &'static str) -> Result<(), Located<Error>> {
        let tk = self.next(expected)?;
        if *tk.get() == want {
            Ok(())
        } else {
            Err(tk.map(|tk| Error::UnexpectedToken(tk, expected)))
        }
    }

    fn label_ref(&mut self) -> Result<String, Located<Error>> {
        let tk = self.next("a code label")?;
        tk.map_result_value(|tk| match tk {
            Token::LabelRef(name) => Ok(name),
            tk => Err(Error::UnexpectedToken(tk, "a code label")),
        })
    }

    fn operand(&mut self) -> Result<Located<Operand>, Located<Error>> {
        let tk = self.next("an operand")?;
        let loc = tk.loc();
        let first = tk.map_result_value(|tk| {
            Ok(match tk {
                Token::Integer(value) => Operand::Integer(value),
                Token::Float(value) => Operand::Float(value),
                Token::String(s) => Operand::String(s),
                Token::Identifier(name) => Operand::Identifier(name),
                Token::LabelRef(name) => Operand::LabelRef(name),
                tk => return Err(Error::UnexpectedToken(tk, "an operand")),
            })
        })?;

        let is_count = matches!(first, Operand::Integer(_) | Operand::Identifier(_));
        match self.peek() {
            Some(Token::Colon) if is_count => {
                self.tokens.next();
                let target = self.label_ref()?;
                Ok(Located::with_option_loc(loc, Operand::Case(Box::new(first), target)))
            }
            Some(Token::Identifier(dup)) if is_count && common::eq_ignore_case(dup, "dup") => {
                self.tokens.next();
                self.expect(Token::OpenParen, "'('")?;
                let values = self.operands(true)?;
                self.expect(Token::CloseParen, "')'")?;
                Ok(Located::with_option_loc(loc, Operand::Dup(Box::new(first), values)))
            }
            _ => Ok(Located::with_option_loc(loc, first)),
        }
    }

    /// A comma separated list, ending at the end of the statement or, when `nested`, at a `)`.
    fn operands(&mut self, nested: bool) -> Result<Vec<Located<Operand>>, Located<Error>> {
        let mut operands = Vec::new();
        loop {
            match self.peek() {
                None => return Ok(operands),
                Some(Token::CloseParen) if nested => return Ok(operands),
                _ => (),
            }

            operands.push(self.operand()?);

            match self.peek() {
                Some(Token::Comma) => {
                    self.tokens.next();
                }
                None => return Ok(operands),
                Some(Token::CloseParen) if nested => return Ok(operands),
                Some(_) => {
                    let tk = self.next("','")?;
                    return Err(tk.map(|tk| Error::UnexpectedToken(tk, "','")));
                }
            }
        }
    }

    fn statement(mut self) -> Result<Statement, Located<Error>> {
        let head = match self.tokens.next() {
            None => return Ok(Statement { label: None, body: None }),
            Some(head) => head,
        };
        let loc = head.loc();
        let body = match head.value() {
            Token::Directive(name) => Body::Directive(name, self.operands(false)?),
            Token::Identifier(mnemonic) => Body::Instruction(mnemonic, self.operands(false)?),
            tk => {
                return Err(Located::with_option_loc(
                    loc,
                    Error::UnexpectedToken(tk, "a directive or an instruction"),
                ))
            }
        };

        Ok(Statement {
            label: None,
            body: Some(Located::with_option_loc(loc, body)),
        })
    }
}

/// Strips a leading `name:` off the statement.
fn take_label(stmt: &mut tokenize::Statement) -> Option<Located<String>> {
    match stmt.as_slice() {
        [first, colon, ..] if *colon.get() == Token::Colon => match first.get() {
            Token::Identifier(name) => {
                let label = first.transfer(name.clone());
                stmt.drain(..2);
                Some(label)
            }
            _ => None,
        },
        _ => None,
    }
}

/// Parses every statement, collecting the errors of all bad ones.
pub fn parse(stmts: Vec<tokenize::Statement>) -> Result<Vec<Statement>, Vec<Located<Error>>> {
    let mut parsed = Vec::with_capacity(stmts.len());
    let mut errs = Vec::new();
    for mut stmt in stmts {
        let label = take_label(&mut stmt);
        match Parser::new(stmt).statement() {
            Ok(stmt) => parsed.push(Statement { label, ..stmt }),
            Err(err) => errs.push(err),
        }
    }

    if errs.is_empty() {
        Ok(parsed)
    } else {
        Err(errs)
    }
}
