use super::types::{Loc, Located};
use crate::common;
use std::fmt::Display;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    UnterminatedString,
    UnterminatedComment,
    IllegalEscape(char),
    IllegalCharacter(char),
    MalformedNumber(String),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnterminatedString => write!(f, "unterminated string literal"),
            Error::UnterminatedComment => write!(f, "unterminated block comment"),
            Error::IllegalEscape(c) => write!(f, "illegal escape sequence '\\{}'", c),
            Error::IllegalCharacter(c) => write!(f, "illegal character '{}'", c),
            Error::MalformedNumber(raw) => write!(f, "malformed number '{}'", raw),
        }
    }
}

// The tokens carry no meaning yet: whether an identifier names an instruction, a label or a
// constant is decided by its position in the statement, later on.
#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Identifier(String),
    /// `.name`
    Directive(String),
    /// `@name`
    LabelRef(String),
    Integer(i64),
    Float(f32),
    /// The raw bytes of a quoted literal, which need not be UTF-8.
    String(Vec<u8>),
    Comma,
    OpenParen,
    CloseParen,
    Colon,
    Hash,
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Identifier(name) => write!(f, "{}", name),
            Token::Directive(name) => write!(f, ".{}", name),
            Token::LabelRef(name) => write!(f, "@{}", name),
            Token::Integer(value) => write!(f, "{}", value),
            Token::Float(value) => write!(f, "{:?}", value),
            Token::String(s) => write!(f, "\"{}\"", common::escape(s)),
            Token::Comma => write!(f, ","),
            Token::OpenParen => write!(f, "("),
            Token::CloseParen => write!(f, ")"),
            Token::Colon => write!(f, ":"),
            Token::Hash => write!(f, "#"),
        }
    }
}

/// The tokens of one logical line.
pub type Statement = Vec<Located<Token>>;

pub fn is_identifier_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().map_or(false, is_identifier_start) && chars.all(is_identifier_char)
}

#[derive(Debug, PartialEq)]
enum Lexeme {
    Token(Located<Token>),
    EndOfStatement,
}

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Lexer {
            source,
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn loc(&self) -> Loc {
        Loc::new(self.line, self.col)
    }

    fn peek(&self) -> Option<char> {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn bump_while(&mut self, f: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().map_or(false, &f) {
            self.bump();
        }
        &self.source[start..self.pos]
    }

    /// Leaves the newline in place, so that it still ends the statement.
    fn skip_to_eol(&mut self) {
        self.bump_while(|c| c != '\n');
    }

    /// Returns whether the comment spanned a line break.
    fn block_comment(&mut self, loc: Loc) -> Result<bool, Located<Error>> {
        self.bump();
        self.bump();
        let mut newline = false;
        loop {
            match self.bump() {
                None => return Err(Located::with_loc(loc, Error::UnterminatedComment)),
                Some('*') if self.peek() == Some('/') => {
                    self.bump();
                    return Ok(newline);
                }
                Some('\n') => newline = true,
                Some(_) => (),
            }
        }
    }

    fn continuation(&mut self, loc: Loc) -> Result<(), Located<Error>> {
        self.bump();
        self.bump_while(|c| c != '\n' && c.is_whitespace());
        match self.peek() {
            None => Ok(()),
            Some('\n') => {
                self.bump();
                Ok(())
            }
            Some(_) => Err(Located::with_loc(loc, Error::IllegalCharacter('\\'))),
        }
    }

    /// Two hex digits following `\x`.
    fn hex_byte(&mut self, here: Loc) -> Result<u8, Located<Error>> {
        let mut value = 0;
        for _ in 0..2 {
            let digit = match self.peek().and_then(|c| c.to_digit(16)) {
                Some(digit) => digit,
                None => return Err(Located::with_loc(here, Error::IllegalEscape('x'))),
            };
            self.bump();
            value = value << 4 | digit as u8;
        }
        Ok(value)
    }

    fn quoted(&mut self, loc: Loc) -> Result<Vec<u8>, Located<Error>> {
        let quote = self.bump();
        let mut text = Vec::new();
        loop {
            let here = self.loc();
            let c = match self.peek() {
                None | Some('\n') => return Err(Located::with_loc(loc, Error::UnterminatedString)),
                Some(c) => c,
            };
            self.bump();

            if Some(c) == quote {
                return Ok(text);
            }
            if c != '\\' {
                let mut utf8 = [0; 4];
                text.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
                continue;
            }

            let escaped = match self.peek() {
                None | Some('\n') => return Err(Located::with_loc(loc, Error::UnterminatedString)),
                Some(escaped) => escaped,
            };
            self.bump();
            text.push(match escaped {
                'n' => b'\n',
                'r' => b'\r',
                't' => b'\t',
                '0' => 0,
                '\\' | '"' | '\'' | '`' => escaped as u8,
                'x' => self.hex_byte(here)?,
                other => return Err(Located::with_loc(here, Error::IllegalEscape(other))),
            });
        }
    }

    fn number(&mut self, loc: Loc) -> Result<Token, Located<Error>> {
        let start = self.pos;
        let negative = match self.peek() {
            Some('-') => {
                self.bump();
                true
            }
            Some('+') => {
                self.bump();
                false
            }
            _ => false,
        };

        let body_start = self.pos;
        // `0f` followed by the bits of an f32, for values with no decimal form such as NaN
        if self.peek() == Some('0') && matches!(self.peek_nth(1), Some('f') | Some('F')) {
            self.bump();
            self.bump();
            let digits = self.bump_while(|c| c.is_ascii_hexdigit());
            self.check_number_end(start, loc)?;
            if digits.is_empty() || digits.len() > 8 {
                return Err(self.malformed(start, loc));
            }
            let bits = u32::from_str_radix(digits, 16).map_err(|_| self.malformed(start, loc))?;
            let value = f32::from_bits(bits);
            return Ok(Token::Float(if negative { -value } else { value }));
        }
        if self.peek() == Some('0') && matches!(self.peek_nth(1), Some('x') | Some('X')) {
            self.bump();
            self.bump();
            let digits = self.bump_while(|c| c.is_ascii_hexdigit());
            self.check_number_end(start, loc)?;
            let value = u64::from_str_radix(digits, 16)
                .map_err(|_| self.malformed(start, loc))? as i64;
            return Ok(Token::Integer(if negative {
                value.wrapping_neg()
            } else {
                value
            }));
        }

        let mut is_float = false;
        self.bump_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') && self.peek_nth(1).map_or(false, |c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            self.bump_while(|c| c.is_ascii_digit());
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let exponent = match self.peek_nth(1) {
                Some('+') | Some('-') => self.peek_nth(2),
                c => c,
            };
            if exponent.map_or(false, |c| c.is_ascii_digit()) {
                is_float = true;
                self.bump();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.bump();
                }
                self.bump_while(|c| c.is_ascii_digit());
            }
        }
        self.check_number_end(start, loc)?;

        let text = &self.source[start..self.pos];
        if is_float {
            return text
                .parse::<f32>()
                .map(Token::Float)
                .map_err(|_| self.malformed(start, loc));
        }

        match text.parse::<i64>() {
            Ok(value) => Ok(Token::Integer(value)),
            Err(_) => {
                // out of range for i64, but maybe still a valid 64-bit pattern
                let value = self.source[body_start..self.pos]
                    .parse::<u64>()
                    .map_err(|_| self.malformed(start, loc))? as i64;
                Ok(Token::Integer(if negative {
                    value.wrapping_neg()
                } else {
                    value
                }))
            }
        }
    }

    fn malformed(&self, start: usize, loc: Loc) -> Located<Error> {
        Located::with_loc(
            loc,
            Error::MalformedNumber(self.source[start..self.pos].to_owned()),
        )
    }

    fn check_number_end(&mut self, start: usize, loc: Loc) -> Result<(), Located<Error>> {
        if self.peek().map_or(false, |c| is_identifier_char(c) || c == '.') {
            self.bump_while(|c| is_identifier_char(c) || c == '.');
            return Err(self.malformed(start, loc));
        }
        Ok(())
    }

    fn identifier(&mut self) -> String {
        self.bump_while(is_identifier_char).to_owned()
    }

    fn next_lexeme(&mut self) -> Result<Option<Lexeme>, Located<Error>> {
        loop {
            let c = match self.peek() {
                None => return Ok(None),
                Some(c) => c,
            };
            let loc = self.loc();
            let next = self.peek_nth(1);
            let token = |token| Ok(Some(Lexeme::Token(Located::with_loc(loc, token))));

            match c {
                '\n' => {
                    self.bump();
                    return Ok(Some(Lexeme::EndOfStatement));
                }
                ';' => self.skip_to_eol(),
                '/' if next == Some('/') => self.skip_to_eol(),
                '/' if next == Some('*') => {
                    if self.block_comment(loc)? {
                        return Ok(Some(Lexeme::EndOfStatement));
                    }
                }
                '\\' => self.continuation(loc)?,
                c if c.is_whitespace() => {
                    self.bump();
                }
                ',' | '(' | ')' | ':' | '#' => {
                    self.bump();
                    return token(match c {
                        ',' => Token::Comma,
                        '(' => Token::OpenParen,
                        ')' => Token::CloseParen,
                        ':' => Token::Colon,
                        _ => Token::Hash,
                    });
                }
                '"' | '\'' => {
                    let text = self.quoted(loc)?;
                    return token(Token::String(text));
                }
                '`' => {
                    let text = self.quoted(loc)?;
                    return token(Token::Integer(i64::from(common::lowercase_hash(&text))));
                }
                '.' if next.map_or(false, |c| c.is_ascii_digit()) => {
                    let number = self.number(loc)?;
                    return token(number);
                }
                '.' if next.map_or(false, is_identifier_start) => {
                    self.bump();
                    let name = self.identifier();
                    return token(Token::Directive(name));
                }
                '@' if next.map_or(false, is_identifier_start) => {
                    self.bump();
                    let name = self.identifier();
                    return token(Token::LabelRef(name));
                }
                '+' | '-'
                    if next.map_or(false, |c| c.is_ascii_digit())
                        || (next == Some('.')
                            && self.peek_nth(2).map_or(false, |c| c.is_ascii_digit())) =>
                {
                    let number = self.number(loc)?;
                    return token(number);
                }
                c if c.is_ascii_digit() => {
                    let number = self.number(loc)?;
                    return token(number);
                }
                c if is_identifier_start(c) => {
                    let name = self.identifier();
                    return token(Token::Identifier(name));
                }
                c => {
                    self.bump();
                    return Err(Located::with_loc(loc, Error::IllegalCharacter(c)));
                }
            }
        }
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Statement>, Vec<Located<Error>>> {
    let mut lexer = Lexer::new(source);
    let mut statements = Vec::new();
    let mut errs = Vec::new();
    let mut current = Vec::new();

    loop {
        match lexer.next_lexeme() {
            Ok(Some(Lexeme::Token(token))) => current.push(token),
            Ok(Some(Lexeme::EndOfStatement)) => {
                if !current.is_empty() {
                    statements.push(std::mem::take(&mut current));
                }
            }
            Ok(None) => break,
            Err(err) => {
                // drop the whole statement and resume on the next line
                errs.push(err);
                current.clear();
                lexer.skip_to_eol();
            }
        }
    }
    if !current.is_empty() {
        statements.push(current);
    }

    if errs.is_empty() {
        Ok(statements)
    } else {
        Err(errs)
    }
}
