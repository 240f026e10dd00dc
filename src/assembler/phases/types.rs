use super::{generate, parse, preprocess, resolve, tokenize};
use derive_more::Constructor;
use std::fmt::Display;

/*
    Phases:

        1.  Tokenization: The source is split into statements (one per logical line, `\` joins
            lines) and each statement into `Token`s. Comments disappear here. Errors do not stop
            the tokenizer: the offending statement is dropped and scanning resumes on the next
            line, so that every lexical error in a file is reported at once.

        2.  Preprocessing: `#define`/`#ifdef`-style directives are evaluated, statements in
            disabled branches are dropped and defined symbols are expanded.

        3.  Parsing: Each statement becomes a `Statement`, that is an optional label definition
            followed by an optional directive or instruction with its operands. Like
            tokenization, parsing keeps going after an error.

        4.  Generation: Statements are emitted into per-segment builders. Every operand naming
            a label or constant is written as zeros and recorded as a `PatchRequest`, since the
            name may only be defined further down.

        5.  Resolution: Once every label is known the patches are applied, the segments are
            paged and the native table is rotated using the final code length.
*/

#[derive(Debug, PartialEq, Clone, Copy, Eq, Constructor)]
pub struct Loc {
    line: usize,
    col: usize,
}

impl Loc {
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn col(&self) -> usize {
        self.col
    }
}

#[derive(Debug, PartialEq, Clone, Eq)]
pub struct Located<T: Sized> {
    loc: Option<Loc>,
    val: T,
}

impl Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(line: {}, col: {})", self.line, self.col)
    }
}

impl<T: Display> Display for Located<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.loc {
            None => write!(f, "@<unknown location>: {}", self.val),
            Some(loc) => write!(f, "@{}: {}", loc, self.val),
        }
    }
}

impl<T> Located<T> {
    fn new(loc: Option<Loc>, val: T) -> Self {
        Located { loc, val }
    }

    pub fn with_loc(loc: Loc, val: T) -> Self {
        Located::new(Some(loc), val)
    }

    pub fn with_option_loc(loc: Option<Loc>, val: T) -> Self {
        Located::new(loc, val)
    }

    pub fn loc(&self) -> Option<Loc> {
        self.loc
    }

    pub fn get(&self) -> &T {
        &self.val
    }

    pub fn value(self) -> T {
        self.val
    }

    pub fn map<S, F>(self, f: F) -> Located<S>
    where
        F: FnOnce(T) -> S,
    {
        Located::new(self.loc, f(self.val))
    }

    pub fn map_result_value<S, E, F>(self, f: F) -> Result<S, Located<E>>
    where
        F: FnOnce(T) -> Result<S, E>,
    {
        match f(self.val) {
            Ok(s) => Ok(s),
            Err(err) => Err(Located::new(self.loc, err)),
        }
    }

    pub fn transfer<S>(&self, s: S) -> Located<S> {
        Located::new(self.loc, s)
    }
}

impl<T> From<T> for Located<T> {
    fn from(val: T) -> Self {
        Located { loc: None, val }
    }
}

#[derive(Debug, PartialEq)]
pub enum Error {
    Tokenize(Vec<Located<tokenize::Error>>),
    Preprocess(Located<preprocess::Error>),
    Parse(Vec<Located<parse::Error>>),
    Generate(Located<generate::Error>),
    Resolve(Located<resolve::Error>),
}

impl From<Vec<Located<tokenize::Error>>> for Error {
    fn from(errs: Vec<Located<tokenize::Error>>) -> Self {
        Error::Tokenize(errs)
    }
}

impl From<Located<preprocess::Error>> for Error {
    fn from(err: Located<preprocess::Error>) -> Self {
        Error::Preprocess(err)
    }
}

impl From<Vec<Located<parse::Error>>> for Error {
    fn from(errs: Vec<Located<parse::Error>>) -> Self {
        Error::Parse(errs)
    }
}

impl From<Located<generate::Error>> for Error {
    fn from(err: Located<generate::Error>) -> Self {
        Error::Generate(err)
    }
}

impl From<Located<resolve::Error>> for Error {
    fn from(err: Located<resolve::Error>) -> Self {
        Error::Resolve(err)
    }
}

fn write_all<T: Display>(f: &mut std::fmt::Formatter<'_>, errs: &[Located<T>]) -> std::fmt::Result {
    if let [err] = errs {
        return write!(f, "{}", err);
    }

    write!(f, "{} errors", errs.len())?;
    for err in errs {
        write!(f, "\n    {}", err)?;
    }
    Ok(())
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Assembly Error (in ")?;
        match self {
            Error::Tokenize(_) => write!(f, "Tokenizer"),
            Error::Preprocess(_) => write!(f, "Preprocessor"),
            Error::Parse(_) => write!(f, "Parser"),
            Error::Generate(_) => write!(f, "Generator"),
            Error::Resolve(_) => write!(f, "Resolver"),
        }?;
        write!(f, "): ")?;
        match self {
            Error::Tokenize(errs) => write_all(f, errs),
            Error::Preprocess(err) => write!(f, "{}", err),
            Error::Parse(errs) => write_all(f, errs),
            Error::Generate(err) => write!(f, "{}", err),
            Error::Resolve(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_phase_and_location() {
        let err = Error::Generate(Located::with_loc(
            Loc::new(3, 7),
            generate::Error::UnknownMnemonic("FOO".to_owned()),
        ));
        assert_eq!(
            err.to_string(),
            "Assembly Error (in Generator): @(line: 3, col: 7): unknown mnemonic 'FOO'"
        );
    }

    #[test]
    fn display_lists_accumulated_errors() {
        let err = Error::Tokenize(vec![
            Located::with_loc(Loc::new(1, 1), tokenize::Error::UnterminatedString),
            Located::with_loc(Loc::new(4, 2), tokenize::Error::IllegalCharacter('$')),
        ]);
        assert_eq!(
            err.to_string(),
            "Assembly Error (in Tokenizer): 2 errors\n    \
             @(line: 1, col: 1): unterminated string literal\n    \
             @(line: 4, col: 2): illegal character '$'"
        );
    }
}
