use super::tokenize::{Statement, Token};
use super::types::{Loc, Located};
use log::trace;
use std::collections::HashMap;
use std::fmt::Display;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Error {
    UnknownDirective(String),
    DirectiveNotAtLineStart,
    MissingSymbol(String),
    UnexpectedToken(String),
    /// `#else`, `#elifdef`, `#elifndef` or `#endif` with no open conditional.
    Unbalanced(String),
    UnclosedConditional,
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnknownDirective(name) => write!(f, "unknown preprocessor directive '#{}'", name),
            Error::DirectiveNotAtLineStart => {
                write!(f, "preprocessor directives must start a line")
            }
            Error::MissingSymbol(directive) => write!(f, "'#{}' expects a symbol name", directive),
            Error::UnexpectedToken(token) => write!(f, "unexpected token '{}'", token),
            Error::Unbalanced(directive) => {
                write!(f, "'#{}' without a matching '#ifdef' or '#ifndef'", directive)
            }
            Error::UnclosedConditional => write!(f, "conditional block is never closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    /// The branch being read is enabled.
    True,
    /// Disabled, but a later `#else`/`#elif*` may still be taken.
    False,
    /// An earlier branch of this conditional was taken.
    AlreadyTaken,
    /// The whole conditional sits inside a disabled branch.
    Disabled,
}

struct Preprocessor {
    symbols: HashMap<String, Vec<Token>>,
    /// Open conditionals and where each was opened. Empty at the root.
    branches: Vec<(Branch, Option<Loc>)>,
}

impl Preprocessor {
    fn active(&self) -> bool {
        self.branches
            .last()
            .map_or(true, |(branch, _)| *branch == Branch::True)
    }

    fn is_defined(&self, name: &str) -> bool {
        self.symbols.contains_key(name)
    }

    fn symbol<'a>(
        directive: &str,
        args: &'a [Located<Token>],
    ) -> Result<&'a str, Error> {
        match args.first().map(Located::get) {
            Some(Token::Identifier(name)) => Ok(name),
            _ => Err(Error::MissingSymbol(directive.to_owned())),
        }
    }

    fn expect_end(args: &[Located<Token>]) -> Result<(), Located<Error>> {
        match args.first() {
            None => Ok(()),
            Some(tok) => Err(tok.transfer(Error::UnexpectedToken(tok.get().to_string()))),
        }
    }

    fn directive(
        &mut self,
        loc: Option<Loc>,
        name: &str,
        args: &[Located<Token>],
    ) -> Result<(), Located<Error>> {
        let located = |err| Located::with_option_loc(loc, err);

        match name {
            "ifdef" | "ifndef" => {
                let symbol = Self::symbol(name, args).map_err(located)?;
                Self::expect_end(&args[1..])?;
                let branch = if !self.active() {
                    Branch::Disabled
                } else if self.is_defined(symbol) == (name == "ifdef") {
                    Branch::True
                } else {
                    Branch::False
                };
                self.branches.push((branch, loc));
            }
            "elifdef" | "elifndef" => {
                let symbol = Self::symbol(name, args).map_err(located)?;
                Self::expect_end(&args[1..])?;
                let taken = self.is_defined(symbol) == (name == "elifdef");
                let top = self
                    .branches
                    .last_mut()
                    .ok_or_else(|| located(Error::Unbalanced(name.to_owned())))?;
                top.0 = match top.0 {
                    Branch::True | Branch::AlreadyTaken => Branch::AlreadyTaken,
                    Branch::False if taken => Branch::True,
                    Branch::False => Branch::False,
                    Branch::Disabled => Branch::Disabled,
                };
            }
            "else" => {
                Self::expect_end(args)?;
                let top = self
                    .branches
                    .last_mut()
                    .ok_or_else(|| located(Error::Unbalanced(name.to_owned())))?;
                top.0 = match top.0 {
                    Branch::True | Branch::AlreadyTaken => Branch::AlreadyTaken,
                    Branch::False => Branch::True,
                    Branch::Disabled => Branch::Disabled,
                };
            }
            "endif" => {
                Self::expect_end(args)?;
                self.branches
                    .pop()
                    .ok_or_else(|| located(Error::Unbalanced(name.to_owned())))?;
            }
            "define" => {
                let symbol = Self::symbol(name, args).map_err(located)?;
                if self.active() {
                    let replacement = args[1..].iter().map(|tok| tok.get().clone()).collect();
                    trace!("#define {}", symbol);
                    self.symbols.insert(symbol.to_owned(), replacement);
                }
            }
            "undef" => {
                let symbol = Self::symbol(name, args).map_err(located)?;
                Self::expect_end(&args[1..])?;
                if self.active() {
                    self.symbols.remove(symbol);
                }
            }
            _ => return Err(located(Error::UnknownDirective(name.to_owned()))),
        }
        Ok(())
    }

    fn expand(&self, stmt: Statement) -> Statement {
        let mut out = Vec::with_capacity(stmt.len());
        for tok in stmt {
            match tok.get() {
                Token::Identifier(name) if self.symbols.contains_key(name) => {
                    out.extend(self.symbols[name].iter().map(|rep| tok.transfer(rep.clone())));
                }
                _ => out.push(tok),
            }
        }
        out
    }

    fn run(&mut self, stmts: Vec<Statement>) -> Result<Vec<Statement>, Located<Error>> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            if let Some(hash) = stmt.iter().skip(1).find(|tok| *tok.get() == Token::Hash) {
                return Err(hash.transfer(Error::DirectiveNotAtLineStart));
            }

            match stmt.first().map(Located::get) {
                Some(Token::Hash) => {
                    let loc = stmt[0].loc();
                    match stmt.get(1).map(Located::get) {
                        Some(Token::Identifier(name)) => {
                            let name = name.to_lowercase();
                            self.directive(loc, &name, &stmt[2..])?
                        }
                        Some(other) => {
                            return Err(stmt[1].transfer(Error::UnknownDirective(other.to_string())))
                        }
                        None => {
                            return Err(Located::with_option_loc(
                                loc,
                                Error::UnknownDirective(String::new()),
                            ))
                        }
                    }
                }
                _ if self.active() => out.push(self.expand(stmt)),
                _ => trace!("dropping disabled statement"),
            }
        }

        match self.branches.last() {
            Some((_, loc)) => Err(Located::with_option_loc(*loc, Error::UnclosedConditional)),
            None => Ok(out),
        }
    }
}

/// Evaluates conditional blocks and expands defined symbols. `defines` are treated as if
/// `#define`d with an empty replacement before the first statement.
pub fn preprocess<S: AsRef<str>>(
    stmts: Vec<Statement>,
    defines: &[S],
) -> Result<Vec<Statement>, Located<Error>> {
    let mut pp = Preprocessor {
        symbols: defines
            .iter()
            .map(|name| (name.as_ref().to_owned(), Vec::new()))
            .collect(),
        branches: Vec::new(),
    };
    pp.run(stmts)
}
