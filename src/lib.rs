pub(crate) mod common;

pub mod isa;
pub mod script;

pub mod assembler;

pub mod cli;
