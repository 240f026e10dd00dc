pub mod types;

pub mod generate;
pub mod parse;
pub mod preprocess;
pub mod resolve;
pub mod tokenize;

pub use generate::generate;
pub use parse::parse;
pub use preprocess::preprocess;
pub use resolve::resolve;
pub use tokenize::tokenize;
