//! Tree descriptor parsing and substitution

mod substitution;
mod tree_file;

pub use substitution::*;
pub use tree_file::*;
