pub mod parse;
pub mod types;
