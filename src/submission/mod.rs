pub mod metadata;
pub mod parser;
