//! Parsing LLM responses: fenced PTC-Lisp programs and JSON documents.

mod error;
pub use error::*;

mod program_parser;
pub use program_parser::*;

mod json_parser;
pub use json_parser::*;
