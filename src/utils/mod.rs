pub mod helper;
pub use helper::*;

mod macros;
