//! Isolated execution of one program under wall-clock, heap and iteration
//! bounds.

mod executor;
pub use executor::*;

mod limits;
pub use limits::*;
