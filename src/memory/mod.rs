mod turn_memory;
pub use turn_memory::*;
