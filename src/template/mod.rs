mod error;
pub use error::*;

mod mission_template;
pub use mission_template::*;
