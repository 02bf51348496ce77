//! Agent configuration and the per-mission run loop.

mod builder;
pub use builder::*;

mod config;
pub use config::{Agent, LLMRef};

mod dispatcher;

mod error;
pub use error::*;

mod executor;
pub use executor::{AsToolOptions, Preview};

mod feedback;

mod options;
pub use options::RunOptions;
pub(crate) use options::RunScope;
