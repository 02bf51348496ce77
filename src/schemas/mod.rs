mod message_type;
pub use message_type::*;

mod message;
pub use message::*;

mod token_usage;
pub use token_usage::*;

mod tool_call;
pub use tool_call::*;

mod fault;
pub use fault::*;

mod output_mode;
pub use output_mode::*;

mod usage;
pub use usage::*;

mod step;
pub use step::*;

mod turn;
pub use turn::*;
