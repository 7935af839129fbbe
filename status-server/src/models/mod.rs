//! Data models

pub mod line;
pub mod source;
pub mod message_type;
pub mod status;
pub mod disturbance;
pub mod report;
pub mod trip;

pub use line::*;
pub use source::*;
pub use message_type::*;
pub use status::*;
pub use disturbance::*;
pub use report::*;
pub use trip::*;
