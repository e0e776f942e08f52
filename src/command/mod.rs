//! Line-oriented command protocol over TCP
//!
//! Requests and responses are blocks of ASCII lines ended by a blank line.
//! The first token of a response is its status code; `200` means success.

pub mod channel;
pub mod request;
pub mod response;

pub use channel::{ChannelOptions, CommandChannel};
pub use request::{CommandRequest, DATETIME_FORMAT};
pub use response::{CommandResponse, STATUS_OK};
