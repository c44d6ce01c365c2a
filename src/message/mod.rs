//! Parsing of agent → gateway frames

mod parser;

pub use parser::{MAX_FRAME_BYTES, parse_frame, parse_message};
