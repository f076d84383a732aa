//! Protocol module containing the wire types, the frame codec and the
//! incremental parser.

pub mod codec;
pub mod messages;
pub mod parser;

pub use codec::{build_connect_frame, decode_payload, listen_frame, pack, CodecError};
pub use messages::*;
pub use parser::FrameParser;
