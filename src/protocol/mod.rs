//! RESP Protocol Implementation
//!
//! The inbound side only accepts command frames (arrays of bulk strings);
//! the outbound side can write every RESP reply type.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` reply enum and its serialization
//! - `parser`: the incremental command-frame parser and the async `FrameDecoder`
//!
//! ## Example
//!
//! ```
//! use quartzkv::protocol::{parse_command, RespValue};
//! use bytes::Bytes;
//!
//! // Decoding a request
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (tokens, consumed) = parse_command(data).unwrap().unwrap();
//! assert_eq!(tokens.len(), 2);
//! assert_eq!(consumed, data.len());
//!
//! // Encoding a reply
//! let reply = RespValue::bulk_string(Bytes::from("quartz"));
//! assert_eq!(reply.serialize(), b"$6\r\nquartz\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{parse_command, FrameDecoder, ParseError, ParseResult};
pub use types::RespValue;
