//! Protocol-independent primitives for the Veil TLS engine.
//!
//! This crate holds the leaves the engine is built from: the cursor-style
//! [`IoBuffer`] both sides of the engine boundary exchange, the fixed
//! five-byte record framing, CBOR helpers for flight payloads, and the
//! entropy front-end. Nothing here knows about handshake state or keys.

pub mod buffer;
pub mod codec;
pub mod entropy;
pub mod record;

pub use buffer::{BufferError, IoBuffer};
pub use codec::{from_slice as codec_from_slice, to_vec as codec_to_vec, CodecError};
pub use entropy::SecureRandom;
pub use record::{
    RecordError, RecordHeader, RecordType, MAX_RECORD_PAYLOAD, RECORD_HEADER_LEN, WIRE_VERSION,
};
