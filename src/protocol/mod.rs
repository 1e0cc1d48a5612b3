//! Binary request/response protocol between holder and gateway.
//!
//! ## Wire Format
//!
//! Every packet is a one-byte tag followed by fixed-width little-endian
//! fields. `ReadResponse` additionally carries a payload of exactly the
//! declared length. There is no versioning and no checksum; the transport is
//! a reliable ordered byte stream.
//!
//! ## Conversation
//!
//! The connection is half-duplex: the gateway sends one request
//! (`SeekRequest` or `ReadRequest`) and the holder answers with the matching
//! response before anything else is sent.
//!
//! - [`packet`]: packet types and blocking encode/decode
//! - [`codec`]: packet I/O on asynchronous streams

mod codec;
mod packet;

pub use codec::{read_packet, try_read_packet, write_packet};
pub use packet::{MAX_FIXED_LEN, Packet, PacketKind, Whence};
