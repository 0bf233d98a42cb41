//! Frame codec (§4.2): header encode/decode, optional body compression.
//! Opcode dispatch to concrete body parsers lives in [`crate::connection`],
//! since it depends on per-request context (which sink is waiting, etc).

pub mod compression;
pub mod header;

pub use compression::Compression;
pub use header::{
    Direction, Flags, Header, RequestOpcode, ResponseOpcode, Version, EVENT_STREAM_ID,
    FLAG_COMPRESSION, FLAG_TRACING, HEADER_LEN,
};

use crate::error::Result;
use bytes::{Bytes, BytesMut};

/// A decoded frame: header plus an (already decompressed) body.
#[derive(Debug)]
pub struct Frame {
    pub header: Header,
    pub body: Bytes,
}

/// Encodes a complete frame (header + body) ready to write to the socket.
///
/// If `compressor` is `Some`, the body is compressed and the COMPRESSION flag
/// is set on the header; `flags` otherwise passes through unchanged (notably
/// the TRACING bit, which the caller sets per-request).
pub fn encode(
    version: Version,
    stream: i16,
    opcode: u8,
    mut flags: Flags,
    body: &[u8],
    compressor: Option<(Compression, usize)>,
) -> Result<BytesMut> {
    let encoded_body: BytesMut = match compressor {
        Some((compression, working_buffer_size)) if !body.is_empty() => {
            flags = flags.with_compression(true);
            compression.compress(working_buffer_size, body)?
        }
        _ => BytesMut::from(body),
    };

    let header = Header {
        version,
        flags,
        stream,
        opcode,
        body_len: encoded_body.len() as u32,
    };

    let mut out = BytesMut::with_capacity(HEADER_LEN + encoded_body.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(&encoded_body);
    Ok(out)
}

/// Decodes a frame body given its already-parsed header and exactly
/// `header.body_len` bytes read off the wire, decompressing first if the
/// COMPRESSION flag is set.
pub fn decode_body(header: Header, raw_body: Bytes, decompressor: Option<Compression>) -> Result<Frame> {
    let body = if header.flags.compression() {
        let compression = decompressor.ok_or_else(|| {
            crate::error::Error::protocol("COMPRESSION flag set but no compressor negotiated")
        })?;
        compression.decompress(&raw_body)?
    } else {
        raw_body
    };
    Ok(Frame { header, body })
}
