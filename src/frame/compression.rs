//! Frame-body compression (§4.2, §6). Negotiated at handshake from the
//! `COMPRESSION` option list in the SUPPORTED response intersected with the
//! session's configured preference.

use crate::error::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{Read, Write};

/// The two compressors the driver supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize)]
pub enum Compression {
    Lz4,
    Snappy,
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Compression::Lz4 => "lz4",
            Compression::Snappy => "snappy",
        }
    }

    /// Parses the `Compression` connection-configuration option (§6): one of
    /// `""`, `"lz4"`, `"snappy"`. An empty string disables compression.
    pub fn from_option(value: &str) -> Result<Option<Self>> {
        Ok(match value {
            "" => None,
            "lz4" => Some(Compression::Lz4),
            "snappy" => Some(Compression::Snappy),
            other => {
                return Err(Error::CompressionError(format!(
                    "unsupported compression option '{other}'"
                )))
            }
        })
    }

    /// Picks the first compressor in `preference` that also appears in the
    /// server's advertised `COMPRESSION` option list.
    pub fn negotiate(preference: Option<Compression>, server_supported: &[String]) -> Option<Self> {
        let preference = preference?;
        if server_supported.iter().any(|s| s == preference.as_str()) {
            Some(preference)
        } else {
            None
        }
    }

    pub fn compress(self, working_buffer_size: usize, body: &[u8]) -> Result<BytesMut> {
        match self {
            Compression::Lz4 => lz4_compress(working_buffer_size, body),
            Compression::Snappy => snappy_compress(body),
        }
    }

    pub fn decompress(self, body: &[u8]) -> Result<Bytes> {
        match self {
            Compression::Lz4 => lz4_decompress(body),
            Compression::Snappy => snappy_decompress(body),
        }
    }
}

/// LZ4's block-format envelope requires the uncompressed length to be carried
/// out-of-band; the wire convention here is a 4-byte big-endian prefix.
fn lz4_compress(working_buffer_size: usize, body: &[u8]) -> Result<BytesMut> {
    let mut encoder = lz4::EncoderBuilder::new()
        .build(Vec::with_capacity(working_buffer_size.max(body.len())))
        .map_err(|e| Error::CompressionError(format!("lz4 encoder init: {e}")))?;
    encoder
        .write_all(body)
        .map_err(|e| Error::CompressionError(format!("lz4 compress: {e}")))?;
    let (compressed, result) = encoder.finish();
    result.map_err(|e| Error::CompressionError(format!("lz4 compress: {e}")))?;

    let mut out = BytesMut::with_capacity(compressed.len() + 4);
    out.put_u32(body.len() as u32);
    out.extend_from_slice(&compressed);
    Ok(out)
}

fn lz4_decompress(body: &[u8]) -> Result<Bytes> {
    if body.len() < 4 {
        return Err(Error::CompressionError(
            "lz4 body shorter than the 4-byte length prefix".into(),
        ));
    }
    let uncompressed_len =
        u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
    let mut decoder = lz4::Decoder::new(&body[4..])
        .map_err(|e| Error::CompressionError(format!("lz4 decoder init: {e}")))?;
    let mut out = Vec::with_capacity(uncompressed_len);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::CompressionError(format!("lz4 decompress: {e}")))?;
    if out.len() != uncompressed_len {
        return Err(Error::CompressionError(format!(
            "lz4 decompressed length mismatch: header said {uncompressed_len}, got {}",
            out.len()
        )));
    }
    Ok(Bytes::from(out))
}

/// Snappy frames carry their own length prefix internally, so the envelope
/// is just the raw compressed block.
fn snappy_compress(body: &[u8]) -> Result<BytesMut> {
    let mut encoder = snap::raw::Encoder::new();
    let compressed = encoder
        .compress_vec(body)
        .map_err(|e| Error::CompressionError(format!("snappy compress: {e}")))?;
    let mut out = BytesMut::with_capacity(compressed.len());
    out.extend_from_slice(&compressed);
    Ok(out)
}

fn snappy_decompress(body: &[u8]) -> Result<Bytes> {
    let mut decoder = snap::raw::Decoder::new();
    let decompressed = decoder
        .decompress_vec(body)
        .map_err(|e| Error::CompressionError(format!("snappy decompress: {e}")))?;
    Ok(Bytes::from(decompressed))
}
