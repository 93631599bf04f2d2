//! HPACK header block encoding and decoding (RFC 7541)
//!
//! [`HeaderCodec`] is the seam between streams and header compression:
//! streams hand it a header list to turn into HEADERS/CONTINUATION frames,
//! or a reassembled header block to turn back into a list. [`HpackCodec`]
//! is the default implementation. It keeps one [`HeaderTable`] per
//! direction and never Huffman-encodes; Huffman strings sent by the peer
//! are decoded with the `hpack` crate.

use super::error::{Error, Result};
use super::frames::{split_header_block, Frame};
use super::hpack_table::{HeaderTable, DEFAULT_MAX_TABLE_SIZE};
use super::view::HeaderFrameView;
use crate::http::Headers;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Headers that are never added to the dynamic table
const SENSITIVE_HEADERS: [&str; 4] = ["authorization", "cookie", "set-cookie", "proxy-authorization"];

/// Header compression as seen by a stream
pub trait HeaderCodec: Send {
    /// Encode `headers` and append the HEADERS (+CONTINUATION) frames
    /// carrying them to `out`.
    fn encode(
        &mut self,
        headers: &Headers,
        stream_id: u32,
        max_frame_size: usize,
        end_stream: bool,
        out: &mut Vec<Frame>,
    ) -> Result<()>;

    /// Decode a complete header block, appending the fields to `out`
    fn decode(&mut self, view: &mut HeaderFrameView, out: &mut Headers) -> Result<()>;

    /// The peer changed SETTINGS_HEADER_TABLE_SIZE
    fn set_encoder_table_size(&mut self, size: usize);

    /// Our SETTINGS_HEADER_TABLE_SIZE was acknowledged
    fn set_decoder_table_size(&mut self, size: usize);
}

/// Default HPACK implementation
#[derive(Debug)]
pub struct HpackCodec {
    encoder: HeaderTable,
    decoder: HeaderTable,
    /// Largest size the peer may announce in a table size update
    decoder_limit: usize,
    /// Smallest and final table size to announce at the next block start
    pending_update: Option<(usize, usize)>,
}

impl HpackCodec {
    /// Create a codec with default 4096-byte tables on both sides
    pub fn new() -> Self {
        HpackCodec {
            encoder: HeaderTable::new(DEFAULT_MAX_TABLE_SIZE),
            decoder: HeaderTable::new(DEFAULT_MAX_TABLE_SIZE),
            decoder_limit: DEFAULT_MAX_TABLE_SIZE,
            pending_update: None,
        }
    }

    /// Encoder-side table
    pub fn encoder_table(&self) -> &HeaderTable {
        &self.encoder
    }

    /// Decoder-side table
    pub fn decoder_table(&self) -> &HeaderTable {
        &self.decoder
    }

    /// Encode a header list into one header block
    pub fn encode_block(&mut self, headers: &Headers) -> Bytes {
        let mut dst = BytesMut::with_capacity(headers.list_size() / 2 + 16);

        if let Some((min, last)) = self.pending_update.take() {
            if min < last {
                encode_integer(&mut dst, min, 5, 0x20);
            }
            encode_integer(&mut dst, last, 5, 0x20);
        }

        for (name, value) in headers.iter() {
            let name = name.to_ascii_lowercase();
            self.encode_field(&mut dst, &name, value);
        }
        dst.freeze()
    }

    fn encode_field(&mut self, dst: &mut BytesMut, name: &str, value: &str) {
        let sensitive = SENSITIVE_HEADERS.contains(&name);
        let (name_index, exact_index) = self.encoder.get_index(name, value);

        if exact_index != 0 && !sensitive {
            // Indexed header field
            encode_integer(dst, exact_index, 7, 0x80);
            return;
        }

        if sensitive {
            // Literal never indexed
            encode_integer(dst, name_index, 4, 0x10);
        } else {
            // Literal with incremental indexing
            encode_integer(dst, name_index, 6, 0x40);
        }
        if name_index == 0 {
            encode_string(dst, name);
        }
        encode_string(dst, value);

        if !sensitive {
            self.encoder.add(name, value);
        }
    }

    /// Decode a whole header block held in memory
    pub fn decode_block<B: Buf>(&mut self, src: &mut B, out: &mut Headers) -> Result<()> {
        let mut at_block_start = true;

        while src.has_remaining() {
            let first = src.chunk()[0];

            if first & 0x80 != 0 {
                // Indexed header field
                let index = decode_integer(src, 7)?;
                let (name, value) = self.lookup(index)?;
                out.insert(name, value);
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing
                let (name, value) = self.decode_literal(src, 6)?;
                self.decoder.add(&name, &value);
                out.insert(name, value);
            } else if first & 0x20 != 0 {
                // Dynamic table size update
                if !at_block_start {
                    return Err(Error::Compression(
                        "table size update after the first header field".to_string(),
                    ));
                }
                let size = decode_integer(src, 5)?;
                if size > self.decoder_limit {
                    return Err(Error::Compression(format!(
                        "table size update {} exceeds limit {}",
                        size, self.decoder_limit
                    )));
                }
                self.decoder.set_max_dynamic_table_size(size);
                continue;
            } else {
                // Literal without indexing (0x00) or never indexed (0x10)
                let (name, value) = self.decode_literal(src, 4)?;
                out.insert(name, value);
            }
            at_block_start = false;
        }
        Ok(())
    }

    fn lookup(&self, index: usize) -> Result<(String, String)> {
        self.decoder
            .get_header(index)
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .ok_or_else(|| Error::Compression(format!("invalid table index {}", index)))
    }

    fn decode_literal<B: Buf>(&self, src: &mut B, prefix_bits: u8) -> Result<(String, String)> {
        let index = decode_integer(src, prefix_bits)?;
        let name = if index == 0 {
            decode_string(src)?
        } else {
            self.lookup(index)?.0
        };
        let value = decode_string(src)?;
        Ok((name, value))
    }
}

impl Default for HpackCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl HeaderCodec for HpackCodec {
    fn encode(
        &mut self,
        headers: &Headers,
        stream_id: u32,
        max_frame_size: usize,
        end_stream: bool,
        out: &mut Vec<Frame>,
    ) -> Result<()> {
        let block = self.encode_block(headers);
        split_header_block(stream_id, block, max_frame_size, end_stream, out);
        Ok(())
    }

    fn decode(&mut self, view: &mut HeaderFrameView, out: &mut Headers) -> Result<()> {
        self.decode_block(view, out)
    }

    fn set_encoder_table_size(&mut self, size: usize) {
        // The encoder table is capped at the default size
        let size = size.min(DEFAULT_MAX_TABLE_SIZE);
        if size == self.encoder.max_dynamic_table_size() {
            return;
        }
        self.encoder.set_max_dynamic_table_size(size);
        self.pending_update = Some(match self.pending_update {
            Some((min, _)) => (min.min(size), size),
            None => (size, size),
        });
    }

    fn set_decoder_table_size(&mut self, size: usize) {
        self.decoder_limit = size;
        if self.decoder.max_dynamic_table_size() > size {
            self.decoder.set_max_dynamic_table_size(size);
        }
    }
}

/// Encode an integer using HPACK integer encoding (RFC 7541 Section 5.1)
pub fn encode_integer(dst: &mut BytesMut, value: usize, prefix_bits: u8, prefix: u8) {
    let max_first = (1usize << prefix_bits) - 1;

    if value < max_first {
        dst.put_u8(prefix | value as u8);
    } else {
        dst.put_u8(prefix | max_first as u8);
        let mut remaining = value - max_first;
        while remaining >= 128 {
            dst.put_u8((remaining & 0x7f) as u8 | 0x80);
            remaining >>= 7;
        }
        dst.put_u8(remaining as u8);
    }
}

/// Decode an integer using HPACK integer encoding
pub fn decode_integer<B: Buf>(src: &mut B, prefix_bits: u8) -> Result<usize> {
    if !src.has_remaining() {
        return Err(Error::Compression("unexpected end of integer".to_string()));
    }

    let max_first = (1usize << prefix_bits) - 1;
    let first = src.get_u8() as usize & max_first;
    if first < max_first {
        return Ok(first);
    }

    let mut value = max_first;
    let mut shift = 0u32;
    loop {
        if !src.has_remaining() {
            return Err(Error::Compression("unexpected end of integer".to_string()));
        }
        if shift > 28 {
            return Err(Error::Compression("integer too large".to_string()));
        }
        let byte = src.get_u8();
        value += ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

fn encode_string(dst: &mut BytesMut, value: &str) {
    encode_integer(dst, value.len(), 7, 0x00);
    dst.put_slice(value.as_bytes());
}

fn decode_string<B: Buf>(src: &mut B) -> Result<String> {
    if !src.has_remaining() {
        return Err(Error::Compression("unexpected end of string".to_string()));
    }
    let huffman = src.chunk()[0] & 0x80 != 0;
    let len = decode_integer(src, 7)?;
    if src.remaining() < len {
        return Err(Error::Compression(format!(
            "string length {} exceeds remaining block {}",
            len,
            src.remaining()
        )));
    }
    let raw = src.copy_to_bytes(len);

    let bytes = if huffman {
        hpack::huffman::HuffmanDecoder::new()
            .decode(&raw)
            .map_err(|e| Error::Compression(format!("invalid Huffman string: {:?}", e)))?
    } else {
        raw.to_vec()
    };
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
