//! permessage-deflate transform.
//!
//! Compressed messages carry RSV1 on their first frame. The trailing
//! `00 00 ff ff` of each sync flush is stripped on the wire and re-appended
//! before inflating the final frame of a message.

use std::io;

use bytes::Bytes;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use super::{
    FragmentInfo,
    FrameError,
    InboundTransform,
    OutboundTransform,
    Role,
    Transform,
    header::RSV1,
};

/// Extension name used during negotiation.
pub const PERMESSAGE_DEFLATE: &str = "permessage-deflate";

const SYNC_TAIL: [u8; 4] = [0x00, 0x00, 0xff, 0xff];
const CHUNK: usize = 4 * 1024;
/// Fixed deflate overhead on top of the per-block cost: block headers of
/// the sync flush and the final partial block.
const DEFLATE_SLACK: usize = 64;

/// Negotiated permessage-deflate parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeflateConfig {
    /// The server resets its compressor after every message.
    pub server_no_context_takeover: bool,
    /// The client resets its compressor after every message.
    pub client_no_context_takeover: bool,
    /// Compression level for outbound messages.
    pub level: u32,
}

impl Default for DeflateConfig {
    fn default() -> Self {
        Self {
            server_no_context_takeover: false,
            client_no_context_takeover: false,
            level: Compression::default().level(),
        }
    }
}

/// permessage-deflate for one side of a connection.
#[derive(Clone, Copy, Debug)]
pub struct DeflateTransform {
    role: Role,
    config: DeflateConfig,
}

impl DeflateTransform {
    /// Create the transform for `role` with the negotiated `config`.
    #[must_use]
    pub fn new(role: Role, config: DeflateConfig) -> Self { Self { role, config } }
}

impl Transform for DeflateTransform {
    fn name(&self) -> &str { PERMESSAGE_DEFLATE }

    fn into_halves(self: Box<Self>) -> (Box<dyn InboundTransform>, Box<dyn OutboundTransform>) {
        let (own_reset, peer_reset) = match self.role {
            Role::Server => (
                self.config.server_no_context_takeover,
                self.config.client_no_context_takeover,
            ),
            Role::Client => (
                self.config.client_no_context_takeover,
                self.config.server_no_context_takeover,
            ),
        };
        let inflater = Inflater {
            decompress: Decompress::new(false),
            reset_after_message: peer_reset,
        };
        let deflater = Deflater {
            compress: Compress::new(Compression::new(self.config.level), false),
            reset_after_message: own_reset,
        };
        (Box::new(inflater), Box::new(deflater))
    }
}

fn transform_error(error: impl std::error::Error + Send + Sync + 'static) -> FrameError {
    FrameError::Transform(io::Error::new(io::ErrorKind::InvalidData, error))
}

fn progress(before: u64, after: u64) -> usize { usize::try_from(after - before).unwrap_or(usize::MAX) }

struct Inflater {
    decompress: Decompress,
    reset_after_message: bool,
}

impl Inflater {
    fn inflate(&mut self, mut input: &[u8], out: &mut Vec<u8>, budget: usize) -> Result<(), FrameError> {
        loop {
            if out.len() == out.capacity() {
                out.reserve(CHUNK);
            }
            let before_in = self.decompress.total_in();
            let before_out = self.decompress.total_out();
            let status = self
                .decompress
                .decompress_vec(input, out, FlushDecompress::Sync)
                .map_err(transform_error)?;
            let consumed = progress(before_in, self.decompress.total_in());
            let produced = progress(before_out, self.decompress.total_out());
            input = &input[consumed..];

            if out.len() > budget {
                return Err(FrameError::MessageTooBig {
                    size: out.len(),
                    limit: budget,
                });
            }
            let flushed = input.is_empty() && out.len() < out.capacity();
            let stalled = consumed == 0 && produced == 0;
            if flushed || stalled || status == Status::StreamEnd {
                return Ok(());
            }
        }
    }
}

impl InboundTransform for Inflater {
    fn rsv_bits(&self) -> u8 { RSV1 }

    // Incompressible input falls back to stored blocks, which cost five bytes
    // per 64 KiB, so one byte per KiB is a safe upper bound.
    fn max_encoded_len(&self, decoded: usize) -> usize {
        decoded.saturating_add(decoded / 1024).saturating_add(DEFLATE_SLACK)
    }

    fn decode(&mut self, info: &FragmentInfo, payload: Bytes, budget: usize) -> Result<Bytes, FrameError> {
        if info.rsv & RSV1 == 0 {
            return Ok(payload);
        }
        let mut out = Vec::with_capacity(payload.len().saturating_mul(2).min(budget.max(1)));
        self.inflate(&payload, &mut out, budget)?;
        if info.fin {
            self.inflate(&SYNC_TAIL, &mut out, budget)?;
            if self.reset_after_message {
                self.decompress.reset(false);
            }
        }
        Ok(Bytes::from(out))
    }
}

struct Deflater {
    compress: Compress,
    reset_after_message: bool,
}

impl OutboundTransform for Deflater {
    fn encode(&mut self, info: &mut FragmentInfo, payload: Bytes) -> Result<Bytes, FrameError> {
        let mut out = Vec::with_capacity(payload.len() / 2 + 16);
        let mut input = &payload[..];
        loop {
            if out.len() == out.capacity() {
                out.reserve(CHUNK);
            }
            let before_in = self.compress.total_in();
            self.compress
                .compress_vec(input, &mut out, FlushCompress::Sync)
                .map_err(transform_error)?;
            input = &input[progress(before_in, self.compress.total_in())..];
            if input.is_empty() && out.len() < out.capacity() {
                break;
            }
        }
        if out.ends_with(&SYNC_TAIL) {
            out.truncate(out.len() - SYNC_TAIL.len());
        }
        if out.is_empty() {
            out.push(0x00);
        }
        if self.reset_after_message {
            self.compress.reset();
        }
        info.rsv |= RSV1;
        Ok(Bytes::from(out))
    }
}
