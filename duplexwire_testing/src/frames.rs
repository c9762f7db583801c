//! Wire helpers acting as the remote peer.

use std::{num::NonZeroUsize, ops::ControlFlow};

use duplexwire::{
    FrameAssembler,
    FrameEncoder,
    Message,
    Role,
    frame::{InboundChain, OutboundChain},
};

/// Build a [`NonZeroUsize`], panicking on zero.
#[must_use]
pub fn nz(value: usize) -> NonZeroUsize { NonZeroUsize::new(value).expect("value must be non-zero") }

/// Encode `message` as a client would send it: masked, no extensions.
#[must_use]
pub fn client_wire(message: &Message) -> Vec<u8> {
    let mut encoder = FrameEncoder::new(Role::Client, OutboundChain::default(), nz(1 << 20));
    encoder
        .encode(message)
        .expect("message encodes")
        .iter()
        .flat_map(|frame| frame.iter().copied())
        .collect()
}

/// Encode `message` without a mask, which servers must reject.
#[must_use]
pub fn unmasked_wire(message: &Message) -> Vec<u8> {
    let mut encoder = FrameEncoder::new(Role::Server, OutboundChain::default(), nz(1 << 20));
    encoder
        .encode(message)
        .expect("message encodes")
        .iter()
        .flat_map(|frame| frame.iter().copied())
        .collect()
}

/// Decode everything a server wrote.
///
/// # Panics
///
/// Panics if the bytes are not well-formed server frames or end mid-frame.
#[must_use]
pub fn decode_server(bytes: &[u8]) -> Vec<Message> {
    let mut assembler = FrameAssembler::new(Role::Client, InboundChain::default(), nz(1 << 20), nz(256));
    let mut messages = Vec::new();
    assembler
        .feed(bytes, |message| {
            messages.push(message);
            ControlFlow::Continue(())
        })
        .expect("server frames decode");
    assert_eq!(assembler.buffered(), 0, "trailing partial frame");
    messages
}
