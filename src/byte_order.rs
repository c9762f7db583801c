//! Network byte-order helpers for frame headers and close payloads.
//!
//! Extended payload lengths and close status codes are big-endian on the
//! wire. These helpers keep the Clippy expectation scoped to the conversion
//! points.

/// Serialise a `u16` in network byte order.
///
/// # Examples
///
/// ```
/// use duplexwire::byte_order::write_network_u16;
///
/// // Close status 1000 (normal closure).
/// assert_eq!(write_network_u16(1000), [0x03, 0xe8]);
/// ```
#[must_use]
pub fn write_network_u16(value: u16) -> [u8; 2] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u16`.
///
/// # Examples
///
/// ```
/// use duplexwire::byte_order::read_network_u16;
///
/// assert_eq!(read_network_u16([0x03, 0xf1]), 1009);
/// ```
#[must_use]
pub fn read_network_u16(bytes: [u8; 2]) -> u16 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u16::from_be_bytes(bytes)
}

/// Serialise a `u64` extended payload length in network byte order.
#[must_use]
pub fn write_network_u64(value: u64) -> [u8; 8] {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    value.to_be_bytes()
}

/// Parse a network-order `u64` extended payload length.
#[must_use]
pub fn read_network_u64(bytes: [u8; 8]) -> u64 {
    #[expect(
        clippy::big_endian_bytes,
        reason = "Network byte order requires big-endian bytes."
    )]
    u64::from_be_bytes(bytes)
}
