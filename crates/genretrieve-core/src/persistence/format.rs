//! Magic bytes and format constants for persisted state.

/// Routing-table log segment header.
pub const ROUTING_LOG_MAGIC: [u8; 4] = *b"GRTL";

/// ANN backend snapshot header (Hot/Cold `backend.meta`).
pub const ANN_SNAPSHOT_MAGIC: [u8; 4] = *b"GRAN";

/// Current on-disk format version. Bump on breaking changes to any
/// postcard-encoded layout under this module.
pub const FORMAT_VERSION: u32 = 1;
