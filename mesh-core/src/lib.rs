//! Super-peer overlay protocol reference implementation.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod inventory;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod wire;

pub use inventory::{is_plain_filename, FileInventory, SyncDelta};
pub use protocol::{Message, Query, QueryId, DEFAULT_TTL};
pub use registry::FileRegistry;
pub use router::{
    OutboundAction, Outcome, QueryPhase, QueryRouter, RouterError, Upstream,
    DEFAULT_MAX_TTL,
};
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
