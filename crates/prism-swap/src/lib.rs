#![forbid(unsafe_code)]

//! Buffer-swap engine for a display-server GPU driver.
//!
//! This crate decides how a frame gets from a client's back buffer onto the
//! screen: by a hardware page flip when both buffers can be scanned out, or
//! by a copy (blit) when they cannot. It owns the swap-chain buffer records,
//! the lazy scanout-framebuffer attachment policy, the multi-buffer ring
//! walked across successive flips, and the completion state machine that
//! notifies a waiting client exactly once per swap.
//!
//! Everything runs on the display server's event-processing thread. A flip
//! is issued and the schedule call returns; the server's event loop later
//! hands the flip-completion token back via
//! [`SwapScreen::handle_flip_event`]. Buffer records are reference-counted
//! (not locked) so they survive the client detaching a drawable while the
//! hardware still owns its buffers.
//!
//! Collaborators are consumed through traits: the windowing layer as
//! [`WindowSystem`], the kernel modesetting layer as
//! [`prism_kms::DisplayLink`], and GPU memory objects as a
//! [`prism_gem::GemArena`] passed per call.

pub mod buffer;
pub mod error;
mod ring;
pub mod screen;
pub mod swap;
pub mod window;

pub use buffer::{Attachment, BufferId, SlotRing, SwapBuffer};
pub use error::{Result, SwapError};
pub use screen::{CoreVersion, SwapConfig, SwapScreen, MAX_SWAP_BUFFERS, MIN_CORE_VERSION};
pub use swap::{ClientId, RequestToken, SwapCompletion, SwapFlags, SwapKind};
pub use window::{
    BlitTarget, DrawableId, DrawableInfo, DrawableKind, Rect, SurfaceId, WindowSystem,
};
