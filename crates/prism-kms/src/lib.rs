#![forbid(unsafe_code)]

//! Kernel display / modesetting interface consumed by the swap engine.
//!
//! The swap engine never talks to the kernel directly; it drives a
//! [`DisplayLink`] implementation. Production builds wrap the modesetting
//! ioctls, device models and tests substitute their own. All calls execute on
//! the display server's event-processing thread; "waiting" for a flip means
//! the event loop later hands the completion token back to the engine.

pub mod vblank;

use thiserror::Error;

use prism_gem::BoId;

pub use vblank::{refresh_period_ns, VblankClock};

/// Stable drawable identifier. The drawable itself may be destroyed while a
/// flip is in flight, so the display layer only ever sees the id.
pub type DrawableId = u32;

/// Opaque per-swap context echoed back through flip-completion events.
pub type FlipToken = u64;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum KmsError {
    #[error("vblank queries are not supported by this display interface")]
    VblankUnsupported,

    #[error("display ioctl failed (errno {0})")]
    Ioctl(i32),

    #[error("authentication token rejected")]
    AuthRejected,
}

/// A page-flip request was rejected at issue time.
///
/// On multi-output configurations the kernel may have queued flips for some
/// outputs before failing on another; `events_queued` is the number of
/// completion events that are still going to arrive for this request. The
/// caller must keep its command alive until those drain.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("page flip failed (errno {errno}) with {events_queued} per-output flips already queued")]
pub struct FlipIssueError {
    pub errno: i32,
    pub events_queued: u32,
}

/// Timestamp and sequence number of a vblank edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VblankStamp {
    /// Microseconds, kernel monotonic domain.
    pub ust_us: u64,
    pub sequence: u64,
}

pub trait DisplayLink {
    /// Queue a page flip of every output scanning out `drawable` to the
    /// framebuffer `fb_id`.
    ///
    /// Returns the number of flip-completion events to expect. `Ok(0)` means
    /// no output was actually flipped (e.g. all outputs disabled); the
    /// request is logically complete already and no event will arrive.
    fn page_flip(
        &mut self,
        drawable: DrawableId,
        fb_id: u32,
        token: FlipToken,
    ) -> Result<u32, FlipIssueError>;

    /// Whether flip-completion events are delivered at all. Interfaces that
    /// report `false` require the caller to treat every issued flip as
    /// complete immediately.
    fn delivers_flip_events(&self) -> bool {
        true
    }

    fn supports_vblank_query(&self) -> bool;

    /// Timestamp and sequence of the vblank `relative` frames from now
    /// (0 = the most recent edge).
    fn query_vblank(&mut self, relative: u64) -> Result<VblankStamp, KmsError>;

    /// Block until the next display event arrives and return its flip token,
    /// or `None` if the event source is gone. Teardown drain only; the
    /// normal path receives events through the server's event loop.
    fn wait_for_event(&mut self) -> Option<FlipToken>;

    /// Publish `bo` as the buffer the output hardware scans out.
    fn set_scanout(&mut self, bo: BoId);

    /// Validate a client's DRM authentication token.
    fn auth_token(&mut self, magic: u32) -> Result<(), KmsError>;
}
