//! Swap command scheduling and completion.
//!
//! One [`SwapCommand`] represents one in-flight swap request. Scheduling
//! decides flip-vs-blit, takes the references that keep both buffers alive
//! across the asynchronous boundary, and issues the flip; the completion
//! routine is the single point of truth for "a swap has finished" — every
//! path (flip success, synthetic flip, blit, flip failure) funnels through
//! it exactly once.

use std::fmt;

use bitflags::bitflags;

use prism_gem::{BoId, GemArena};
use prism_kms::{DisplayLink, DrawableId, FlipToken};

use crate::buffer::{Attachment, BufferId};
use crate::error::{Result, SwapError};
use crate::screen::SwapScreen;
use crate::window::{Rect, WindowSystem};

/// Identifier of the client waiting on a swap.
pub type ClientId = u32;

/// Opaque request token carried through to the completion record. The
/// protocol layer maps it back to the client's callback; marshalling is not
/// our business.
pub type RequestToken = u64;

/// How a swap was ultimately performed, for client timing attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapKind {
    Exchange,
    Blit,
    Flip,
}

impl fmt::Display for SwapKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SwapKind::Exchange => "exchange",
            SwapKind::Blit => "blit",
            SwapKind::Flip => "flip",
        })
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SwapFlags: u32 {
        /// The flip request was rejected; completion skips the buffer
        /// exchange and scanout publication but still releases references.
        const FAILED_FLIP = 1 << 0;
        /// The flip had zero actual outputs. Logically complete at issue
        /// time, but the buffer-identity exchange still happens.
        const SYNTHETIC_FLIP = 1 << 1;
    }
}

/// An in-flight swap request.
#[derive(Debug)]
pub(crate) struct SwapCommand {
    pub(crate) kind: SwapKind,
    pub(crate) client: ClientId,
    /// Stable id, not a drawable reference: the drawable can be destroyed
    /// while we wait for the page-flip event.
    pub(crate) drawable: DrawableId,
    pub(crate) src: BufferId,
    pub(crate) dst: BufferId,
    /// Backing objects captured (and referenced) at schedule time; released
    /// at the end of completion, after the exchange has moved the records
    /// on to other memory.
    pub(crate) src_bo: BoId,
    pub(crate) dst_bo: BoId,
    /// Outstanding flip-completion events (one per flipped output).
    pub(crate) pending_events: u32,
    pub(crate) flags: SwapFlags,
    pub(crate) request: RequestToken,
}

/// Delivered to the extension core exactly once per scheduled swap (unless
/// the drawable died mid-flight, the one silent path).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapCompletion {
    pub client: ClientId,
    pub drawable: DrawableId,
    pub kind: SwapKind,
    pub request: RequestToken,
}

impl SwapScreen {
    /// Schedule a swap of `src` (the freshly rendered back buffer) into
    /// `dst` (the front). Flips when both buffers can scan out and the
    /// drawable is flip-eligible; otherwise copies.
    ///
    /// Returns `Err(SwapError::FlipFailed)` when the display rejects the
    /// flip; the command still runs to completion (references released, the
    /// client notified) through the normal path.
    #[allow(clippy::too_many_arguments)]
    pub fn schedule_swap(
        &mut self,
        win: &mut dyn WindowSystem,
        gem: &mut GemArena,
        display: &mut dyn DisplayLink,
        client: ClientId,
        drawable: DrawableId,
        dst: BufferId,
        src: BufferId,
        request: RequestToken,
    ) -> Result<()> {
        let info = win
            .lookup_drawable(drawable)
            .ok_or(SwapError::UnknownDrawable(drawable))?;

        // Resolve the current backing objects up front so a failure here
        // needs no unwinding.
        let src_bo = self.current_bo(win, drawable, src)?;
        let dst_bo = self.current_bo(win, drawable, dst)?;

        // Extra references keep the buffers and their backing memory alive
        // while we await the page-flip event.
        self.reference_buffer(src)?;
        self.reference_buffer(dst)?;
        gem.reference(src_bo)?;
        gem.reference(dst_bo)?;
        self.pending_flips += 1;

        let src_fb = gem.fb_id(src_bo)?;
        let dst_fb = gem.fb_id(dst_bo)?;

        // After a display mode change the back buffer keeps its original
        // size until the client asks for new buffers; flipping to a
        // framebuffer of stale dimensions would scan out garbage, so force a
        // copy for this one frame. The client's next buffer request yields
        // correctly sized buffers and flips resume.
        let do_flip = src_fb != 0
            && dst_fb != 0
            && self.flip_eligible(win, drawable)
            && gem.width(src_bo)? == gem.width(dst_bo)?
            && gem.height(src_bo)? == gem.height(dst_bo)?;

        self.next_token += 1;
        let token = self.next_token;

        let mut cmd = SwapCommand {
            kind: SwapKind::Blit,
            client,
            drawable,
            src,
            dst,
            src_bo,
            dst_bo,
            pending_events: 0,
            flags: SwapFlags::empty(),
            request,
        };

        if do_flip {
            cmd.kind = SwapKind::Flip;
            tracing::debug!(src_fb, dst_fb, "flipping");

            // External consumers may lag buffer destruction requests, but by
            // swap time they are done reading; process the backlog before
            // the hardware starts scanning out the new buffer.
            gem.flush_pending_deletions();

            match display.page_flip(drawable, src_fb, token) {
                Err(err) => {
                    cmd.flags |= SwapFlags::FAILED_FLIP;
                    // Some outputs may have flipped before the failure;
                    // their events still arrive and must be awaited before
                    // the buffers can be released.
                    cmd.pending_events = if display.delivers_flip_events() {
                        err.events_queued
                    } else {
                        0
                    };
                    tracing::warn!(%err, drawable, "page flip failed");
                    if cmd.pending_events == 0 {
                        self.complete(win, gem, display, cmd);
                    } else {
                        self.inflight.insert(token, cmd);
                    }
                    return Err(SwapError::FlipFailed);
                }
                Ok(events) => {
                    if events == 0 {
                        // No output was actually flipped; treat the request
                        // as instantly complete, but the buffer-identity
                        // exchange must still happen.
                        cmd.flags |= SwapFlags::SYNTHETIC_FLIP;
                    }
                    cmd.pending_events = if display.delivers_flip_events() {
                        events
                    } else {
                        0
                    };
                    if cmd.pending_events == 0 {
                        self.complete(win, gem, display, cmd);
                    } else {
                        self.inflight.insert(token, cmd);
                    }
                }
            }
        } else {
            let region = Rect {
                x: 0,
                y: 0,
                width: info.width,
                height: info.height,
            };
            self.copy_region(win, drawable, region, dst, src)?;
            self.complete(win, gem, display, cmd);
        }
        Ok(())
    }

    /// Feed one flip-completion event from the display event loop. The
    /// command completes when its last outstanding event arrives.
    pub fn handle_flip_event(
        &mut self,
        win: &mut dyn WindowSystem,
        gem: &mut GemArena,
        display: &mut dyn DisplayLink,
        token: FlipToken,
    ) {
        let done = match self.inflight.get_mut(&token) {
            Some(cmd) => {
                cmd.pending_events = cmd.pending_events.saturating_sub(1);
                cmd.pending_events == 0
            }
            None => {
                tracing::debug!(token, "flip event for unknown command");
                return;
            }
        };
        if done {
            if let Some(cmd) = self.inflight.remove(&token) {
                self.complete(win, gem, display, cmd);
            }
        }
    }

    /// The single completion routine. Exchanges buffer identities (flips
    /// only), notifies the client, publishes the new scanout buffer, and
    /// releases everything the schedule call pinned.
    fn complete(
        &mut self,
        win: &mut dyn WindowSystem,
        gem: &mut GemArena,
        display: &mut dyn DisplayLink,
        cmd: SwapCommand,
    ) {
        let SwapCommand {
            kind,
            client,
            drawable,
            src,
            dst,
            src_bo: old_src_bo,
            dst_bo: old_dst_bo,
            flags,
            request,
            ..
        } = cmd;

        let failed = flags.contains(SwapFlags::FAILED_FLIP);

        // The drawable may be gone; that is an expected race, not an error.
        // Client-visible steps are skipped, reference release is not.
        if win.lookup_drawable(drawable).is_some() {
            if !failed && kind == SwapKind::Flip {
                tracing::debug!(%kind, src, dst, "swap complete");
                self.exchange_buffers(win, drawable, src, dst);
                let back_left = self
                    .buffers
                    .get(&src)
                    .is_some_and(|buf| buf.attachment == Attachment::BackLeft);
                if back_left {
                    self.advance_ring(win, gem, drawable, src);
                }
            }

            self.completions.push(SwapCompletion {
                client,
                drawable,
                kind,
                request,
            });

            if !failed && kind == SwapKind::Flip {
                // The destination is the new front buffer; hand its memory
                // to the output hardware.
                if let Ok(bo) = self.current_bo(win, drawable, dst) {
                    display.set_scanout(bo);
                }
            }
        } else {
            tracing::debug!(drawable, "drawable destroyed while swap was in flight");
        }

        // Drop the extra references taken at schedule time. This can destroy
        // the buffers outright if the client already detached them.
        let _ = self.destroy_buffer(win, gem, src);
        let _ = self.destroy_buffer(win, gem, dst);
        let _ = gem.unreference(old_src_bo);
        let _ = gem.unreference(old_dst_bo);
        self.pending_flips -= 1;
    }

    /// Swap which physical memory is "front" and which is "back": exchange
    /// the backing surfaces' memory and the records' exported names. A
    /// logical exchange only; no pixels are copied.
    fn exchange_buffers(
        &mut self,
        win: &mut dyn WindowSystem,
        drawable: DrawableId,
        a: BufferId,
        b: BufferId,
    ) {
        let Some(a_surface) = self.buffer_surface(win, drawable, a) else {
            return;
        };
        let Some(b_surface) = self.buffer_surface(win, drawable, b) else {
            return;
        };
        win.exchange_backing(a_surface, b_surface);

        // The export names travel with the physical memory.
        let Some(a_name) = self.buffers.get(&a).map(|buf| buf.name) else {
            return;
        };
        let Some(b_name) = self.buffers.get(&b).map(|buf| buf.name) else {
            return;
        };
        if let Some(buf) = self.buffers.get_mut(&a) {
            buf.name = b_name;
        }
        if let Some(buf) = self.buffers.get_mut(&b) {
            buf.name = a_name;
        }
    }
}
