//! Screen-level state: configuration, registration, and teardown.
//!
//! A [`SwapScreen`] is the per-screen context object for the swap engine. It
//! owns the buffer records, the table of in-flight swap commands, and the
//! pending-flip counter that teardown drains. Collaborators (window system,
//! buffer-object arena, display link) are passed into each call; nothing
//! here is global.

use std::collections::HashMap;

use prism_gem::{BoId, GemArena};
use prism_kms::{DisplayLink, DrawableId, FlipToken, VblankStamp};

use crate::buffer::{Attachment, BufferId, SlotRing, SwapBuffer};
use crate::error::{Result, SwapError};
use crate::swap::{ClientId, SwapCommand, SwapCompletion};
use crate::window::{BlitTarget, DrawableKind, Rect, SurfaceId, WindowSystem};

/// Hard cap on the configurable swap-chain depth. Each buffer past the
/// second is another scanout-capable allocation per drawable.
pub const MAX_SWAP_BUFFERS: u32 = 16;

/// Oldest buffer-management extension core this engine registers with.
pub const MIN_CORE_VERSION: CoreVersion = CoreVersion { major: 1, minor: 1 };

/// Version reported by the extension core at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CoreVersion {
    pub major: u32,
    pub minor: u32,
}

#[derive(Debug, Clone)]
pub struct SwapConfig {
    /// Total buffers per swap chain, front included. 2 = double buffering;
    /// higher values give back buffers a ring of `buffer_count - 1` slots.
    pub buffer_count: u32,
    /// Administratively disable page flipping; every swap becomes a blit.
    pub no_flip: bool,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            buffer_count: 2,
            no_flip: false,
        }
    }
}

impl SwapConfig {
    fn validate(&self) -> Result<()> {
        if self.buffer_count < 2 {
            return Err(SwapError::InvalidConfig("buffer_count must be at least 2"));
        }
        if self.buffer_count > MAX_SWAP_BUFFERS {
            return Err(SwapError::InvalidConfig(
                "buffer_count exceeds the supported maximum",
            ));
        }
        Ok(())
    }
}

/// Per-screen swap engine state.
#[derive(Debug)]
pub struct SwapScreen {
    pub(crate) config: SwapConfig,
    pub(crate) buffers: HashMap<BufferId, SwapBuffer>,
    next_buffer: BufferId,
    pub(crate) inflight: HashMap<FlipToken, SwapCommand>,
    pub(crate) next_token: FlipToken,
    pub(crate) pending_flips: u32,
    pub(crate) completions: Vec<SwapCompletion>,
}

impl SwapScreen {
    /// Register the swap engine with the buffer-management extension core.
    /// Fails if the core is older than [`MIN_CORE_VERSION`] or the
    /// configuration is invalid.
    pub fn init(core: CoreVersion, config: SwapConfig) -> Result<Self> {
        if core < MIN_CORE_VERSION {
            return Err(SwapError::UnsupportedCoreVersion {
                major: core.major,
                minor: core.minor,
                min_major: MIN_CORE_VERSION.major,
                min_minor: MIN_CORE_VERSION.minor,
            });
        }
        config.validate()?;
        tracing::debug!(
            buffer_count = config.buffer_count,
            no_flip = config.no_flip,
            "swap engine registered"
        );
        Ok(Self {
            config,
            buffers: HashMap::new(),
            next_buffer: 0,
            inflight: HashMap::new(),
            next_token: 0,
            pending_flips: 0,
            completions: Vec::new(),
        })
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    /// Swap commands still awaiting hardware completion (plus those inside
    /// their synchronous completion window).
    pub fn pending_flips(&self) -> u32 {
        self.pending_flips
    }

    pub fn buffer(&self, id: BufferId) -> Option<&SwapBuffer> {
        self.buffers.get(&id)
    }

    /// Drain the completion notifications queued since the last call. The
    /// extension core forwards each record to its client exactly once.
    pub fn take_completions(&mut self) -> Vec<SwapCompletion> {
        std::mem::take(&mut self.completions)
    }

    /// Whether swaps on `drawable` may page flip right now: flipping not
    /// administratively disabled, the drawable is an on-screen window, and
    /// the extension core reports it flip-capable.
    pub fn flip_eligible(&self, win: &dyn WindowSystem, drawable: DrawableId) -> bool {
        if self.config.no_flip {
            return false;
        }
        match win.lookup_drawable(drawable) {
            Some(info) => info.kind == DrawableKind::Window && info.flip_capable,
            None => false,
        }
    }

    /// Create a buffer record for one attachment point of `drawable`.
    ///
    /// `format` is the client's buffer format and may differ from the
    /// drawable's; it is carried through untouched (conversion happens in
    /// the copy path, which is not ours).
    pub fn create_buffer(
        &mut self,
        win: &mut dyn WindowSystem,
        gem: &mut GemArena,
        drawable: DrawableId,
        attachment: Attachment,
        format: u32,
    ) -> Result<BufferId> {
        let info = win
            .lookup_drawable(drawable)
            .ok_or(SwapError::UnknownDrawable(drawable))?;
        let eligible = self.flip_eligible(win, drawable);

        let surface = if attachment == Attachment::FrontLeft {
            // The drawable's own surface backs the front buffer. Hold a
            // reference as a lifetime anchor only; uses re-resolve through
            // the drawable because the windowing layer may swap the surface
            // out underneath us.
            let surface = win
                .window_surface(drawable)
                .ok_or(SwapError::Allocation("drawable has no window surface"))?;
            win.reference_surface(surface);
            surface
        } else {
            match win.create_surface(gem, info.width, info.height, info.depth, eligible) {
                Some(surface) => surface,
                None => {
                    tracing::error!(drawable, ?attachment, "failed to create back buffer");
                    return Err(SwapError::Allocation("back buffer surface"));
                }
            }
        };

        let Some(bo) = win.surface_bo(surface) else {
            tracing::error!(
                drawable,
                surface,
                "refusing to wrap a surface with no buffer object backing"
            );
            win.destroy_surface(gem, surface);
            return Err(SwapError::Allocation("surface buffer object"));
        };
        let name = match gem.name_of(bo) {
            Ok(name) => name,
            Err(_) => {
                win.destroy_surface(gem, surface);
                return Err(SwapError::Allocation("buffer object export name"));
            }
        };

        let capacity = if attachment == Attachment::BackLeft && self.config.buffer_count > 2 {
            (self.config.buffer_count - 1) as usize
        } else {
            1
        };
        let mut ring = SlotRing::new(capacity);
        ring.set_current_surface(surface);

        let mut buf = SwapBuffer {
            attachment,
            name,
            pitch: win.surface_pitch(surface),
            cpp: u32::from(info.bits_per_pixel) / 8,
            format,
            ring,
            refcnt: 1,
            attempted_fb_alloc: false,
        };

        if eligible && attachment != Attachment::FrontLeft {
            // Attach a scanout framebuffer now so the first swap can flip.
            // Failure is non-fatal (the display controller may not scan out
            // this format, or scanout memory may be exhausted); the buffer
            // stays usable via blit. If the window is unmapped right now we
            // never get here, and reuse_buffer_notify attaches once it maps.
            if let Err(err) = gem.add_fb(bo) {
                tracing::warn!(%err, "falling back to blitting a flippable window");
            }
            buf.attempted_fb_alloc = true;
        }

        self.next_buffer += 1;
        let id = self.next_buffer;
        self.buffers.insert(id, buf);
        Ok(id)
    }

    /// Take an extra reference, keeping the record alive across an
    /// asynchronous boundary.
    pub fn reference_buffer(&mut self, id: BufferId) -> Result<()> {
        let buf = self
            .buffers
            .get_mut(&id)
            .ok_or(SwapError::UnknownBuffer(id))?;
        buf.refcnt += 1;
        Ok(())
    }

    /// Drop one reference; at zero, destroy the record and every surface in
    /// its ring. Safe to call while an in-flight swap command still shares
    /// the record (the command's reference keeps it alive).
    pub fn destroy_buffer(
        &mut self,
        win: &mut dyn WindowSystem,
        gem: &mut GemArena,
        id: BufferId,
    ) -> Result<()> {
        let buf = self
            .buffers
            .get_mut(&id)
            .ok_or(SwapError::UnknownBuffer(id))?;
        buf.refcnt -= 1;
        if buf.refcnt > 0 {
            return Ok(());
        }
        if let Some(buf) = self.buffers.remove(&id) {
            for surface in buf.ring.occupied() {
                win.destroy_surface(gem, surface);
            }
        }
        Ok(())
    }

    /// Called when the extension core is about to hand an existing buffer
    /// back to a client. Implements the lazy scanout attachment policy:
    /// attach at most once per map cycle, detach (and rearm) when the
    /// drawable stops being flip-eligible.
    pub fn reuse_buffer_notify(
        &mut self,
        win: &mut dyn WindowSystem,
        gem: &mut GemArena,
        drawable: DrawableId,
        id: BufferId,
    ) -> Result<()> {
        let eligible = self.flip_eligible(win, drawable);
        let buf = self
            .buffers
            .get_mut(&id)
            .ok_or(SwapError::UnknownBuffer(id))?;
        if buf.attachment == Attachment::FrontLeft {
            return Ok(());
        }

        // The policy keys off the creation-time slot.
        let Some(surface) = buf.ring.first_surface() else {
            return Ok(());
        };
        let Some(bo) = win.surface_bo(surface) else {
            return Ok(());
        };
        let fb_id = gem.fb_id(bo)?;

        if eligible && !buf.attempted_fb_alloc && fb_id == 0 {
            // Unflippable-to-flippable transition: the buffer was created
            // before the window was mapped and the window is mapped now.
            if let Err(err) = gem.add_fb(bo) {
                tracing::warn!(%err, "falling back to blitting a flippable window");
            }
            buf.attempted_fb_alloc = true;
        }

        if !eligible && fb_id != 0 {
            // Flippable-to-unflippable transition: release the scarce
            // scanout attachment and rearm the attempt for a future map.
            buf.attempted_fb_alloc = false;
            gem.rm_fb(bo)?;
        }
        Ok(())
    }

    /// Copy `region` from the source buffer to the destination buffer.
    pub fn copy_region(
        &mut self,
        win: &mut dyn WindowSystem,
        drawable: DrawableId,
        region: Rect,
        dst: BufferId,
        src: BufferId,
    ) -> Result<()> {
        let src_target = self.blit_target(drawable, src)?;
        let dst_target = self.blit_target(drawable, dst)?;
        win.copy_area(src_target, dst_target, region);
        Ok(())
    }

    pub(crate) fn blit_target(&self, drawable: DrawableId, id: BufferId) -> Result<BlitTarget> {
        let buf = self.buffers.get(&id).ok_or(SwapError::UnknownBuffer(id))?;
        if buf.attachment == Attachment::FrontLeft {
            Ok(BlitTarget::Drawable(drawable))
        } else {
            buf.current_surface()
                .map(BlitTarget::Surface)
                .ok_or(SwapError::Allocation("back buffer has no current surface"))
        }
    }

    /// The live surface behind a buffer: front buffers resolve through the
    /// drawable, back buffers through their ring.
    pub(crate) fn buffer_surface(
        &self,
        win: &dyn WindowSystem,
        drawable: DrawableId,
        id: BufferId,
    ) -> Option<SurfaceId> {
        let buf = self.buffers.get(&id)?;
        if buf.attachment == Attachment::FrontLeft {
            win.window_surface(drawable)
        } else {
            buf.current_surface()
        }
    }

    pub(crate) fn current_bo(
        &self,
        win: &dyn WindowSystem,
        drawable: DrawableId,
        id: BufferId,
    ) -> Result<BoId> {
        if !self.buffers.contains_key(&id) {
            return Err(SwapError::UnknownBuffer(id));
        }
        let surface = self
            .buffer_surface(win, drawable, id)
            .ok_or(SwapError::Allocation("buffer has no current surface"))?;
        win.surface_bo(surface)
            .ok_or(SwapError::Allocation("surface buffer object"))
    }

    /// Timestamp and sequence number of the drawable's next relative vblank.
    pub fn frame_timestamp(&self, display: &mut dyn DisplayLink) -> Result<VblankStamp> {
        if !display.supports_vblank_query() {
            return Err(SwapError::Unsupported("vblank queries"));
        }
        display.query_vblank(0).map_err(|err| {
            tracing::error!(%err, "vblank counter query failed");
            SwapError::Kms(err)
        })
    }

    /// Frame-counter waits are not supported by this driver.
    pub fn schedule_wait_frame_count(
        &mut self,
        _client: ClientId,
        _drawable: DrawableId,
        _target: u64,
        _divisor: u64,
        _remainder: u64,
    ) -> Result<()> {
        tracing::error!("frame-count waits are not implemented");
        Err(SwapError::Unsupported("frame-count waits"))
    }

    /// Validate a client's authentication token with the display layer.
    pub fn authenticate(&mut self, display: &mut dyn DisplayLink, magic: u32) -> Result<()> {
        display.auth_token(magic)?;
        Ok(())
    }

    /// Unregister from the extension core: block, draining display events,
    /// until every in-flight flip has completed so no buffer or command
    /// outlives the screen.
    pub fn close(
        &mut self,
        win: &mut dyn WindowSystem,
        gem: &mut GemArena,
        display: &mut dyn DisplayLink,
    ) {
        while self.pending_flips > 0 {
            tracing::debug!(pending = self.pending_flips, "waiting for in-flight flips");
            match display.wait_for_event() {
                Some(token) => self.handle_flip_event(win, gem, display, token),
                None => {
                    tracing::warn!(
                        pending = self.pending_flips,
                        "display event source drained with flips still pending"
                    );
                    break;
                }
            }
        }
    }
}
