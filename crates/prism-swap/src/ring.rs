//! Multi-buffer ring advancement.
//!
//! After a real flip of a BackLeft buffer in a chain deeper than double
//! buffering, the record moves on to the next slot in its ring so the client
//! renders into memory the display is not reading. Slots are allocated
//! lazily on first visit; once every slot has a surface, laps around the
//! ring allocate nothing. An allocation failure permanently shrinks the
//! ring instead of failing the swap.

use prism_gem::GemArena;
use prism_kms::DrawableId;

use crate::buffer::BufferId;
use crate::screen::SwapScreen;
use crate::window::{SurfaceId, WindowSystem};

impl SwapScreen {
    pub(crate) fn advance_ring(
        &mut self,
        win: &mut dyn WindowSystem,
        gem: &mut GemArena,
        drawable: DrawableId,
        id: BufferId,
    ) {
        if self.config.buffer_count <= 2 {
            // Double buffering exchanges in place; there is no ring to walk.
            return;
        }
        let eligible = self.flip_eligible(win, drawable);
        let Some(buf) = self.buffers.get_mut(&id) else {
            return;
        };

        buf.ring.advance();

        if let Some(surface) = buf.ring.current_surface() {
            // Slot populated on an earlier lap: republish its name, no
            // allocation.
            if let Some(bo) = win.surface_bo(surface) {
                if let Ok(name) = gem.name_of(bo) {
                    buf.name = name;
                }
            }
            return;
        }

        match alloc_ring_surface(win, gem, drawable, eligible) {
            Some((surface, name)) => {
                buf.ring.set_current_surface(surface);
                buf.name = name;
            }
            None => {
                // Slot 0 always exists, so there is a previous slot to fall
                // back to; the chain keeps operating at the reduced depth.
                let requested = buf.ring.active() + 1;
                buf.ring.retreat_and_shrink();
                tracing::warn!(
                    requested,
                    effective = buf.ring.active() + 1,
                    "buffer allocation failed, reducing swap chain depth for this drawable"
                );
            }
        }
    }
}

fn alloc_ring_surface(
    win: &mut dyn WindowSystem,
    gem: &mut GemArena,
    drawable: DrawableId,
    flip_capable: bool,
) -> Option<(SurfaceId, u32)> {
    let info = win.lookup_drawable(drawable)?;
    let surface = win.create_surface(gem, info.width, info.height, info.depth, flip_capable)?;

    let Some(bo) = win.surface_bo(surface) else {
        tracing::warn!(
            drawable,
            "refusing to wrap a surface with no buffer object backing"
        );
        win.destroy_surface(gem, surface);
        return None;
    };
    let Ok(name) = gem.name_of(bo) else {
        win.destroy_surface(gem, surface);
        return None;
    };

    if gem.fb_id(bo) == Ok(0) {
        // Extra ring slots are only ever allocated while the chain is
        // flipping, so the attach is expected to succeed; failure loses the
        // slot.
        if let Err(err) = gem.add_fb(bo) {
            tracing::error!(%err, "could not attach framebuffer to additional back buffer");
            win.destroy_surface(gem, surface);
            return None;
        }
    }

    Some((surface, name))
}
