//! Windowing/drawable collaborator interface.
//!
//! The swap engine treats the windowing layer as opaque: it creates and
//! destroys backing surfaces, resolves drawables by stable id, and executes
//! area copies, but never looks inside a surface. Surfaces are
//! reference-counted by the windowing layer itself; the engine only pairs
//! its creates/references with destroys.

use prism_gem::{BoId, GemArena};

pub use prism_kms::DrawableId;

/// Handle to a windowing-layer pixel surface.
pub type SurfaceId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawableKind {
    /// An on-screen window; the only kind that can page flip.
    Window,
    /// Off-screen storage; swaps always blit.
    Offscreen,
}

#[derive(Debug, Clone, Copy)]
pub struct DrawableInfo {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub bits_per_pixel: u8,
    pub kind: DrawableKind,
    /// The buffer-management extension's verdict on whether this drawable
    /// may flip (fullscreen, unredirected, etc.).
    pub flip_capable: bool,
}

/// Destination or source of an area copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlitTarget {
    /// The drawable itself (front buffers draw to the window).
    Drawable(DrawableId),
    /// A specific backing surface (back buffers).
    Surface(SurfaceId),
}

pub trait WindowSystem {
    /// Resolve a drawable by its stable id. Returns `None` once the drawable
    /// has been destroyed; in-flight swaps hit this race routinely.
    fn lookup_drawable(&self, id: DrawableId) -> Option<DrawableInfo>;

    /// The drawable's own surface. Re-resolved at every use for front
    /// buffers: the windowing layer may reallocate it (e.g. on resize).
    fn window_surface(&self, id: DrawableId) -> Option<SurfaceId>;

    /// Allocate a backing surface. `flip_capable` requests scanout-capable
    /// placement. Returns `None` on allocation failure.
    fn create_surface(
        &mut self,
        gem: &mut GemArena,
        width: u32,
        height: u32,
        depth: u8,
        flip_capable: bool,
    ) -> Option<SurfaceId>;

    fn reference_surface(&mut self, surface: SurfaceId);

    /// Drop one reference; the surface (and its buffer-object reference) is
    /// freed when the count reaches zero.
    fn destroy_surface(&mut self, gem: &mut GemArena, surface: SurfaceId);

    /// The GPU memory object backing the surface.
    fn surface_bo(&self, surface: SurfaceId) -> Option<BoId>;

    fn surface_pitch(&self, surface: SurfaceId) -> u32;

    /// Swap the backing memory of two surfaces in place. This is the flip's
    /// logical exchange of which physical buffer is "front": no pixels move.
    fn exchange_backing(&mut self, a: SurfaceId, b: SurfaceId);

    fn copy_area(&mut self, src: BlitTarget, dst: BlitTarget, region: Rect);
}
