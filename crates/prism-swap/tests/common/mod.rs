//! Mock windowing and display collaborators shared by the integration
//! tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};

use prism_gem::{BoId, GemArena};
use prism_kms::{
    DisplayLink, DrawableId, FlipIssueError, FlipToken, KmsError, VblankClock, VblankStamp,
};
use prism_swap::{
    Attachment, BlitTarget, BufferId, DrawableInfo, DrawableKind, Rect, SurfaceId, SwapConfig,
    SwapScreen, WindowSystem, MIN_CORE_VERSION,
};

#[derive(Debug)]
pub struct MockSurface {
    pub bo: BoId,
    pub pitch: u32,
    pub refcnt: u32,
}

#[derive(Debug)]
pub struct MockDrawable {
    pub info: DrawableInfo,
    pub surface: SurfaceId,
}

#[derive(Default)]
pub struct MockWindowSystem {
    pub drawables: HashMap<DrawableId, MockDrawable>,
    pub surfaces: HashMap<SurfaceId, MockSurface>,
    next_surface: SurfaceId,
    /// Number of `create_surface` calls the engine has made.
    pub created: usize,
    pub copies: Vec<(BlitTarget, BlitTarget, Rect)>,
    pub exchanges: Vec<(SurfaceId, SurfaceId)>,
    pub fail_next_create: bool,
}

impl MockWindowSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_surface(&mut self, gem: &mut GemArena, width: u32, height: u32) -> SurfaceId {
        let bo = gem.create(width, height);
        self.next_surface += 1;
        let id = self.next_surface;
        self.surfaces.insert(
            id,
            MockSurface {
                bo,
                pitch: width * 4,
                refcnt: 1,
            },
        );
        id
    }

    /// Add an on-screen window whose surface is already being scanned out
    /// (its buffer object has a framebuffer attached, like a real screen's
    /// front buffer).
    pub fn add_window(
        &mut self,
        gem: &mut GemArena,
        id: DrawableId,
        width: u32,
        height: u32,
        flip_capable: bool,
    ) -> DrawableId {
        let surface = self.alloc_surface(gem, width, height);
        let bo = self.surfaces[&surface].bo;
        gem.add_fb(bo).expect("window surface can always scan out");
        self.drawables.insert(
            id,
            MockDrawable {
                info: DrawableInfo {
                    width,
                    height,
                    depth: 24,
                    bits_per_pixel: 32,
                    kind: DrawableKind::Window,
                    flip_capable,
                },
                surface,
            },
        );
        id
    }

    pub fn remove_drawable(&mut self, gem: &mut GemArena, id: DrawableId) {
        if let Some(drawable) = self.drawables.remove(&id) {
            self.release_surface(gem, drawable.surface);
        }
    }

    pub fn set_flip_capable(&mut self, id: DrawableId, flip_capable: bool) {
        if let Some(drawable) = self.drawables.get_mut(&id) {
            drawable.info.flip_capable = flip_capable;
        }
    }

    /// Simulate a display mode change: the window gets a freshly allocated
    /// surface of the new size while old back buffers keep theirs.
    pub fn resize_window(&mut self, gem: &mut GemArena, id: DrawableId, width: u32, height: u32) {
        let surface = self.alloc_surface(gem, width, height);
        let bo = self.surfaces[&surface].bo;
        gem.add_fb(bo).expect("window surface can always scan out");
        let old = self.drawables.get_mut(&id).map(|drawable| {
            drawable.info.width = width;
            drawable.info.height = height;
            std::mem::replace(&mut drawable.surface, surface)
        });
        if let Some(old) = old {
            self.release_surface(gem, old);
        }
    }

    fn release_surface(&mut self, gem: &mut GemArena, surface: SurfaceId) {
        let Some(surf) = self.surfaces.get_mut(&surface) else {
            return;
        };
        surf.refcnt -= 1;
        if surf.refcnt > 0 {
            return;
        }
        if let Some(surf) = self.surfaces.remove(&surface) {
            gem.unreference(surf.bo).expect("surface held a reference");
        }
    }

    pub fn surface_refcount(&self, surface: SurfaceId) -> Option<u32> {
        self.surfaces.get(&surface).map(|surf| surf.refcnt)
    }
}

impl WindowSystem for MockWindowSystem {
    fn lookup_drawable(&self, id: DrawableId) -> Option<DrawableInfo> {
        self.drawables.get(&id).map(|drawable| drawable.info)
    }

    fn window_surface(&self, id: DrawableId) -> Option<SurfaceId> {
        self.drawables.get(&id).map(|drawable| drawable.surface)
    }

    fn create_surface(
        &mut self,
        gem: &mut GemArena,
        width: u32,
        height: u32,
        _depth: u8,
        _flip_capable: bool,
    ) -> Option<SurfaceId> {
        if self.fail_next_create {
            self.fail_next_create = false;
            return None;
        }
        self.created += 1;
        Some(self.alloc_surface(gem, width, height))
    }

    fn reference_surface(&mut self, surface: SurfaceId) {
        if let Some(surf) = self.surfaces.get_mut(&surface) {
            surf.refcnt += 1;
        }
    }

    fn destroy_surface(&mut self, gem: &mut GemArena, surface: SurfaceId) {
        self.release_surface(gem, surface);
    }

    fn surface_bo(&self, surface: SurfaceId) -> Option<BoId> {
        self.surfaces.get(&surface).map(|surf| surf.bo)
    }

    fn surface_pitch(&self, surface: SurfaceId) -> u32 {
        self.surfaces.get(&surface).map(|surf| surf.pitch).unwrap_or(0)
    }

    fn exchange_backing(&mut self, a: SurfaceId, b: SurfaceId) {
        self.exchanges.push((a, b));
        if a == b {
            return;
        }
        let Some(a_surf) = self.surfaces.get(&a).map(|surf| (surf.bo, surf.pitch)) else {
            return;
        };
        let Some(b_surf) = self.surfaces.get(&b).map(|surf| (surf.bo, surf.pitch)) else {
            return;
        };
        if let Some(surf) = self.surfaces.get_mut(&a) {
            surf.bo = b_surf.0;
            surf.pitch = b_surf.1;
        }
        if let Some(surf) = self.surfaces.get_mut(&b) {
            surf.bo = a_surf.0;
            surf.pitch = a_surf.1;
        }
    }

    fn copy_area(&mut self, src: BlitTarget, dst: BlitTarget, region: Rect) {
        self.copies.push((src, dst, region));
    }
}

/// What the mock display does with a page-flip request.
#[derive(Debug, Clone, Copy)]
pub enum FlipBehavior {
    /// Accept and expect `n` completion events.
    Events(u32),
    /// Accept, but no output actually flips (synthetic).
    NoOutputs,
    /// Reject after `events_queued` per-output flips already went out.
    Fail { errno: i32, events_queued: u32 },
}

pub struct MockDisplay {
    pub behavior: FlipBehavior,
    pub delivers_events: bool,
    /// Completion events awaiting delivery, oldest first.
    pub pending: VecDeque<FlipToken>,
    pub flips: Vec<(DrawableId, u32, FlipToken)>,
    pub scanouts: Vec<BoId>,
    pub vblank: Option<VblankClock>,
    pub auth_ok: bool,
}

impl Default for MockDisplay {
    fn default() -> Self {
        Self {
            behavior: FlipBehavior::Events(1),
            delivers_events: true,
            pending: VecDeque::new(),
            flips: Vec::new(),
            scanouts: Vec::new(),
            vblank: None,
            auth_ok: true,
        }
    }
}

impl DisplayLink for MockDisplay {
    fn page_flip(
        &mut self,
        drawable: DrawableId,
        fb_id: u32,
        token: FlipToken,
    ) -> Result<u32, FlipIssueError> {
        match self.behavior {
            FlipBehavior::Events(events) => {
                self.flips.push((drawable, fb_id, token));
                if self.delivers_events {
                    for _ in 0..events {
                        self.pending.push_back(token);
                    }
                }
                Ok(events)
            }
            FlipBehavior::NoOutputs => {
                self.flips.push((drawable, fb_id, token));
                Ok(0)
            }
            FlipBehavior::Fail {
                errno,
                events_queued,
            } => {
                if self.delivers_events {
                    for _ in 0..events_queued {
                        self.pending.push_back(token);
                    }
                }
                Err(FlipIssueError {
                    errno,
                    events_queued,
                })
            }
        }
    }

    fn delivers_flip_events(&self) -> bool {
        self.delivers_events
    }

    fn supports_vblank_query(&self) -> bool {
        self.vblank.is_some()
    }

    fn query_vblank(&mut self, relative: u64) -> Result<VblankStamp, KmsError> {
        match &self.vblank {
            Some(clock) => {
                let mut stamp = clock.stamp();
                stamp.sequence += relative;
                Ok(stamp)
            }
            None => Err(KmsError::VblankUnsupported),
        }
    }

    fn wait_for_event(&mut self) -> Option<FlipToken> {
        self.pending.pop_front()
    }

    fn set_scanout(&mut self, bo: BoId) {
        self.scanouts.push(bo);
    }

    fn auth_token(&mut self, _magic: u32) -> Result<(), KmsError> {
        if self.auth_ok {
            Ok(())
        } else {
            Err(KmsError::AuthRejected)
        }
    }
}

pub const DRAWABLE: DrawableId = 0x100;
pub const CLIENT: u32 = 7;

pub struct Fixture {
    pub screen: SwapScreen,
    pub win: MockWindowSystem,
    pub gem: GemArena,
    pub display: MockDisplay,
    pub drawable: DrawableId,
    pub front: BufferId,
    pub back: BufferId,
}

impl Fixture {
    /// Schedule a swap of `back` into `front` with a distinct request token
    /// and deliver every completion event the display queued for it.
    pub fn run_swap(&mut self, request: u64) {
        self.schedule(request).expect("swap schedules cleanly");
        self.deliver_all_events();
    }

    pub fn schedule(&mut self, request: u64) -> prism_swap::Result<()> {
        self.screen.schedule_swap(
            &mut self.win,
            &mut self.gem,
            &mut self.display,
            CLIENT,
            self.drawable,
            self.front,
            self.back,
            request,
        )
    }

    pub fn deliver_all_events(&mut self) {
        while let Some(token) = self.display.pending.pop_front() {
            self.screen
                .handle_flip_event(&mut self.win, &mut self.gem, &mut self.display, token);
        }
    }

    pub fn front_bo(&self) -> BoId {
        let surface = self
            .win
            .window_surface(self.drawable)
            .expect("window surface exists");
        self.win.surface_bo(surface).expect("surface has a bo")
    }

    pub fn back_bo(&self) -> BoId {
        let surface = self
            .screen
            .buffer(self.back)
            .expect("back buffer exists")
            .current_surface()
            .expect("back buffer has a surface");
        self.win.surface_bo(surface).expect("surface has a bo")
    }
}

pub fn fixture_with(config: SwapConfig) -> Fixture {
    let mut gem = GemArena::new();
    let mut win = MockWindowSystem::new();
    let drawable = win.add_window(&mut gem, DRAWABLE, 640, 480, true);
    let mut screen = SwapScreen::init(MIN_CORE_VERSION, config).expect("valid init");
    let front = screen
        .create_buffer(&mut win, &mut gem, drawable, Attachment::FrontLeft, 0)
        .expect("front buffer");
    let back = screen
        .create_buffer(&mut win, &mut gem, drawable, Attachment::BackLeft, 0)
        .expect("back buffer");
    Fixture {
        screen,
        win,
        gem,
        display: MockDisplay::default(),
        drawable,
        front,
        back,
    }
}

pub fn fixture(buffer_count: u32) -> Fixture {
    fixture_with(SwapConfig {
        buffer_count,
        no_flip: false,
    })
}
