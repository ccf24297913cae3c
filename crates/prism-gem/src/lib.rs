#![forbid(unsafe_code)]

//! Reference-counted arena of GPU buffer objects.
//!
//! Every scanout-capable allocation in the driver is a `GemObject` owned by a
//! [`GemArena`] and addressed by [`BoId`]. Objects are shared between the swap
//! engine, the windowing layer, and external consumers via explicit
//! [`GemArena::reference`] / [`GemArena::unreference`] pairs; the longest
//! holder wins.
//!
//! Deletion is deferred: dropping the last reference parks the object on a
//! pending-deletion list rather than freeing it, because external consumers
//! may still be reading from a buffer after the client has asked for it to be
//! destroyed. [`GemArena::flush_pending_deletions`] performs the actual frees
//! and is called at points where the consumer is known to be done (the swap
//! engine flushes before issuing a page flip).
//!
//! Scanout framebuffer attachments are a scarce resource. The arena enforces
//! an optional attachment budget so callers exercise their blit fallbacks
//! instead of assuming `add_fb` always succeeds.

use std::collections::HashMap;

use thiserror::Error;

/// Handle to a buffer object inside a [`GemArena`].
pub type BoId = u32;

pub type Result<T> = std::result::Result<T, GemError>;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GemError {
    #[error("unknown buffer object {0}")]
    UnknownObject(BoId),

    #[error("unknown export name {0}")]
    UnknownName(u32),

    #[error("scanout framebuffer budget exhausted ({budget} attachments)")]
    ScanoutExhausted { budget: u32 },
}

#[derive(Debug, Clone)]
struct GemObject {
    /// Cross-process export name. Stable for the object's lifetime.
    name: u32,
    width: u32,
    height: u32,
    refcnt: u32,
    /// Scanout framebuffer id; 0 means no attachment.
    fb_id: u32,
    /// Set once the refcount hits zero; the object stays resolvable until the
    /// next [`GemArena::flush_pending_deletions`].
    pending_delete: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GemArenaConfig {
    /// Maximum number of simultaneous scanout framebuffer attachments.
    /// `None` means unlimited.
    pub scanout_budget: Option<u32>,
}

#[derive(Debug, Default)]
pub struct GemArena {
    objects: HashMap<BoId, GemObject>,
    pending: Vec<BoId>,
    next_id: BoId,
    next_name: u32,
    next_fb_id: u32,
    scanout_budget: Option<u32>,
    attached_fbs: u32,
    attach_attempts: u64,
}

impl GemArena {
    pub fn new() -> Self {
        Self::with_config(GemArenaConfig::default())
    }

    pub fn with_config(config: GemArenaConfig) -> Self {
        Self {
            scanout_budget: config.scanout_budget,
            ..Self::default()
        }
    }

    /// Allocate a new buffer object with an initial reference count of 1.
    pub fn create(&mut self, width: u32, height: u32) -> BoId {
        self.next_id += 1;
        self.next_name += 1;
        let id = self.next_id;
        self.objects.insert(
            id,
            GemObject {
                name: self.next_name,
                width,
                height,
                refcnt: 1,
                fb_id: 0,
                pending_delete: false,
            },
        );
        id
    }

    fn object(&self, id: BoId) -> Result<&GemObject> {
        self.objects.get(&id).ok_or(GemError::UnknownObject(id))
    }

    /// Take an additional reference. Fails for objects already parked for
    /// deletion: a zero-reference object must never be resurrected.
    pub fn reference(&mut self, id: BoId) -> Result<()> {
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or(GemError::UnknownObject(id))?;
        if obj.pending_delete {
            return Err(GemError::UnknownObject(id));
        }
        obj.refcnt += 1;
        Ok(())
    }

    /// Drop one reference. When the count reaches zero the object is parked
    /// on the pending-deletion list; it is freed by the next
    /// [`flush_pending_deletions`](Self::flush_pending_deletions).
    pub fn unreference(&mut self, id: BoId) -> Result<()> {
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or(GemError::UnknownObject(id))?;
        if obj.pending_delete {
            return Err(GemError::UnknownObject(id));
        }
        obj.refcnt -= 1;
        if obj.refcnt == 0 {
            obj.pending_delete = true;
            self.pending.push(id);
        }
        Ok(())
    }

    /// Free every object whose last reference has been dropped.
    pub fn flush_pending_deletions(&mut self) {
        for id in self.pending.drain(..) {
            if let Some(obj) = self.objects.remove(&id) {
                if obj.fb_id != 0 {
                    self.attached_fbs -= 1;
                }
            }
        }
    }

    pub fn name_of(&self, id: BoId) -> Result<u32> {
        Ok(self.object(id)?.name)
    }

    /// Reverse lookup of an export name. Pending-delete objects still
    /// resolve; consumers may hold a name across the deletion request.
    pub fn from_name(&self, name: u32) -> Result<BoId> {
        self.objects
            .iter()
            .find(|(_, obj)| obj.name == name)
            .map(|(&id, _)| id)
            .ok_or(GemError::UnknownName(name))
    }

    pub fn width(&self, id: BoId) -> Result<u32> {
        Ok(self.object(id)?.width)
    }

    pub fn height(&self, id: BoId) -> Result<u32> {
        Ok(self.object(id)?.height)
    }

    /// Attach a scanout framebuffer to the object, returning its framebuffer
    /// id. Idempotent: an already-attached object returns its existing id
    /// without consuming budget. Fails with [`GemError::ScanoutExhausted`]
    /// when the attachment budget is spent.
    pub fn add_fb(&mut self, id: BoId) -> Result<u32> {
        let budget = self.scanout_budget;
        let attached = self.attached_fbs;
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or(GemError::UnknownObject(id))?;
        if obj.fb_id != 0 {
            return Ok(obj.fb_id);
        }
        self.attach_attempts += 1;
        if let Some(budget) = budget {
            if attached >= budget {
                return Err(GemError::ScanoutExhausted { budget });
            }
        }
        self.next_fb_id += 1;
        obj.fb_id = self.next_fb_id;
        self.attached_fbs += 1;
        Ok(obj.fb_id)
    }

    /// Detach the scanout framebuffer, releasing its budget slot. No-op for
    /// objects with no attachment.
    pub fn rm_fb(&mut self, id: BoId) -> Result<()> {
        let obj = self
            .objects
            .get_mut(&id)
            .ok_or(GemError::UnknownObject(id))?;
        if obj.fb_id != 0 {
            obj.fb_id = 0;
            self.attached_fbs -= 1;
        }
        Ok(())
    }

    /// Framebuffer id of the object's scanout attachment; 0 means none.
    pub fn fb_id(&self, id: BoId) -> Result<u32> {
        Ok(self.object(id)?.fb_id)
    }

    pub fn refcount(&self, id: BoId) -> Result<u32> {
        Ok(self.object(id)?.refcnt)
    }

    /// Objects still resident, including those parked for deletion.
    pub fn live_objects(&self) -> usize {
        self.objects.len()
    }

    pub fn pending_deletions(&self) -> usize {
        self.pending.len()
    }

    /// Total scanout attach attempts, counting failed ones. Attach attempts
    /// are rationed by callers (one per map cycle), so this doubles as a
    /// cheap probe for policy tests and leak hunts.
    pub fn scanout_attach_attempts(&self) -> u64 {
        self.attach_attempts
    }
}
