//! Render Target Set
//!
//! The compositor renders through seven intermediate targets:
//!
//! ```text
//!  ┌──────────────┬──────────────┬────────────────────────────────┐
//!  │ target       │ format       │ role                           │
//!  ├──────────────┼──────────────┼────────────────────────────────┤
//!  │ accumulation │ OIT format   │ weighted color sums            │
//!  │ revealage    │ OIT format   │ background visibility          │
//!  │ hilite       │ OIT format   │ hilite mask                    │
//!  │ color        │ RGBA8        │ opaque color when compositing  │
//!  │ id low       │ RGBA8        │ element ID, low 32 bits        │
//!  │ id high      │ RGBA8        │ element ID, high 32 bits       │
//!  │ depth+order  │ RGBA8        │ packed render order and depth  │
//!  └──────────────┴──────────────┴────────────────────────────────┘
//! ```
//!
//! The OIT format is decided once by the capability probe: full float where
//! 32-bit targets blend, half float where only 16-bit targets blend, and
//! 8-bit fixed point as the last resort. Accumulation, revealage and hilite
//! always share one format because the ping-pong borrow re-targets them as
//! temporary copies of the RGBA8 pick planes.
//!
//! Allocation is atomic: if any of the seven targets fails to allocate, the
//! ones already created are destroyed and the error propagates. A partial
//! set never escapes.

use smallvec::SmallVec;

use crate::backend::{RenderBackend, TargetDesc, TargetFormat, TargetKey};
use crate::error::Result;

/// Estimated GPU memory held by the compositor, split by role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStatistics {
    /// The compositable color plane.
    pub color_bytes: u64,
    /// Accumulation, revealage and hilite planes.
    pub oit_bytes: u64,
    /// Element-ID and depth+order planes.
    pub pick_bytes: u64,
    /// The shared depth-stencil buffer.
    pub depth_bytes: u64,
}

impl MemoryStatistics {
    /// Total estimated bytes.
    #[inline]
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.color_bytes + self.oit_bytes + self.pick_bytes + self.depth_bytes
    }
}

/// The seven intermediate render targets of one compositor, all sized to the
/// current viewport.
#[derive(Debug)]
pub struct RenderTargetSet {
    width: u32,
    height: u32,
    oit_format: TargetFormat,
    accumulation: TargetKey,
    revealage: TargetKey,
    hilite: TargetKey,
    color: TargetKey,
    element_id_low: TargetKey,
    element_id_high: TargetKey,
    depth_order: TargetKey,
}

impl RenderTargetSet {
    /// Allocates all seven targets at the given viewport size, rolling back
    /// on the first failure.
    pub fn allocate<B: RenderBackend>(backend: &mut B, width: u32, height: u32) -> Result<Self> {
        let oit_format = backend.capabilities().oit_format();
        let mut created: SmallVec<[TargetKey; 7]> = SmallVec::new();

        let accumulation = create(backend, &mut created, "oit-accumulation", width, height, oit_format)?;
        let revealage = create(backend, &mut created, "oit-revealage", width, height, oit_format)?;
        let hilite = create(backend, &mut created, "hilite-mask", width, height, oit_format)?;
        let color = create(backend, &mut created, "composite-color", width, height, TargetFormat::Rgba8)?;
        let element_id_low = create(backend, &mut created, "element-id-low", width, height, TargetFormat::Rgba8)?;
        let element_id_high = create(backend, &mut created, "element-id-high", width, height, TargetFormat::Rgba8)?;
        let depth_order = create(backend, &mut created, "depth-order", width, height, TargetFormat::Rgba8)?;

        Ok(Self {
            width,
            height,
            oit_format,
            accumulation,
            revealage,
            hilite,
            color,
            element_id_low,
            element_id_high,
            depth_order,
        })
    }

    /// Destroys every target. Stale keys are ignored by the backend, so
    /// releasing twice is harmless.
    pub fn release<B: RenderBackend>(&mut self, backend: &mut B) {
        for key in [
            self.accumulation,
            self.revealage,
            self.hilite,
            self.color,
            self.element_id_low,
            self.element_id_high,
            self.depth_order,
        ] {
            backend.destroy_target(key);
        }
    }

    /// Viewport size the set was allocated at.
    #[inline]
    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// The format shared by accumulation, revealage and hilite.
    #[inline]
    #[must_use]
    pub const fn oit_format(&self) -> TargetFormat {
        self.oit_format
    }

    /// OIT accumulation plane.
    #[inline]
    #[must_use]
    pub const fn accumulation(&self) -> TargetKey {
        self.accumulation
    }

    /// OIT revealage plane.
    #[inline]
    #[must_use]
    pub const fn revealage(&self) -> TargetKey {
        self.revealage
    }

    /// Hilite mask plane.
    #[inline]
    #[must_use]
    pub const fn hilite(&self) -> TargetKey {
        self.hilite
    }

    /// Opaque color plane used when the frame composites.
    #[inline]
    #[must_use]
    pub const fn color(&self) -> TargetKey {
        self.color
    }

    /// Element-ID plane, low 32 bits.
    #[inline]
    #[must_use]
    pub const fn element_id_low(&self) -> TargetKey {
        self.element_id_low
    }

    /// Element-ID plane, high 32 bits.
    #[inline]
    #[must_use]
    pub const fn element_id_high(&self) -> TargetKey {
        self.element_id_high
    }

    /// Packed depth+order plane.
    #[inline]
    #[must_use]
    pub const fn depth_order(&self) -> TargetKey {
        self.depth_order
    }

    /// Estimated GPU bytes held by the set, excluding the depth buffer,
    /// which belongs to the attachment layout.
    #[must_use]
    pub fn memory_statistics(&self) -> MemoryStatistics {
        let pixels = u64::from(self.width) * u64::from(self.height);
        let rgba8 = pixels * TargetFormat::Rgba8.bytes_per_pixel();
        MemoryStatistics {
            color_bytes: rgba8,
            oit_bytes: 3 * pixels * self.oit_format.bytes_per_pixel(),
            pick_bytes: 3 * rgba8,
            depth_bytes: 0,
        }
    }
}

fn create<B: RenderBackend>(
    backend: &mut B,
    created: &mut SmallVec<[TargetKey; 7]>,
    label: &'static str,
    width: u32,
    height: u32,
    format: TargetFormat,
) -> Result<TargetKey> {
    match backend.create_target(&TargetDesc {
        label,
        width,
        height,
        format,
    }) {
        Ok(key) => {
            created.push(key);
            Ok(key)
        }
        Err(err) => {
            log::error!("render target set rolled back at {label}: {err}");
            for key in created.drain(..) {
                backend.destroy_target(key);
            }
            Err(err)
        }
    }
}
