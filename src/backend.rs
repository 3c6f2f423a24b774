//! Render Backend Abstraction
//!
//! The compositor never talks to a global graphics context. Every capability
//! probe, resource allocation and pass execution goes through an explicit
//! [`RenderBackend`] handed in by the caller, so the whole frame pipeline can
//! run against the real wgpu device or against a software double in tests.
//!
//! # Design
//!
//! - Targets and attachment groups are referenced by [`slotmap`] keys, never
//!   by owned GPU objects. A stale key is harmless: destroying it is a no-op
//!   and binding it is a reported error, not undefined behavior.
//! - A group stores *keys*, so re-creating a target under the same key (for
//!   example the caller resizing the output plane) transparently re-routes
//!   every group that references it.
//! - Scene draw commands are opaque to the compositor. The backend carries
//!   the associated `Command` type and replays slices of it under a
//!   [`PassState`] describing which logical plane is being written and with
//!   which blend behavior.

use smallvec::SmallVec;

use crate::error::Result;

slotmap::new_key_type! {
    /// Handle to a backend-owned render target texture.
    pub struct TargetKey;

    /// Handle to a backend-owned attachment group.
    pub struct GroupKey;
}

// ─── Capabilities ────────────────────────────────────────────────────────────

/// Floating-point render precision available for the OIT planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPrecision {
    /// 32-bit float targets are renderable and blendable.
    Full,
    /// Only 16-bit float targets are blendable.
    Half,
    /// No blendable float target; OIT falls back to 8-bit fixed point.
    Fixed,
}

/// What the device probe found, captured once at backend construction.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Maximum simultaneous color attachments in one pass.
    pub max_color_attachments: u32,
    /// Best blendable float precision for intermediate targets.
    pub float_precision: FloatPrecision,
}

impl Capabilities {
    /// Whether the wide-attachment strategy (single pass writing color plus
    /// all three pick planes) can run on this device.
    #[inline]
    #[must_use]
    pub const fn supports_wide_attachments(&self) -> bool {
        self.max_color_attachments >= 4
    }

    /// The format shared by the accumulation, revealage and hilite targets.
    #[inline]
    #[must_use]
    pub const fn oit_format(&self) -> TargetFormat {
        match self.float_precision {
            FloatPrecision::Full => TargetFormat::Rgba32Float,
            FloatPrecision::Half => TargetFormat::Rgba16Float,
            FloatPrecision::Fixed => TargetFormat::Rgba8,
        }
    }
}

// ─── Targets and groups ──────────────────────────────────────────────────────

/// Pixel format of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetFormat {
    /// 8-bit normalized RGBA. All pick planes and the color plane use this.
    Rgba8,
    /// 16-bit float RGBA.
    Rgba16Float,
    /// 32-bit float RGBA.
    Rgba32Float,
    /// 24-bit depth with 8-bit stencil; the shared depth buffer.
    DepthStencil,
}

impl TargetFormat {
    /// Estimated bytes per pixel, for memory statistics.
    #[inline]
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u64 {
        match self {
            Self::Rgba8 | Self::DepthStencil => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// Description of one render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDesc {
    /// Debug label, also used in allocation failure reports.
    pub label: &'static str,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: TargetFormat,
}

/// Description of one attachment group: the color targets bound together as
/// a draw destination, optionally sharing the depth buffer.
///
/// Attachment order is part of the contract between a strategy and the
/// technique layer; see [`OutputSelect::All`].
#[derive(Debug, Clone)]
pub struct GroupDesc {
    /// Debug label.
    pub label: &'static str,
    /// Color attachments in bind order.
    pub colors: SmallVec<[TargetKey; 4]>,
    /// Shared depth-stencil attachment, if the group is depth tested.
    pub depth: Option<TargetKey>,
}

// ─── Pass execution ──────────────────────────────────────────────────────────

/// Load action for one color attachment at pass begin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadAction {
    /// Keep the existing contents.
    Load,
    /// Clear to the given RGBA value.
    Clear([f64; 4]),
}

/// Load action for the depth-stencil attachment at pass begin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthAction {
    /// Keep the existing depth and stencil.
    Load,
    /// Clear depth to the given value and stencil to zero.
    Clear(f32),
}

/// Per-attachment begin-of-pass actions.
///
/// `colors` must match the group's attachment count, and `depth` must be
/// `Some` exactly when the group carries the depth buffer.
#[derive(Debug, Clone)]
pub struct PassOps {
    /// One action per color attachment, in group order.
    pub colors: SmallVec<[LoadAction; 4]>,
    /// Action for the depth attachment.
    pub depth: Option<DepthAction>,
}

impl PassOps {
    /// All color attachments load their existing contents.
    #[must_use]
    pub fn load(count: usize) -> Self {
        Self {
            colors: std::iter::repeat_n(LoadAction::Load, count).collect(),
            depth: None,
        }
    }

    /// Each color attachment clears to its own value.
    #[must_use]
    pub fn clear(values: impl IntoIterator<Item = [f64; 4]>) -> Self {
        Self {
            colors: values.into_iter().map(LoadAction::Clear).collect(),
            depth: None,
        }
    }

    /// Sets the depth attachment action.
    #[must_use]
    pub fn with_depth(mut self, action: DepthAction) -> Self {
        self.depth = Some(action);
        self
    }
}

/// Which logical plane a pass writes.
///
/// The narrow strategy replays one sub-pass several times, once per plane;
/// the technique layer reads this to emit the matching fragment output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSelect {
    /// Every plane of the group at once (wide strategy). Attachment order is
    /// fixed: destination color first, then element-ID low, element-ID high,
    /// depth+order — or accumulation then revealage for translucent passes.
    All,
    /// The color destination.
    Color,
    /// Low 32 bits of the element ID.
    ElementId0,
    /// High 32 bits of the element ID.
    ElementId1,
    /// Packed render order and depth fraction.
    DepthOrder,
    /// OIT accumulation plane.
    Accumulation,
    /// OIT revealage plane.
    Revealage,
    /// Hilite mask plane.
    Hilite,
}

/// Blend behavior the technique layer must use for a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// No blending; fragments replace the destination.
    Opaque,
    /// Weighted OIT, accumulation and revealage bound together with
    /// per-attachment blending (wide strategy).
    OitDual,
    /// Weighted OIT accumulation plane alone: additive `One + One`.
    OitAccumulation,
    /// Weighted OIT revealage plane alone: `Zero + OneMinusSrc`.
    OitRevealage,
}

/// Depth usage of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DepthMode {
    /// Test against and write the shared depth buffer.
    ReadWrite,
    /// Test only; translucent and hilite geometry never writes depth.
    ReadOnly,
    /// No depth test; background and sky box run before any geometry.
    Disabled,
}

/// The pick planes a technique may sample during a pass, already resolved
/// through the ping-pong borrow. `None` while the dedicated planes are bound
/// as attachments and therefore unreadable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PickPlanes {
    /// Low 32 bits of the element ID.
    pub element_id_low: TargetKey,
    /// High 32 bits of the element ID.
    pub element_id_high: TargetKey,
    /// Packed render order and depth fraction.
    pub depth_order: TargetKey,
}

/// Everything the technique layer needs to replay one pass.
#[derive(Debug, Clone, Copy)]
pub struct PassState {
    /// Which pass bucket is being replayed.
    pub pass: crate::command::RenderPass,
    /// Which logical plane the replay writes.
    pub output: OutputSelect,
    /// Blend behavior for the bound attachments.
    pub blend: BlendMode,
    /// Depth usage.
    pub depth: DepthMode,
    /// Pick planes readable during this pass, if any.
    pub pick_planes: Option<PickPlanes>,
}

// ─── Composite resolve ───────────────────────────────────────────────────────

/// The four textures the composite resolve samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompositeInputs {
    /// Opaque color as rendered so far.
    pub color: TargetKey,
    /// OIT accumulation plane.
    pub accumulation: TargetKey,
    /// OIT revealage plane.
    pub revealage: TargetKey,
    /// Hilite mask plane.
    pub hilite: TargetKey,
}

/// Per-frame parameters of the composite resolve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeParams {
    /// Which composite terms participate.
    pub flags: crate::command::CompositeFlags,
    /// Hilite tint applied where the mask is set.
    pub hilite_color: [f32; 3],
    /// How strongly visible hilited geometry mixes toward the tint.
    pub hilite_ratio: f32,
}

// ─── View rectangles ─────────────────────────────────────────────────────────

/// An axis-aligned rectangle in top-left-origin view coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewRect {
    /// Left edge in pixels.
    pub left: u32,
    /// Top edge in pixels.
    pub top: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl ViewRect {
    /// Creates a rectangle from its top-left corner and size.
    #[inline]
    #[must_use]
    pub const fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    /// One past the right edge.
    #[inline]
    #[must_use]
    pub const fn right(&self) -> u32 {
        self.left + self.width
    }

    /// One past the bottom edge.
    #[inline]
    #[must_use]
    pub const fn bottom(&self) -> u32 {
        self.top + self.height
    }

    /// Number of pixels covered.
    #[inline]
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether the rectangle covers no pixels.
    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether a view coordinate falls inside the rectangle.
    #[inline]
    #[must_use]
    pub const fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.left && x < self.right() && y >= self.top && y < self.bottom()
    }

    /// Intersects the rectangle with a `width` x `height` viewport, returning
    /// `None` when nothing remains.
    #[must_use]
    pub fn clamped_to(&self, width: u32, height: u32) -> Option<Self> {
        if self.left >= width || self.top >= height || self.is_empty() {
            return None;
        }
        let clamped = Self {
            left: self.left,
            top: self.top,
            width: self.width.min(width - self.left),
            height: self.height.min(height - self.top),
        };
        (!clamped.is_empty()).then_some(clamped)
    }
}

// ─── The backend trait ───────────────────────────────────────────────────────

/// Explicit capability-and-resource context for the compositor.
///
/// One backend owns the device-side storage for targets and groups and knows
/// how to replay scene commands, run the screen-space resolve draws, and
/// transfer pixels back to the CPU. [`crate::gpu::WgpuBackend`] implements
/// this over a real device; tests implement it over software framebuffers.
pub trait RenderBackend {
    /// Opaque scene draw command replayed by the technique layer.
    type Command;

    /// Device capabilities, captured once at construction.
    fn capabilities(&self) -> Capabilities;

    /// The caller-managed output color plane. The compositor renders into it
    /// but never allocates or resizes it.
    fn output_target(&self) -> TargetKey;

    /// Creates a render target. Allocation failures are reported, never
    /// silently downgraded.
    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetKey>;

    /// Destroys a render target. Destroying a stale key is a no-op.
    fn destroy_target(&mut self, key: TargetKey);

    /// Creates an attachment group over existing targets.
    fn create_group(&mut self, desc: &GroupDesc) -> Result<GroupKey>;

    /// Destroys an attachment group. Destroying a stale key is a no-op.
    fn destroy_group(&mut self, key: GroupKey);

    /// Executes one render pass: applies `ops` to the group's attachments,
    /// then replays `commands` under `state`. An empty command slice still
    /// applies the load actions, which is how clears are expressed.
    fn execute_pass(
        &mut self,
        group: GroupKey,
        ops: &PassOps,
        state: &PassState,
        commands: &[Self::Command],
    );

    /// Fullscreen resolve of the composite inputs into `output`.
    fn composite(&mut self, output: GroupKey, inputs: &CompositeInputs, params: &CompositeParams);

    /// Fullscreen copy of the three pick planes into the ping-pong group, in
    /// attachment order: element-ID low, element-ID high, depth+order.
    fn copy_pick_planes(&mut self, dest: GroupKey, sources: &PickPlanes);

    /// Fullscreen copy of one texture into a single-attachment group.
    fn copy_target(&mut self, dest: GroupKey, source: TargetKey);

    /// Synchronous rectangle read-back of an 8-bit RGBA target.
    ///
    /// Returns 4 bytes per pixel, row-major, with rows ordered bottom-up:
    /// the first returned row is the *bottom* row of `rect`.
    fn read_target(&mut self, target: TargetKey, rect: ViewRect) -> Result<Vec<u8>>;

    /// Pushes the active clip volume; brackets the geometry passes.
    fn push_clip(&mut self);

    /// Pops the active clip volume.
    fn pop_clip(&mut self);
}
