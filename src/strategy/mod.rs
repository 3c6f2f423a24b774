//! Composite Strategies
//!
//! The compositor runs the same logical frame on very different hardware.
//! Devices that bind four or more color attachments render color and all
//! three pick planes in one pass (the *wide* strategy); devices limited to a
//! single attachment replay each sub-pass once per plane (the *narrow*
//! strategy). The choice is made once per compositor from the capability
//! probe and never revisited mid-frame.
//!
//! # Weighted OIT contract
//!
//! Both strategies share one blending contract for translucent geometry:
//!
//! - the accumulation plane clears to transparent black and blends
//!   additively (`One + One`), receiving `(r·a·w, g·a·w, b·a·w, a·w)` per
//!   fragment, where `w` is the technique's depth weight;
//! - the revealage plane clears to one and blends `Zero + OneMinusSrc`,
//!   receiving the fragment's alpha, so it converges to the fraction of
//!   background still visible;
//! - the composite resolve computes
//!   `color · revealage + (accum.rgb / max(accum.a, ε)) · (1 − revealage)`.
//!
//! # Ping-pong borrow
//!
//! Between the planar and general opaque sub-passes, the pick planes are
//! copied into the idle OIT targets so later opaque techniques can sample
//! "what is on screen" while still writing fresh pick data. [`PickSlot`]
//! tags which physical planes currently hold pick-valid data; every
//! accessor resolves through the tag instead of comparing texture handles.

mod narrow;
mod wide;

pub use narrow::NarrowStrategy;
pub use wide::WideStrategy;

use crate::backend::{
    Capabilities, CompositeInputs, GroupKey, PickPlanes, RenderBackend, TargetFormat, TargetKey,
};
use crate::command::RenderPass;
use crate::error::Result;
use crate::targets::{MemoryStatistics, RenderTargetSet};

/// Clear value of the OIT accumulation plane.
pub const ACCUMULATION_CLEAR: [f64; 4] = [0.0, 0.0, 0.0, 0.0];

/// Clear value of the OIT revealage plane: everything visible.
pub const REVEALAGE_CLEAR: [f64; 4] = [1.0, 1.0, 1.0, 1.0];

/// Guard against division by a zero accumulation alpha in the resolve.
pub const COMPOSITE_EPSILON: f32 = 1e-4;

/// What a frame is drawn for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameMode {
    /// A full visual frame.
    Normal,
    /// Pick metadata only: opaque geometry renders its element IDs, depth
    /// and order, while background, sky box, translucency, hilite and the
    /// composite resolve are skipped.
    ReadPixels,
}

/// Which physical planes currently hold pick-valid data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickSlot {
    /// The dedicated element-ID and depth+order targets.
    Dedicated,
    /// The OIT targets, holding ping-pong copies while the dedicated planes
    /// are bound for writing.
    Borrowed,
}

/// One hardware-adapted rendering of the compositor's frame sequence.
///
/// Strategies own the target set and attachment layout they render through;
/// the compositor owns the frame ordering and feeds every method the
/// explicit backend. Methods other than [`allocate`](Self::allocate) are
/// no-ops until allocation succeeds.
pub trait CompositeStrategy<B: RenderBackend> {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Allocates targets and attachment groups at the viewport size.
    fn allocate(&mut self, backend: &mut B, width: u32, height: u32) -> Result<()>;

    /// Releases every owned target and group.
    fn dispose(&mut self, backend: &mut B);

    /// Viewport size of the live allocation.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Format of the live OIT planes.
    fn oit_format(&self) -> Option<TargetFormat>;

    /// Estimated GPU bytes currently held.
    fn memory_statistics(&self) -> MemoryStatistics;

    // ── Opaque phase ────────────────────────────────────────────────────────

    /// Clears the opaque destination, the pick planes and the depth buffer.
    /// Pick planes always clear to the zero sentinel; only the color
    /// destination takes the background color.
    fn clear_opaque(&mut self, backend: &mut B, background: [f64; 4], composite_dest: bool);

    /// Renders one opaque sub-pass. Linear and planar geometry writes color
    /// and pick planes; general and hidden-edge geometry writes color only,
    /// except that a [`FrameMode::ReadPixels`] frame routes the general pass
    /// into the pick planes too.
    fn draw_opaque(
        &mut self,
        backend: &mut B,
        pass: RenderPass,
        commands: &[B::Command],
        composite_dest: bool,
        mode: FrameMode,
    );

    /// Copies the pick planes into the idle OIT targets and flips
    /// [`PickSlot`] to [`PickSlot::Borrowed`].
    fn ping_pong(&mut self, backend: &mut B);

    /// Returns pick resolution to the dedicated planes at the end of the
    /// opaque phase.
    fn reset_pick_slot(&mut self);

    // ── Translucent phase ───────────────────────────────────────────────────

    /// Clears accumulation and revealage to their OIT start values.
    fn clear_translucent(&mut self, backend: &mut B);

    /// Renders the translucent pass under the weighted OIT contract.
    fn draw_translucent(&mut self, backend: &mut B, commands: &[B::Command]);

    // ── Group accessors ─────────────────────────────────────────────────────

    /// Single-color group the background and sky box render into.
    fn background_group(&self, composite_dest: bool) -> Option<GroupKey>;

    /// Hilite mask group.
    fn hilite_group(&self) -> Option<GroupKey>;

    /// Composite resolve destination over the output plane.
    fn present_group(&self) -> Option<GroupKey>;

    /// The four planes the composite resolve samples.
    fn composite_inputs(&self) -> Option<CompositeInputs>;

    // ── Pick plane resolution ───────────────────────────────────────────────

    /// Which physical planes are currently pick-valid.
    fn pick_slot(&self) -> PickSlot;

    /// Element-ID low plane, resolved through [`PickSlot`].
    fn element_id_low(&self) -> Option<TargetKey>;

    /// Element-ID high plane, resolved through [`PickSlot`].
    fn element_id_high(&self) -> Option<TargetKey>;

    /// Depth+order plane, resolved through [`PickSlot`].
    fn depth_order(&self) -> Option<TargetKey>;
}

/// Picks the strategy matching the probed capabilities.
pub(crate) fn for_capabilities<B: RenderBackend>(
    caps: Capabilities,
) -> Box<dyn CompositeStrategy<B>> {
    if caps.supports_wide_attachments() {
        Box::new(WideStrategy::new())
    } else {
        Box::new(NarrowStrategy::new())
    }
}

/// Whether a pass writes pick metadata in the given mode.
pub(crate) fn writes_pick_planes(pass: RenderPass, mode: FrameMode) -> bool {
    matches!(pass, RenderPass::OpaqueLinear | RenderPass::OpaquePlanar)
        || (mode == FrameMode::ReadPixels && pass == RenderPass::OpaqueGeneral)
}

/// The OIT planes in their role as ping-pong homes of the pick planes.
pub(crate) fn borrowed_planes(targets: &RenderTargetSet) -> PickPlanes {
    PickPlanes {
        element_id_low: targets.accumulation(),
        element_id_high: targets.revealage(),
        depth_order: targets.hilite(),
    }
}

/// The dedicated pick planes.
pub(crate) fn dedicated_planes(targets: &RenderTargetSet) -> PickPlanes {
    PickPlanes {
        element_id_low: targets.element_id_low(),
        element_id_high: targets.element_id_high(),
        depth_order: targets.depth_order(),
    }
}
