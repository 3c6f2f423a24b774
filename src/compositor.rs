//! Scene Compositor
//!
//! Drives the multi-pass assembly of one frame: opaque geometry with pick
//! metadata, weighted order-independent transparency, a hilite mask and the
//! final composite resolve, plus a synchronous read-back path for picking.
//!
//! # Frame sequence
//!
//! ```text
//! update -> clear -> Background -> SkyBox -> push_clip
//!   -> OpaqueLinear -> OpaquePlanar -> ping-pong -> OpaqueGeneral
//!   -> HiddenEdge
//!   -> [clear OIT -> Translucent -> Hilite -> composite resolve]
//!   -> pop_clip
//! ```
//!
//! The bracketed chain runs only when the command list raises composite
//! flags; a purely opaque frame leaves the opaque rendering as the final
//! image and never allocates or touches the OIT planes' contents.
//!
//! [`Compositor::read_pixels`] replays the opaque sequence in
//! [`FrameMode::ReadPixels`]: the general pass writes pick metadata too,
//! color-only passes are skipped, and the requested rectangle is then
//! transferred back to the CPU as a [`PixelBuffer`].

use crate::backend::{
    BlendMode, CompositeParams, DepthAction, DepthMode, OutputSelect, PassOps, PassState,
    RenderBackend, TargetFormat, TargetKey, ViewRect,
};
use crate::command::{CommandList, RenderPass};
use crate::error::{CompositorError, Result};
use crate::pick::{PickSources, PixelBuffer, PixelSelector};
use crate::strategy::{CompositeStrategy, FrameMode, for_capabilities};
use crate::targets::MemoryStatistics;

// ─── Frame state ─────────────────────────────────────────────────────────────

/// Hilite resolve appearance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HiliteSettings {
    /// Tint applied where the hilite mask is set.
    pub color: [f32; 3],
    /// How strongly visible hilited geometry mixes toward the tint, in
    /// `0.0..=1.0`.
    pub visible_ratio: f32,
}

impl Default for HiliteSettings {
    /// Cyan at a quarter mix.
    fn default() -> Self {
        Self {
            color: [0.0, 1.0, 1.0],
            visible_ratio: 0.25,
        }
    }
}

/// Per-frame view state handed to every draw entry point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    /// Viewport width in pixels.
    pub width: u32,
    /// Viewport height in pixels.
    pub height: u32,
    /// Background clear color for the opaque destination.
    pub background: [f64; 4],
    /// Hilite resolve appearance.
    pub hilite: HiliteSettings,
}

impl FrameState {
    /// A frame state with an opaque black background and default hilite.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            background: [0.0, 0.0, 0.0, 1.0],
            hilite: HiliteSettings::default(),
        }
    }
}

// ─── Frame stages ────────────────────────────────────────────────────────────

/// Frame sequencing markers.
///
/// Every frame advances through the opaque markers in order, whether or not
/// the corresponding pass had commands; the translucent markers appear only
/// on compositing frames. Transition legality is asserted in debug builds.
///
/// | Stage | Reached after |
/// |-------|---------------|
/// | `Idle` | frame end, or before the first frame |
/// | `TargetsValidated` | targets exist at the frame's dimensions |
/// | `OpaqueCleared` | color, pick planes and depth cleared |
/// | `BackgroundDrawn` | background pass |
/// | `SkyBoxDrawn` | sky box pass |
/// | `ClipActive` | clip volume pushed |
/// | `OpaqueDrawn` | linear, planar, ping-pong, general, hidden-edge |
/// | `TranslucentCleared` | OIT planes at their start values |
/// | `TranslucentDrawn` | weighted OIT pass |
/// | `HiliteDrawn` | hilite mask cleared and drawn |
/// | `Composited` | resolve into the output plane |
/// | `ClipInactive` | clip volume popped |
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum FrameStage {
    /// No frame in flight.
    Idle = 0,
    /// Render targets validated against the frame dimensions.
    TargetsValidated = 1,
    /// Opaque destination, pick planes and depth cleared.
    OpaqueCleared = 2,
    /// Background rendered (or skipped).
    BackgroundDrawn = 3,
    /// Sky box rendered (or skipped).
    SkyBoxDrawn = 4,
    /// Clip volume pushed.
    ClipActive = 5,
    /// All opaque sub-passes and the ping-pong done.
    OpaqueDrawn = 6,
    /// Accumulation and revealage at their clear values.
    TranslucentCleared = 7,
    /// Weighted OIT pass rendered.
    TranslucentDrawn = 8,
    /// Hilite mask rendered.
    HiliteDrawn = 9,
    /// Composite resolved into the output plane.
    Composited = 10,
    /// Clip volume popped.
    ClipInactive = 11,
}

impl FrameStage {
    /// Whether this stage may directly follow `prev`.
    #[must_use]
    pub const fn can_follow(self, prev: Self) -> bool {
        match self {
            Self::Idle => matches!(prev, Self::ClipInactive),
            Self::TargetsValidated => matches!(prev, Self::Idle | Self::TargetsValidated),
            Self::OpaqueCleared => matches!(prev, Self::TargetsValidated),
            Self::BackgroundDrawn => matches!(prev, Self::OpaqueCleared),
            Self::SkyBoxDrawn => matches!(prev, Self::BackgroundDrawn),
            Self::ClipActive => matches!(prev, Self::SkyBoxDrawn),
            Self::OpaqueDrawn => matches!(prev, Self::ClipActive),
            Self::TranslucentCleared => matches!(prev, Self::OpaqueDrawn),
            Self::TranslucentDrawn => matches!(prev, Self::TranslucentCleared),
            Self::HiliteDrawn => matches!(prev, Self::TranslucentDrawn),
            Self::Composited => matches!(prev, Self::HiliteDrawn),
            Self::ClipInactive => matches!(prev, Self::OpaqueDrawn | Self::Composited),
        }
    }

    /// Stage name (for debugging).
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::TargetsValidated => "TargetsValidated",
            Self::OpaqueCleared => "OpaqueCleared",
            Self::BackgroundDrawn => "BackgroundDrawn",
            Self::SkyBoxDrawn => "SkyBoxDrawn",
            Self::ClipActive => "ClipActive",
            Self::OpaqueDrawn => "OpaqueDrawn",
            Self::TranslucentCleared => "TranslucentCleared",
            Self::TranslucentDrawn => "TranslucentDrawn",
            Self::HiliteDrawn => "HiliteDrawn",
            Self::Composited => "Composited",
            Self::ClipInactive => "ClipInactive",
        }
    }
}

// ─── Compositor ──────────────────────────────────────────────────────────────

/// Multi-pass frame assembler over an explicit [`RenderBackend`].
///
/// The rendering strategy is chosen once, at construction, from the
/// backend's capability probe, and the compositor then owns the frame
/// ordering while the strategy owns the targets and attachment groups it
/// renders through. [`dispose`](Self::dispose) releases everything; a
/// compositor dropped with a live allocation can only warn, since release
/// needs the backend.
pub struct Compositor<B: RenderBackend> {
    strategy: Box<dyn CompositeStrategy<B>>,
    stage: FrameStage,
}

impl<B: RenderBackend> Compositor<B> {
    /// Creates a compositor for the backend's capabilities. No targets are
    /// allocated until the first [`update`](Self::update).
    #[must_use]
    pub fn new(backend: &B) -> Self {
        let caps = backend.capabilities();
        let strategy = for_capabilities::<B>(caps);
        log::info!(
            "compositor using {} strategy ({} attachments, {:?} float precision)",
            strategy.name(),
            caps.max_color_attachments,
            caps.float_precision,
        );
        Self {
            strategy,
            stage: FrameStage::Idle,
        }
    }

    /// Ensures the render targets exist at the frame's dimensions.
    ///
    /// A no-op when the live allocation already matches, so calling this
    /// every frame is free. On a size change the old targets are released
    /// before the new ones are allocated; an allocation failure aborts with
    /// nothing left behind.
    pub fn update(&mut self, backend: &mut B, frame: &FrameState) -> Result<()> {
        if frame.width == 0 || frame.height == 0 {
            return Err(CompositorError::InvalidDimensions {
                width: frame.width,
                height: frame.height,
            });
        }
        if self.strategy.dimensions() != Some((frame.width, frame.height)) {
            self.strategy.dispose(backend);
            if let Err(err) = self.strategy.allocate(backend, frame.width, frame.height) {
                log::error!("frame aborted, target allocation failed: {err}");
                self.stage = FrameStage::Idle;
                return Err(err);
            }
            log::debug!(
                "allocated {}x{} render targets, OIT format {:?}",
                frame.width,
                frame.height,
                self.strategy.oit_format(),
            );
        }
        self.advance(FrameStage::TargetsValidated);
        Ok(())
    }

    /// Renders one full frame from the bucketed command list.
    pub fn draw(
        &mut self,
        backend: &mut B,
        commands: &CommandList<B::Command>,
        frame: &FrameState,
    ) -> Result<()> {
        self.render_frame(backend, commands, frame, FrameMode::Normal)
    }

    /// Renders the pick metadata of a frame without disturbing the output
    /// plane: opaque geometry (including the general pass) writes element
    /// IDs and depth+order, while every color-only pass is skipped.
    pub fn draw_for_read_pixels(
        &mut self,
        backend: &mut B,
        commands: &CommandList<B::Command>,
        frame: &FrameState,
    ) -> Result<()> {
        self.render_frame(backend, commands, frame, FrameMode::ReadPixels)
    }

    /// Renders pick metadata and reads the selected planes over `rect`.
    ///
    /// Returns `Ok(None)` when the selector is empty, the rectangle falls
    /// outside the viewport, or every requested transfer failed; errors are
    /// reserved for an aborted frame.
    pub fn read_pixels(
        &mut self,
        backend: &mut B,
        commands: &CommandList<B::Command>,
        frame: &FrameState,
        rect: ViewRect,
        selector: PixelSelector,
    ) -> Result<Option<PixelBuffer>> {
        if selector.is_empty() {
            return Ok(None);
        }
        let Some(rect) = rect.clamped_to(frame.width, frame.height) else {
            return Ok(None);
        };
        self.draw_for_read_pixels(backend, commands, frame)?;
        let sources = self.pick_sources();
        Ok(PixelBuffer::read(backend, &sources, rect, selector))
    }

    /// Raw bytes of the depth+order plane over `rect`, without redrawing.
    ///
    /// Rows are ordered bottom-up. Returns `None` when nothing is allocated
    /// or the transfer fails; callers must not confuse that with a
    /// successful all-zero read.
    pub fn read_depth_and_order(&mut self, backend: &mut B, rect: ViewRect) -> Option<Vec<u8>> {
        let target = self.strategy.depth_order()?;
        self.read_plane(backend, target, rect, "depth+order")
    }

    /// Raw bytes of one element-ID half over `rect`, without redrawing.
    ///
    /// Rows are ordered bottom-up, as in
    /// [`read_depth_and_order`](Self::read_depth_and_order).
    pub fn read_element_ids(
        &mut self,
        backend: &mut B,
        high_half: bool,
        rect: ViewRect,
    ) -> Option<Vec<u8>> {
        let target = if high_half {
            self.strategy.element_id_high()?
        } else {
            self.strategy.element_id_low()?
        };
        let label = if high_half { "element-id-high" } else { "element-id-low" };
        self.read_plane(backend, target, rect, label)
    }

    /// The plane currently holding the low element-ID halves, resolved
    /// through the ping-pong borrow.
    #[must_use]
    pub fn element_id_low_texture(&self) -> Option<TargetKey> {
        self.strategy.element_id_low()
    }

    /// The plane currently holding the high element-ID halves.
    #[must_use]
    pub fn element_id_high_texture(&self) -> Option<TargetKey> {
        self.strategy.element_id_high()
    }

    /// The plane currently holding packed depth+order bytes.
    #[must_use]
    pub fn depth_order_texture(&self) -> Option<TargetKey> {
        self.strategy.depth_order()
    }

    /// Name of the strategy chosen at construction.
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// The current frame sequencing marker.
    #[inline]
    #[must_use]
    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    /// Format of the live OIT planes, if targets are allocated.
    #[must_use]
    pub fn oit_format(&self) -> Option<TargetFormat> {
        self.strategy.oit_format()
    }

    /// Estimated GPU bytes held by the live targets.
    #[must_use]
    pub fn memory_statistics(&self) -> MemoryStatistics {
        self.strategy.memory_statistics()
    }

    /// Releases every owned target and attachment group.
    pub fn dispose(&mut self, backend: &mut B) {
        self.strategy.dispose(backend);
        self.stage = FrameStage::Idle;
    }

    // ── Frame internals ─────────────────────────────────────────────────────

    fn render_frame(
        &mut self,
        backend: &mut B,
        commands: &CommandList<B::Command>,
        frame: &FrameState,
        mode: FrameMode,
    ) -> Result<()> {
        self.update(backend, frame)?;

        // A pick frame composites nothing, but still renders into the
        // internal color plane so the caller's output survives untouched.
        let flags = match mode {
            FrameMode::Normal => commands.composite_flags(),
            FrameMode::ReadPixels => crate::command::CompositeFlags::empty(),
        };
        let compositing = !flags.is_empty();
        let composite_dest = compositing || mode == FrameMode::ReadPixels;

        self.strategy.clear_opaque(backend, frame.background, composite_dest);
        self.advance(FrameStage::OpaqueCleared);

        if mode == FrameMode::Normal {
            self.draw_view_pass(backend, commands, RenderPass::Background, composite_dest);
        }
        self.advance(FrameStage::BackgroundDrawn);
        if mode == FrameMode::Normal {
            self.draw_view_pass(backend, commands, RenderPass::SkyBox, composite_dest);
        }
        self.advance(FrameStage::SkyBoxDrawn);

        backend.push_clip();
        self.advance(FrameStage::ClipActive);

        self.draw_opaque_pass(backend, commands, RenderPass::OpaqueLinear, composite_dest, mode);
        self.draw_opaque_pass(backend, commands, RenderPass::OpaquePlanar, composite_dest, mode);
        // Park the pick planes in the idle OIT targets so general and
        // hidden-edge techniques can sample what is on screen.
        self.strategy.ping_pong(backend);
        self.draw_opaque_pass(backend, commands, RenderPass::OpaqueGeneral, composite_dest, mode);
        if mode == FrameMode::Normal {
            self.draw_opaque_pass(backend, commands, RenderPass::HiddenEdge, composite_dest, mode);
        }
        self.strategy.reset_pick_slot();
        self.advance(FrameStage::OpaqueDrawn);

        if compositing {
            self.strategy.clear_translucent(backend);
            self.advance(FrameStage::TranslucentCleared);
            if !commands.is_empty(RenderPass::Translucent) {
                self.strategy
                    .draw_translucent(backend, commands.commands(RenderPass::Translucent));
            }
            self.advance(FrameStage::TranslucentDrawn);

            self.draw_hilite(backend, commands);
            self.advance(FrameStage::HiliteDrawn);

            if let (Some(output), Some(inputs)) =
                (self.strategy.present_group(), self.strategy.composite_inputs())
            {
                backend.composite(
                    output,
                    &inputs,
                    &CompositeParams {
                        flags,
                        hilite_color: frame.hilite.color,
                        hilite_ratio: frame.hilite.visible_ratio,
                    },
                );
            }
            self.advance(FrameStage::Composited);
        }

        backend.pop_clip();
        self.advance(FrameStage::ClipInactive);
        self.advance(FrameStage::Idle);
        Ok(())
    }

    /// Background and sky box: color only, no depth test.
    fn draw_view_pass(
        &mut self,
        backend: &mut B,
        commands: &CommandList<B::Command>,
        pass: RenderPass,
        composite_dest: bool,
    ) {
        if commands.is_empty(pass) {
            return;
        }
        let Some(group) = self.strategy.background_group(composite_dest) else {
            return;
        };
        backend.execute_pass(
            group,
            &PassOps::load(1).with_depth(DepthAction::Load),
            &PassState {
                pass,
                output: OutputSelect::Color,
                blend: BlendMode::Opaque,
                depth: DepthMode::Disabled,
                pick_planes: None,
            },
            commands.commands(pass),
        );
    }

    fn draw_opaque_pass(
        &mut self,
        backend: &mut B,
        commands: &CommandList<B::Command>,
        pass: RenderPass,
        composite_dest: bool,
        mode: FrameMode,
    ) {
        if commands.is_empty(pass) {
            return;
        }
        self.strategy
            .draw_opaque(backend, pass, commands.commands(pass), composite_dest, mode);
    }

    /// Clears the hilite mask, then renders hilited geometry into it with
    /// the depth test on and depth writes off.
    fn draw_hilite(&mut self, backend: &mut B, commands: &CommandList<B::Command>) {
        let Some(group) = self.strategy.hilite_group() else {
            return;
        };
        backend.execute_pass(
            group,
            &PassOps::clear([[0.0; 4]]).with_depth(DepthAction::Load),
            &hilite_state(),
            &[],
        );
        if !commands.is_empty(RenderPass::Hilite) {
            backend.execute_pass(
                group,
                &PassOps::load(1).with_depth(DepthAction::Load),
                &hilite_state(),
                commands.commands(RenderPass::Hilite),
            );
        }
    }

    /// The pick planes as the reader should sample them right now.
    fn pick_sources(&self) -> PickSources {
        PickSources {
            element_id_low: self.strategy.element_id_low(),
            element_id_high: self.strategy.element_id_high(),
            depth_order: self.strategy.depth_order(),
        }
    }

    fn read_plane(
        &mut self,
        backend: &mut B,
        target: TargetKey,
        rect: ViewRect,
        label: &str,
    ) -> Option<Vec<u8>> {
        let (width, height) = self.strategy.dimensions()?;
        let rect = rect.clamped_to(width, height)?;
        match backend.read_target(target, rect) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                log::warn!("{label} read-back failed: {err}");
                None
            }
        }
    }

    fn advance(&mut self, next: FrameStage) {
        debug_assert!(
            next.can_follow(self.stage),
            "frame stage {} cannot follow {}",
            next.name(),
            self.stage.name(),
        );
        self.stage = next;
    }
}

impl<B: RenderBackend> Drop for Compositor<B> {
    fn drop(&mut self) {
        if let Some((width, height)) = self.strategy.dimensions() {
            log::warn!(
                "compositor dropped with live {width}x{height} targets ({} bytes); call dispose()",
                self.strategy.memory_statistics().total(),
            );
        }
    }
}

fn hilite_state() -> PassState {
    PassState {
        pass: RenderPass::Hilite,
        output: OutputSelect::Hilite,
        blend: BlendMode::Opaque,
        depth: DepthMode::ReadOnly,
        pick_planes: None,
    }
}
