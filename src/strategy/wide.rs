//! Wide-Attachment Strategy
//!
//! On hardware with four or more simultaneous color attachments, linear and
//! planar opaque geometry renders color and all three pick planes in a
//! single pass, and the ping-pong borrow is one three-output copy draw.

use crate::attachments::{self, WideLayout};
use crate::backend::{
    BlendMode, CompositeInputs, DepthAction, DepthMode, GroupKey, OutputSelect, PassOps,
    PassState, RenderBackend, TargetFormat, TargetKey,
};
use crate::command::RenderPass;
use crate::error::Result;
use crate::targets::{MemoryStatistics, RenderTargetSet};

use super::{
    ACCUMULATION_CLEAR, CompositeStrategy, FrameMode, PickSlot, REVEALAGE_CLEAR, borrowed_planes,
    dedicated_planes, writes_pick_planes,
};

/// Single-pass multi-attachment rendering.
pub struct WideStrategy {
    resources: Option<Resources>,
}

struct Resources {
    targets: RenderTargetSet,
    layout: WideLayout,
    pick_slot: PickSlot,
}

impl WideStrategy {
    /// Creates the strategy with nothing allocated.
    #[must_use]
    pub fn new() -> Self {
        Self { resources: None }
    }
}

impl Default for WideStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: RenderBackend> CompositeStrategy<B> for WideStrategy {
    fn name(&self) -> &'static str {
        "wide"
    }

    fn allocate(&mut self, backend: &mut B, width: u32, height: u32) -> Result<()> {
        debug_assert!(self.resources.is_none(), "allocate over a live target set");
        let mut targets = RenderTargetSet::allocate(backend, width, height)?;
        let layout = match WideLayout::build(backend, &targets, width, height) {
            Ok(layout) => layout,
            Err(err) => {
                targets.release(backend);
                return Err(err);
            }
        };
        self.resources = Some(Resources {
            targets,
            layout,
            pick_slot: PickSlot::Dedicated,
        });
        Ok(())
    }

    fn dispose(&mut self, backend: &mut B) {
        if let Some(mut res) = self.resources.take() {
            res.layout.release(backend);
            res.targets.release(backend);
        }
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.resources.as_ref().map(|r| r.targets.dimensions())
    }

    fn oit_format(&self) -> Option<TargetFormat> {
        self.resources.as_ref().map(|r| r.targets.oit_format())
    }

    fn memory_statistics(&self) -> MemoryStatistics {
        self.resources.as_ref().map_or_else(MemoryStatistics::default, |r| {
            let mut stats = r.targets.memory_statistics();
            let (width, height) = r.targets.dimensions();
            stats.depth_bytes = attachments::depth_memory(width, height);
            stats
        })
    }

    fn clear_opaque(&mut self, backend: &mut B, background: [f64; 4], composite_dest: bool) {
        let Some(res) = self.resources.as_ref() else {
            return;
        };
        let group = if composite_dest {
            res.layout.full_composite
        } else {
            res.layout.full_direct
        };
        let zero = [0.0; 4];
        backend.execute_pass(
            group,
            &PassOps::clear([background, zero, zero, zero]).with_depth(DepthAction::Clear(1.0)),
            &PassState {
                pass: RenderPass::OpaqueLinear,
                output: OutputSelect::All,
                blend: BlendMode::Opaque,
                depth: DepthMode::ReadWrite,
                pick_planes: None,
            },
            &[],
        );
    }

    fn draw_opaque(
        &mut self,
        backend: &mut B,
        pass: RenderPass,
        commands: &[B::Command],
        composite_dest: bool,
        mode: FrameMode,
    ) {
        let Some(res) = self.resources.as_ref() else {
            return;
        };
        let (group, output, attachments) = if writes_pick_planes(pass, mode) {
            let group = if composite_dest {
                res.layout.full_composite
            } else {
                res.layout.full_direct
            };
            (group, OutputSelect::All, 4)
        } else {
            let group = if composite_dest {
                res.layout.color_composite
            } else {
                res.layout.color_direct
            };
            (group, OutputSelect::Color, 1)
        };
        // The dedicated planes are only samplable once ping-pong has parked
        // copies in the OIT targets.
        let pick_planes =
            (res.pick_slot == PickSlot::Borrowed).then(|| borrowed_planes(&res.targets));
        backend.execute_pass(
            group,
            &PassOps::load(attachments).with_depth(DepthAction::Load),
            &PassState {
                pass,
                output,
                blend: BlendMode::Opaque,
                depth: DepthMode::ReadWrite,
                pick_planes,
            },
            commands,
        );
    }

    fn ping_pong(&mut self, backend: &mut B) {
        let Some(res) = self.resources.as_mut() else {
            return;
        };
        backend.copy_pick_planes(res.layout.ping_pong, &dedicated_planes(&res.targets));
        res.pick_slot = PickSlot::Borrowed;
    }

    fn reset_pick_slot(&mut self) {
        if let Some(res) = self.resources.as_mut() {
            res.pick_slot = PickSlot::Dedicated;
        }
    }

    fn clear_translucent(&mut self, backend: &mut B) {
        let Some(res) = self.resources.as_ref() else {
            return;
        };
        backend.execute_pass(
            res.layout.oit,
            &PassOps::clear([ACCUMULATION_CLEAR, REVEALAGE_CLEAR]).with_depth(DepthAction::Load),
            &translucent_state(),
            &[],
        );
    }

    fn draw_translucent(&mut self, backend: &mut B, commands: &[B::Command]) {
        let Some(res) = self.resources.as_ref() else {
            return;
        };
        backend.execute_pass(
            res.layout.oit,
            &PassOps::load(2).with_depth(DepthAction::Load),
            &translucent_state(),
            commands,
        );
    }

    fn background_group(&self, composite_dest: bool) -> Option<GroupKey> {
        self.resources.as_ref().map(|r| {
            if composite_dest {
                r.layout.color_composite
            } else {
                r.layout.color_direct
            }
        })
    }

    fn hilite_group(&self) -> Option<GroupKey> {
        self.resources.as_ref().map(|r| r.layout.hilite)
    }

    fn present_group(&self) -> Option<GroupKey> {
        self.resources.as_ref().map(|r| r.layout.present)
    }

    fn composite_inputs(&self) -> Option<CompositeInputs> {
        self.resources.as_ref().map(|r| CompositeInputs {
            color: r.targets.color(),
            accumulation: r.targets.accumulation(),
            revealage: r.targets.revealage(),
            hilite: r.targets.hilite(),
        })
    }

    fn pick_slot(&self) -> PickSlot {
        self.resources
            .as_ref()
            .map_or(PickSlot::Dedicated, |r| r.pick_slot)
    }

    fn element_id_low(&self) -> Option<TargetKey> {
        self.resources.as_ref().map(|r| match r.pick_slot {
            PickSlot::Dedicated => r.targets.element_id_low(),
            PickSlot::Borrowed => r.targets.accumulation(),
        })
    }

    fn element_id_high(&self) -> Option<TargetKey> {
        self.resources.as_ref().map(|r| match r.pick_slot {
            PickSlot::Dedicated => r.targets.element_id_high(),
            PickSlot::Borrowed => r.targets.revealage(),
        })
    }

    fn depth_order(&self) -> Option<TargetKey> {
        self.resources.as_ref().map(|r| match r.pick_slot {
            PickSlot::Dedicated => r.targets.depth_order(),
            PickSlot::Borrowed => r.targets.hilite(),
        })
    }
}

/// One pass over accumulation and revealage with per-attachment blending.
fn translucent_state() -> PassState {
    PassState {
        pass: RenderPass::Translucent,
        output: OutputSelect::All,
        blend: BlendMode::OitDual,
        depth: DepthMode::ReadOnly,
        pick_planes: None,
    }
}
