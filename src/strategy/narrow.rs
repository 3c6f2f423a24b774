//! Narrow-Attachment Strategy
//!
//! On hardware limited to a single color attachment, every opaque sub-pass
//! that needs pick metadata replays its command list once per plane, with
//! [`OutputSelect`] telling the technique layer which fragment output to
//! emit. The ping-pong borrow becomes three single-texture copies and the
//! translucent pass splits into separate accumulation and revealage replays.

use smallvec::SmallVec;

use crate::attachments::{self, NarrowLayout};
use crate::backend::{
    BlendMode, CompositeInputs, DepthAction, DepthMode, GroupKey, OutputSelect, PassOps,
    PassState, RenderBackend, TargetFormat, TargetKey,
};
use crate::command::RenderPass;
use crate::error::Result;
use crate::targets::{MemoryStatistics, RenderTargetSet};

use super::{
    ACCUMULATION_CLEAR, CompositeStrategy, FrameMode, PickSlot, REVEALAGE_CLEAR, borrowed_planes,
    writes_pick_planes,
};

/// Per-plane replay rendering.
pub struct NarrowStrategy {
    resources: Option<Resources>,
}

struct Resources {
    targets: RenderTargetSet,
    layout: NarrowLayout,
    pick_slot: PickSlot,
}

impl NarrowStrategy {
    /// Creates the strategy with nothing allocated.
    #[must_use]
    pub fn new() -> Self {
        Self { resources: None }
    }
}

impl Default for NarrowStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: RenderBackend> CompositeStrategy<B> for NarrowStrategy {
    fn name(&self) -> &'static str {
        "narrow"
    }

    fn allocate(&mut self, backend: &mut B, width: u32, height: u32) -> Result<()> {
        debug_assert!(self.resources.is_none(), "allocate over a live target set");
        let mut targets = RenderTargetSet::allocate(backend, width, height)?;
        let layout = match NarrowLayout::build(backend, &targets, width, height) {
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
        let color = if composite_dest {
            res.layout.color_composite
        } else {
            res.layout.color_direct
        };
        // The first pass clears depth alongside color; the pick planes then
        // clear to the zero sentinel without touching it.
        backend.execute_pass(
            color,
            &PassOps::clear([background]).with_depth(DepthAction::Clear(1.0)),
            &clear_state(RenderPass::OpaqueLinear, OutputSelect::Color),
            &[],
        );
        let zero = [0.0; 4];
        for (group, output) in [
            (res.layout.element_id_low, OutputSelect::ElementId0),
            (res.layout.element_id_high, OutputSelect::ElementId1),
            (res.layout.depth_order, OutputSelect::DepthOrder),
        ] {
            backend.execute_pass(
                group,
                &PassOps::clear([zero]).with_depth(DepthAction::Load),
                &clear_state(RenderPass::OpaqueLinear, output),
                &[],
            );
        }
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
        let mut replays: SmallVec<[(GroupKey, OutputSelect); 4]> = SmallVec::new();
        // A pick-only frame never replays the color plane.
        if mode == FrameMode::Normal {
            let color = if composite_dest {
                res.layout.color_composite
            } else {
                res.layout.color_direct
            };
            replays.push((color, OutputSelect::Color));
        }
        if writes_pick_planes(pass, mode) {
            replays.push((res.layout.element_id_low, OutputSelect::ElementId0));
            replays.push((res.layout.element_id_high, OutputSelect::ElementId1));
            replays.push((res.layout.depth_order, OutputSelect::DepthOrder));
        }
        let pick_planes =
            (res.pick_slot == PickSlot::Borrowed).then(|| borrowed_planes(&res.targets));
        for (group, output) in replays {
            backend.execute_pass(
                group,
                &PassOps::load(1).with_depth(DepthAction::Load),
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
    }

    fn ping_pong(&mut self, backend: &mut B) {
        let Some(res) = self.resources.as_mut() else {
            return;
        };
        backend.copy_target(res.layout.borrow_id_low, res.targets.element_id_low());
        backend.copy_target(res.layout.borrow_id_high, res.targets.element_id_high());
        backend.copy_target(res.layout.borrow_depth_order, res.targets.depth_order());
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
        for (group, output, value) in [
            (res.layout.accumulation, OutputSelect::Accumulation, ACCUMULATION_CLEAR),
            (res.layout.revealage, OutputSelect::Revealage, REVEALAGE_CLEAR),
        ] {
            backend.execute_pass(
                group,
                &PassOps::clear([value]).with_depth(DepthAction::Load),
                &clear_state(RenderPass::Translucent, output),
                &[],
            );
        }
    }

    fn draw_translucent(&mut self, backend: &mut B, commands: &[B::Command]) {
        let Some(res) = self.resources.as_ref() else {
            return;
        };
        for (group, output, blend) in [
            (
                res.layout.accumulation,
                OutputSelect::Accumulation,
                BlendMode::OitAccumulation,
            ),
            (
                res.layout.revealage,
                OutputSelect::Revealage,
                BlendMode::OitRevealage,
            ),
        ] {
            backend.execute_pass(
                group,
                &PassOps::load(1).with_depth(DepthAction::Load),
                &PassState {
                    pass: RenderPass::Translucent,
                    output,
                    blend,
                    depth: DepthMode::ReadOnly,
                    pick_planes: None,
                },
                commands,
            );
        }
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

/// Command-free pass applying only the load actions.
fn clear_state(pass: RenderPass, output: OutputSelect) -> PassState {
    PassState {
        pass,
        output,
        blend: BlendMode::Opaque,
        depth: DepthMode::ReadWrite,
        pick_planes: None,
    }
}
