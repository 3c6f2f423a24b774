//! Software Render Backend
//!
//! A CPU double of the wgpu backend, shared by the integration tests.
//! Targets are plain `f32` framebuffers, draw commands are axis-aligned
//! quads carrying everything a scene technique would emit per fragment,
//! and blending plus the composite resolve mirror the GPU contracts
//! exactly. Because both strategies run against the same pixel math, the
//! wide and narrow paths can be compared for byte equality.

#![allow(dead_code)]

use std::collections::HashSet;

use slotmap::SlotMap;

use lucent::backend::{
    BlendMode, Capabilities, CompositeInputs, CompositeParams, DepthAction, DepthMode,
    FloatPrecision, GroupDesc, GroupKey, LoadAction, OutputSelect, PassOps, PassState, PickPlanes,
    RenderBackend, TargetDesc, TargetFormat, TargetKey, ViewRect,
};
use lucent::command::{CompositeFlags, RenderPass};
use lucent::error::{CompositorError, Result};
use lucent::pick::{RenderOrder, encode_depth};
use lucent::strategy::COMPOSITE_EPSILON;

// ============================================================================
// Mock draw commands
// ============================================================================

/// One axis-aligned quad at a fixed depth.
///
/// A quad carries every per-fragment value the planes can ask for; the
/// backend picks the right one per attachment from the pass state, the way
/// the real technique layer picks a fragment shader variant.
#[derive(Debug, Clone, Copy)]
pub struct MockCommand {
    pub rect: ViewRect,
    /// Normalized depth, `0.0` nearest.
    pub depth: f32,
    /// Straight (non-premultiplied) RGBA.
    pub color: [f32; 4],
    /// Pickable element identity, `0` for anonymous geometry.
    pub element: u64,
    /// Render order written into the depth+order plane.
    pub order: RenderOrder,
}

impl MockCommand {
    /// An anonymous quad, as background or sky geometry would emit.
    pub fn quad(rect: ViewRect, depth: f32, color: [f32; 4]) -> Self {
        Self {
            rect,
            depth,
            color,
            element: 0,
            order: RenderOrder::NONE,
        }
    }

    /// Attaches pick identity to the quad.
    pub fn with_element(mut self, element: u64, order: RenderOrder) -> Self {
        self.element = element;
        self.order = order;
        self
    }
}

/// One executed pass, recorded for sequencing assertions.
#[derive(Debug, Clone, Copy)]
pub struct PassRecord {
    pub pass: RenderPass,
    pub output: OutputSelect,
    pub blend: BlendMode,
    /// Number of commands replayed; `0` marks a clear-only pass.
    pub commands: usize,
    /// Whether the borrowed pick planes were readable during the pass.
    pub pick_planes_bound: bool,
}

// ============================================================================
// Backend
// ============================================================================

struct MockTarget {
    desc: TargetDesc,
    /// Row-major texels, row 0 at the top. Empty for depth targets.
    pixels: Vec<[f32; 4]>,
    /// Row-major depth values. Empty for color targets.
    depth: Vec<f32>,
}

impl MockTarget {
    fn new(desc: TargetDesc) -> Self {
        let area = desc.width as usize * desc.height as usize;
        if desc.format == TargetFormat::DepthStencil {
            Self {
                desc,
                pixels: Vec::new(),
                depth: vec![1.0; area],
            }
        } else {
            Self {
                desc,
                pixels: vec![[0.0; 4]; area],
                depth: Vec::new(),
            }
        }
    }
}

/// Software [`RenderBackend`] with allocation counters and failure injection.
pub struct MockBackend {
    caps: Capabilities,
    targets: SlotMap<TargetKey, MockTarget>,
    groups: SlotMap<GroupKey, GroupDesc>,
    output: TargetKey,
    target_budget: Option<usize>,
    group_budget: Option<usize>,
    failed_reads: HashSet<TargetKey>,
    pub targets_created: usize,
    pub targets_destroyed: usize,
    pub groups_created: usize,
    pub composites: usize,
    pub pick_plane_copies: usize,
    pub target_copies: usize,
    pub clip_depth: i32,
    pub max_clip_depth: i32,
    pub passes: Vec<PassRecord>,
}

impl MockBackend {
    /// A device with plenty of attachments and fully blendable 32-bit floats.
    pub fn wide(width: u32, height: u32) -> Self {
        Self::with_capabilities(
            Capabilities {
                max_color_attachments: 8,
                float_precision: FloatPrecision::Full,
            },
            width,
            height,
        )
    }

    /// A device limited to one attachment per pass and half floats.
    pub fn narrow(width: u32, height: u32) -> Self {
        Self::with_capabilities(
            Capabilities {
                max_color_attachments: 1,
                float_precision: FloatPrecision::Half,
            },
            width,
            height,
        )
    }

    pub fn with_capabilities(caps: Capabilities, width: u32, height: u32) -> Self {
        let mut targets = SlotMap::with_key();
        let output = targets.insert(MockTarget::new(TargetDesc {
            label: "output",
            width,
            height,
            format: TargetFormat::Rgba8,
        }));
        Self {
            caps,
            targets,
            groups: SlotMap::with_key(),
            output,
            target_budget: None,
            group_budget: None,
            failed_reads: HashSet::new(),
            targets_created: 0,
            targets_destroyed: 0,
            groups_created: 0,
            composites: 0,
            pick_plane_copies: 0,
            target_copies: 0,
            clip_depth: 0,
            max_clip_depth: 0,
            passes: Vec::new(),
        }
    }

    /// Lets the next `n` target allocations succeed and fails every one after.
    pub fn fail_target_creations_after(&mut self, n: usize) {
        self.target_budget = Some(n);
    }

    /// Lets the next `n` group constructions succeed and fails every one after.
    pub fn fail_group_creations_after(&mut self, n: usize) {
        self.group_budget = Some(n);
    }

    /// Makes every read-back of `key` fail.
    pub fn fail_reads_of(&mut self, key: TargetKey) {
        self.failed_reads.insert(key);
    }

    /// Live target count, the caller-owned output plane included.
    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    /// Live attachment group count.
    pub fn live_groups(&self) -> usize {
        self.groups.len()
    }

    /// Descriptor of a live target.
    pub fn target_desc(&self, key: TargetKey) -> TargetDesc {
        self.targets[key].desc
    }

    /// Quantized bytes of one texel of an 8-bit target, top-left origin.
    pub fn pixel_bytes(&self, key: TargetKey, x: u32, y: u32) -> [u8; 4] {
        let target = &self.targets[key];
        assert_eq!(target.desc.format, TargetFormat::Rgba8);
        let texel = target.pixels[(y * target.desc.width + x) as usize];
        texel.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
    }

    /// Writes raw bytes into an 8-bit target, top-left origin. Pick tests
    /// use this to lay plane contents out directly.
    pub fn paint(&mut self, key: TargetKey, x: u32, y: u32, bytes: [u8; 4]) {
        let target = &mut self.targets[key];
        assert_eq!(target.desc.format, TargetFormat::Rgba8);
        let index = (y * target.desc.width + x) as usize;
        target.pixels[index] = bytes.map(|b| f32::from(b) / 255.0);
    }

    /// The recorded passes of one bucket.
    pub fn passes_for(&self, pass: RenderPass) -> Vec<PassRecord> {
        self.passes
            .iter()
            .copied()
            .filter(|record| record.pass == pass)
            .collect()
    }
}

impl RenderBackend for MockBackend {
    type Command = MockCommand;

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    fn output_target(&self) -> TargetKey {
        self.output
    }

    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetKey> {
        if let Some(budget) = &mut self.target_budget {
            if *budget == 0 {
                return Err(CompositorError::TargetAllocation {
                    label: desc.label,
                    detail: "injected allocation failure".into(),
                });
            }
            *budget -= 1;
        }
        self.targets_created += 1;
        Ok(self.targets.insert(MockTarget::new(*desc)))
    }

    fn destroy_target(&mut self, key: TargetKey) {
        if self.targets.remove(key).is_some() {
            self.targets_destroyed += 1;
        }
    }

    fn create_group(&mut self, desc: &GroupDesc) -> Result<GroupKey> {
        if let Some(budget) = &mut self.group_budget {
            if *budget == 0 {
                return Err(CompositorError::AttachmentGroup(format!(
                    "{}: injected construction failure",
                    desc.label
                )));
            }
            *budget -= 1;
        }
        for &key in &desc.colors {
            assert!(
                self.targets.contains_key(key),
                "group {} references a stale color target",
                desc.label
            );
        }
        if let Some(key) = desc.depth {
            assert!(
                self.targets.contains_key(key),
                "group {} references a stale depth target",
                desc.label
            );
        }
        self.groups_created += 1;
        Ok(self.groups.insert(desc.clone()))
    }

    fn destroy_group(&mut self, key: GroupKey) {
        self.groups.remove(key);
    }

    fn execute_pass(
        &mut self,
        group: GroupKey,
        ops: &PassOps,
        state: &PassState,
        commands: &[MockCommand],
    ) {
        let desc = self.groups.get(group).cloned().unwrap();
        self.passes.push(PassRecord {
            pass: state.pass,
            output: state.output,
            blend: state.blend,
            commands: commands.len(),
            pick_planes_bound: state.pick_planes.is_some(),
        });

        assert_eq!(
            desc.colors.len(),
            ops.colors.len(),
            "pass {} load actions must match the group",
            state.pass.name()
        );
        assert_eq!(
            desc.depth.is_some(),
            ops.depth.is_some(),
            "pass {} depth action must match the group",
            state.pass.name()
        );

        for (&key, &action) in desc.colors.iter().zip(&ops.colors) {
            if let LoadAction::Clear(value) = action {
                let target = &mut self.targets[key];
                let texel = quantize(target.desc.format, value.map(|c| c as f32));
                target.pixels.fill(texel);
            }
        }
        if let (Some(DepthAction::Clear(value)), Some(key)) = (ops.depth, desc.depth) {
            self.targets[key].depth.fill(value);
        }

        if commands.is_empty() {
            return;
        }

        let first = &self.targets[desc.colors[0]].desc;
        let (width, height) = (first.width, first.height);

        for command in commands {
            // One depth test per fragment; every attachment of the group
            // then sees identical coverage, exactly like one MRT fragment.
            let mut passing = Vec::new();
            for y in command.rect.top..command.rect.bottom().min(height) {
                for x in command.rect.left..command.rect.right().min(width) {
                    let index = (y * width + x) as usize;
                    let visible = match state.depth {
                        DepthMode::Disabled => true,
                        DepthMode::ReadOnly | DepthMode::ReadWrite => desc
                            .depth
                            .is_none_or(|key| command.depth <= self.targets[key].depth[index]),
                    };
                    if visible {
                        passing.push(index);
                    }
                }
            }

            for (attachment, &key) in desc.colors.iter().enumerate() {
                let role = plane_role(state, attachment);
                let src = fragment_value(command, role);
                let target = &mut self.targets[key];
                let format = target.desc.format;
                for &index in &passing {
                    let blended = blend(state.blend, role, target.pixels[index], src);
                    target.pixels[index] = quantize(format, blended);
                }
            }

            if state.depth == DepthMode::ReadWrite {
                if let Some(key) = desc.depth {
                    let depth = &mut self.targets[key].depth;
                    for &index in &passing {
                        depth[index] = command.depth;
                    }
                }
            }
        }
    }

    fn composite(&mut self, output: GroupKey, inputs: &CompositeInputs, params: &CompositeParams) {
        self.composites += 1;
        let desc = self.groups.get(output).cloned().unwrap();
        let color = self.targets[inputs.color].pixels.clone();
        let accumulation = self.targets[inputs.accumulation].pixels.clone();
        let revealage = self.targets[inputs.revealage].pixels.clone();
        let hilite = self.targets[inputs.hilite].pixels.clone();

        let translucent = params.flags.contains(CompositeFlags::TRANSLUCENT);
        let hilited = params.flags.contains(CompositeFlags::HILITE);

        let dest = &mut self.targets[desc.colors[0]];
        let format = dest.desc.format;
        for (index, out) in dest.pixels.iter_mut().enumerate() {
            let mut texel = color[index];
            if translucent {
                let accum = accumulation[index];
                let reveal = revealage[index][0];
                let weight = accum[3].max(COMPOSITE_EPSILON);
                for channel in 0..3 {
                    texel[channel] =
                        texel[channel] * reveal + (accum[channel] / weight) * (1.0 - reveal);
                }
            }
            if hilited && hilite[index][0] > 0.0 {
                for channel in 0..3 {
                    texel[channel] = texel[channel] * (1.0 - params.hilite_ratio)
                        + params.hilite_color[channel] * params.hilite_ratio;
                }
            }
            *out = quantize(format, texel);
        }
    }

    fn copy_pick_planes(&mut self, dest: GroupKey, sources: &PickPlanes) {
        self.pick_plane_copies += 1;
        let desc = self.groups.get(dest).cloned().unwrap();
        assert_eq!(desc.colors.len(), 3, "ping-pong group binds three planes");
        let planes = [
            sources.element_id_low,
            sources.element_id_high,
            sources.depth_order,
        ];
        for (&dest_key, source_key) in desc.colors.iter().zip(planes) {
            let pixels = self.targets[source_key].pixels.clone();
            self.targets[dest_key].pixels = pixels;
        }
    }

    fn copy_target(&mut self, dest: GroupKey, source: TargetKey) {
        self.target_copies += 1;
        let desc = self.groups.get(dest).cloned().unwrap();
        let pixels = self.targets[source].pixels.clone();
        self.targets[desc.colors[0]].pixels = pixels;
    }

    fn read_target(&mut self, target: TargetKey, rect: ViewRect) -> Result<Vec<u8>> {
        if self.failed_reads.contains(&target) {
            return Err(CompositorError::ReadBack("injected transfer failure".into()));
        }
        let Some(t) = self.targets.get(target) else {
            return Err(CompositorError::ReadBack("stale target key".into()));
        };
        if t.desc.format != TargetFormat::Rgba8 {
            return Err(CompositorError::ReadBack("not an 8-bit RGBA target".into()));
        }
        if rect.is_empty() || rect.right() > t.desc.width || rect.bottom() > t.desc.height {
            return Err(CompositorError::ReadBack("rectangle outside the target".into()));
        }

        let mut data = Vec::with_capacity(rect.area() as usize * 4);
        for y in (rect.top..rect.bottom()).rev() {
            for x in rect.left..rect.right() {
                let texel = t.pixels[(y * t.desc.width + x) as usize];
                data.extend(texel.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8));
            }
        }
        Ok(data)
    }

    fn push_clip(&mut self) {
        self.clip_depth += 1;
        self.max_clip_depth = self.max_clip_depth.max(self.clip_depth);
    }

    fn pop_clip(&mut self) {
        self.clip_depth -= 1;
        assert!(self.clip_depth >= 0, "clip pop without a matching push");
    }
}

// ============================================================================
// Fragment math
// ============================================================================

/// Logical plane one attachment of a pass receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlaneRole {
    Color,
    ElementLow,
    ElementHigh,
    DepthOrder,
    Accumulation,
    Revealage,
    Hilite,
}

fn plane_role(state: &PassState, attachment: usize) -> PlaneRole {
    match state.output {
        // Attachment order contract of OutputSelect::All.
        OutputSelect::All => match state.blend {
            BlendMode::OitDual => [PlaneRole::Accumulation, PlaneRole::Revealage][attachment],
            _ => [
                PlaneRole::Color,
                PlaneRole::ElementLow,
                PlaneRole::ElementHigh,
                PlaneRole::DepthOrder,
            ][attachment],
        },
        OutputSelect::Color => PlaneRole::Color,
        OutputSelect::ElementId0 => PlaneRole::ElementLow,
        OutputSelect::ElementId1 => PlaneRole::ElementHigh,
        OutputSelect::DepthOrder => PlaneRole::DepthOrder,
        OutputSelect::Accumulation => PlaneRole::Accumulation,
        OutputSelect::Revealage => PlaneRole::Revealage,
        OutputSelect::Hilite => PlaneRole::Hilite,
    }
}

fn fragment_value(command: &MockCommand, role: PlaneRole) -> [f32; 4] {
    match role {
        PlaneRole::Color => command.color,
        PlaneRole::ElementLow => word_texel(command.element as u32),
        PlaneRole::ElementHigh => word_texel((command.element >> 32) as u32),
        PlaneRole::DepthOrder => {
            let depth = encode_depth(command.depth);
            [
                f32::from(command.order.encode()) / 255.0,
                f32::from(depth[0]) / 255.0,
                f32::from(depth[1]) / 255.0,
                f32::from(depth[2]) / 255.0,
            ]
        }
        // Unit depth weight: accumulation receives premultiplied color plus
        // alpha, revealage receives coverage.
        PlaneRole::Accumulation => {
            let [r, g, b, a] = command.color;
            [r * a, g * a, b * a, a]
        }
        PlaneRole::Revealage => [command.color[3]; 4],
        PlaneRole::Hilite => [1.0, 0.0, 0.0, 1.0],
    }
}

fn word_texel(word: u32) -> [f32; 4] {
    word.to_le_bytes().map(|b| f32::from(b) / 255.0)
}

fn blend(mode: BlendMode, role: PlaneRole, dest: [f32; 4], src: [f32; 4]) -> [f32; 4] {
    match mode {
        BlendMode::Opaque => src,
        BlendMode::OitAccumulation => add(dest, src),
        BlendMode::OitRevealage => one_minus(dest, src),
        BlendMode::OitDual => match role {
            PlaneRole::Accumulation => add(dest, src),
            PlaneRole::Revealage => one_minus(dest, src),
            _ => src,
        },
    }
}

/// `One + One`.
fn add(dest: [f32; 4], src: [f32; 4]) -> [f32; 4] {
    [
        dest[0] + src[0],
        dest[1] + src[1],
        dest[2] + src[2],
        dest[3] + src[3],
    ]
}

/// `Zero + OneMinusSrc`: the destination scaled by one minus the fragment.
fn one_minus(dest: [f32; 4], src: [f32; 4]) -> [f32; 4] {
    [
        dest[0] * (1.0 - src[0]),
        dest[1] * (1.0 - src[1]),
        dest[2] * (1.0 - src[2]),
        dest[3] * (1.0 - src[3]),
    ]
}

fn quantize(format: TargetFormat, texel: [f32; 4]) -> [f32; 4] {
    match format {
        TargetFormat::Rgba8 => texel.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() / 255.0),
        _ => texel,
    }
}
