//! Attachment Group Layouts
//!
//! An attachment group is a named set of render targets bound together as a
//! draw destination. The two strategies bind the same logical planes but
//! group them differently:
//!
//! # Wide layout (4+ simultaneous attachments)
//!
//! | group | colors | depth |
//! |-------|--------|-------|
//! | `full_direct` | output, id low, id high, depth+order | yes |
//! | `full_composite` | color, id low, id high, depth+order | yes |
//! | `color_direct` | output | yes |
//! | `color_composite` | color | yes |
//! | `oit` | accumulation, revealage | yes |
//! | `ping_pong` | accumulation, revealage, hilite | no |
//! | `hilite` | hilite | yes |
//! | `present` | output | no |
//!
//! # Narrow layout (single attachment)
//!
//! One group per plane, each carrying the shared depth buffer so replayed
//! sub-passes depth-test identically, plus depthless single-attachment
//! groups over the OIT planes serving as ping-pong copy destinations.
//!
//! The `*_direct` groups write straight into the caller's output plane and
//! serve frames that skip compositing; the `*_composite` twins write into
//! the compositable color target instead. Both layouts own the shared
//! depth-stencil buffer. Like the target set, layout construction is atomic:
//! a failure destroys everything the attempt created.

use smallvec::SmallVec;

use crate::backend::{GroupDesc, GroupKey, RenderBackend, TargetDesc, TargetFormat, TargetKey};
use crate::error::Result;
use crate::targets::RenderTargetSet;

/// Attachment groups of the wide (multi-attachment) strategy.
#[derive(Debug)]
pub struct WideLayout {
    /// Output color plus the three pick planes.
    pub full_direct: GroupKey,
    /// Compositable color plus the three pick planes.
    pub full_composite: GroupKey,
    /// Output color alone.
    pub color_direct: GroupKey,
    /// Compositable color alone.
    pub color_composite: GroupKey,
    /// Accumulation and revealage, blended per attachment.
    pub oit: GroupKey,
    /// The three OIT planes as ping-pong copy destinations.
    pub ping_pong: GroupKey,
    /// Hilite mask.
    pub hilite: GroupKey,
    /// Composite resolve destination.
    pub present: GroupKey,
    /// Shared depth-stencil buffer.
    pub depth: TargetKey,
}

impl WideLayout {
    /// Builds the wide groups over an allocated target set.
    pub fn build<B: RenderBackend>(
        backend: &mut B,
        targets: &RenderTargetSet,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let depth = create_depth(backend, width, height)?;
        let mut created: SmallVec<[GroupKey; 12]> = SmallVec::new();
        let result = Self::build_groups(backend, targets, depth, &mut created);
        finish(backend, result, created, depth)
    }

    fn build_groups<B: RenderBackend>(
        backend: &mut B,
        targets: &RenderTargetSet,
        depth: TargetKey,
        created: &mut SmallVec<[GroupKey; 12]>,
    ) -> Result<Self> {
        let output = backend.output_target();
        let picks = [
            targets.element_id_low(),
            targets.element_id_high(),
            targets.depth_order(),
        ];
        Ok(Self {
            full_direct: group(
                backend,
                created,
                "full-direct",
                &[output, picks[0], picks[1], picks[2]],
                Some(depth),
            )?,
            full_composite: group(
                backend,
                created,
                "full-composite",
                &[targets.color(), picks[0], picks[1], picks[2]],
                Some(depth),
            )?,
            color_direct: group(backend, created, "color-direct", &[output], Some(depth))?,
            color_composite: group(
                backend,
                created,
                "color-composite",
                &[targets.color()],
                Some(depth),
            )?,
            oit: group(
                backend,
                created,
                "oit",
                &[targets.accumulation(), targets.revealage()],
                Some(depth),
            )?,
            ping_pong: group(
                backend,
                created,
                "ping-pong",
                &[targets.accumulation(), targets.revealage(), targets.hilite()],
                None,
            )?,
            hilite: group(backend, created, "hilite", &[targets.hilite()], Some(depth))?,
            present: group(backend, created, "present", &[output], None)?,
            depth,
        })
    }

    /// Destroys every group and the depth buffer.
    pub fn release<B: RenderBackend>(&mut self, backend: &mut B) {
        for key in [
            self.full_direct,
            self.full_composite,
            self.color_direct,
            self.color_composite,
            self.oit,
            self.ping_pong,
            self.hilite,
            self.present,
        ] {
            backend.destroy_group(key);
        }
        backend.destroy_target(self.depth);
    }
}

/// Attachment groups of the narrow (single-attachment) strategy.
#[derive(Debug)]
pub struct NarrowLayout {
    /// Output color alone.
    pub color_direct: GroupKey,
    /// Compositable color alone.
    pub color_composite: GroupKey,
    /// Element-ID low plane.
    pub element_id_low: GroupKey,
    /// Element-ID high plane.
    pub element_id_high: GroupKey,
    /// Packed depth+order plane.
    pub depth_order: GroupKey,
    /// OIT accumulation plane.
    pub accumulation: GroupKey,
    /// OIT revealage plane.
    pub revealage: GroupKey,
    /// Hilite mask.
    pub hilite: GroupKey,
    /// Accumulation as the ping-pong home of the ID low plane.
    pub borrow_id_low: GroupKey,
    /// Revealage as the ping-pong home of the ID high plane.
    pub borrow_id_high: GroupKey,
    /// Hilite as the ping-pong home of the depth+order plane.
    pub borrow_depth_order: GroupKey,
    /// Composite resolve destination.
    pub present: GroupKey,
    /// Shared depth-stencil buffer.
    pub depth: TargetKey,
}

impl NarrowLayout {
    /// Builds the narrow groups over an allocated target set.
    pub fn build<B: RenderBackend>(
        backend: &mut B,
        targets: &RenderTargetSet,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let depth = create_depth(backend, width, height)?;
        let mut created: SmallVec<[GroupKey; 12]> = SmallVec::new();
        let result = Self::build_groups(backend, targets, depth, &mut created);
        finish(backend, result, created, depth)
    }

    fn build_groups<B: RenderBackend>(
        backend: &mut B,
        targets: &RenderTargetSet,
        depth: TargetKey,
        created: &mut SmallVec<[GroupKey; 12]>,
    ) -> Result<Self> {
        let output = backend.output_target();
        Ok(Self {
            color_direct: group(backend, created, "color-direct", &[output], Some(depth))?,
            color_composite: group(
                backend,
                created,
                "color-composite",
                &[targets.color()],
                Some(depth),
            )?,
            element_id_low: group(
                backend,
                created,
                "element-id-low",
                &[targets.element_id_low()],
                Some(depth),
            )?,
            element_id_high: group(
                backend,
                created,
                "element-id-high",
                &[targets.element_id_high()],
                Some(depth),
            )?,
            depth_order: group(
                backend,
                created,
                "depth-order",
                &[targets.depth_order()],
                Some(depth),
            )?,
            accumulation: group(
                backend,
                created,
                "oit-accumulation",
                &[targets.accumulation()],
                Some(depth),
            )?,
            revealage: group(
                backend,
                created,
                "oit-revealage",
                &[targets.revealage()],
                Some(depth),
            )?,
            hilite: group(backend, created, "hilite", &[targets.hilite()], Some(depth))?,
            borrow_id_low: group(
                backend,
                created,
                "borrow-id-low",
                &[targets.accumulation()],
                None,
            )?,
            borrow_id_high: group(
                backend,
                created,
                "borrow-id-high",
                &[targets.revealage()],
                None,
            )?,
            borrow_depth_order: group(
                backend,
                created,
                "borrow-depth-order",
                &[targets.hilite()],
                None,
            )?,
            present: group(backend, created, "present", &[output], None)?,
            depth,
        })
    }

    /// Destroys every group and the depth buffer.
    pub fn release<B: RenderBackend>(&mut self, backend: &mut B) {
        for key in [
            self.color_direct,
            self.color_composite,
            self.element_id_low,
            self.element_id_high,
            self.depth_order,
            self.accumulation,
            self.revealage,
            self.hilite,
            self.borrow_id_low,
            self.borrow_id_high,
            self.borrow_depth_order,
            self.present,
        ] {
            backend.destroy_group(key);
        }
        backend.destroy_target(self.depth);
    }
}

/// Bytes held by the shared depth buffer at a viewport size.
#[must_use]
pub fn depth_memory(width: u32, height: u32) -> u64 {
    u64::from(width) * u64::from(height) * TargetFormat::DepthStencil.bytes_per_pixel()
}

fn create_depth<B: RenderBackend>(backend: &mut B, width: u32, height: u32) -> Result<TargetKey> {
    backend.create_target(&TargetDesc {
        label: "shared-depth",
        width,
        height,
        format: TargetFormat::DepthStencil,
    })
}

fn group<B: RenderBackend>(
    backend: &mut B,
    created: &mut SmallVec<[GroupKey; 12]>,
    label: &'static str,
    colors: &[TargetKey],
    depth: Option<TargetKey>,
) -> Result<GroupKey> {
    let key = backend.create_group(&GroupDesc {
        label,
        colors: colors.iter().copied().collect(),
        depth,
    })?;
    created.push(key);
    Ok(key)
}

fn finish<B: RenderBackend, L>(
    backend: &mut B,
    result: Result<L>,
    mut created: SmallVec<[GroupKey; 12]>,
    depth: TargetKey,
) -> Result<L> {
    match result {
        Ok(layout) => Ok(layout),
        Err(err) => {
            log::error!("attachment layout rolled back: {err}");
            for key in created.drain(..) {
                backend.destroy_group(key);
            }
            backend.destroy_target(depth);
            Err(err)
        }
    }
}
