//! Render Pass Definitions and Command Lists
//!
//! `RenderPass` defines the fixed pass ordering of a composited frame, and
//! `CommandList` carries the per-pass draw commands the technique layer has
//! already sorted into those buckets. The compositor never inspects a
//! command; it only routes each bucket to the right attachment group.

use bitflags::bitflags;

/// Render pass enumeration.
///
/// Defines the execution order of a composited frame. Each pass holds one
/// sorted sub-list of draw commands; empty sub-lists are skipped without
/// touching the GPU.
///
/// # Pass Overview
///
/// | Pass | Destination | Writes pick data |
/// |------|-------------|------------------|
/// | `Background` | color only | no |
/// | `SkyBox` | color only | no |
/// | `OpaqueLinear` | color + pick planes | yes |
/// | `OpaquePlanar` | color + pick planes | yes |
/// | `OpaqueGeneral` | color only | only when reading pixels |
/// | `HiddenEdge` | color only | no |
/// | `Translucent` | OIT accumulation + revealage | no |
/// | `Hilite` | hilite mask | no |
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
#[repr(u8)]
pub enum RenderPass {
    /// Viewport background (solid color, gradient or map).
    Background = 0,

    /// Sky box geometry, drawn over the background without depth.
    SkyBox = 1,

    /// Opaque linear geometry (curves, line strings).
    OpaqueLinear = 2,

    /// Opaque planar surfaces.
    OpaquePlanar = 3,

    /// Remaining opaque geometry (general surfaces, points, silhouettes).
    OpaqueGeneral = 4,

    /// Edges of otherwise hidden geometry, drawn after the opaque set.
    HiddenEdge = 5,

    /// Translucent geometry, rendered through weighted blended OIT.
    Translucent = 6,

    /// Hilite mask for emphasized elements.
    Hilite = 7,
}

impl RenderPass {
    /// Number of passes.
    pub const COUNT: usize = 8;

    /// All passes in execution order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Background,
        Self::SkyBox,
        Self::OpaqueLinear,
        Self::OpaquePlanar,
        Self::OpaqueGeneral,
        Self::HiddenEdge,
        Self::Translucent,
        Self::Hilite,
    ];

    /// Returns the numeric index of the pass (used for sorting and bucket
    /// lookup).
    #[inline]
    #[must_use]
    pub const fn order(self) -> u8 {
        self as u8
    }

    /// Pass name (for debugging).
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Background => "Background",
            Self::SkyBox => "SkyBox",
            Self::OpaqueLinear => "OpaqueLinear",
            Self::OpaquePlanar => "OpaquePlanar",
            Self::OpaqueGeneral => "OpaqueGeneral",
            Self::HiddenEdge => "HiddenEdge",
            Self::Translucent => "Translucent",
            Self::Hilite => "Hilite",
        }
    }
}

bitflags! {
    /// Which composite inputs the current frame actually produces.
    ///
    /// The scene layer raises these when it sorts commands; an empty set
    /// means the frame is purely opaque and the whole translucent/hilite/
    /// composite chain is skipped.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CompositeFlags: u8 {
        /// The frame contains translucent geometry.
        const TRANSLUCENT = 1 << 0;
        /// The frame contains hilited elements.
        const HILITE = 1 << 1;
    }
}

/// Draw commands for one frame, bucketed by render pass.
///
/// The command type `C` is opaque to the compositor; the technique layer
/// that produced the commands is also the layer that replays them when the
/// backend executes a pass.
#[derive(Debug)]
pub struct CommandList<C> {
    flags: CompositeFlags,
    buckets: [Vec<C>; RenderPass::COUNT],
}

impl<C> Default for CommandList<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CommandList<C> {
    /// Creates an empty list with no composite flags raised.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flags: CompositeFlags::empty(),
            buckets: std::array::from_fn(|_| Vec::new()),
        }
    }

    /// Appends a command to the given pass bucket.
    pub fn push(&mut self, pass: RenderPass, command: C) {
        self.buckets[pass.order() as usize].push(command);
    }

    /// Raises composite flags for this frame.
    pub fn set_composite_flags(&mut self, flags: CompositeFlags) {
        self.flags = flags;
    }

    /// Which composite inputs this frame produces.
    #[inline]
    #[must_use]
    pub fn composite_flags(&self) -> CompositeFlags {
        self.flags
    }

    /// The sorted commands of one pass.
    #[inline]
    #[must_use]
    pub fn commands(&self, pass: RenderPass) -> &[C] {
        &self.buckets[pass.order() as usize]
    }

    /// Whether a pass has no commands.
    #[inline]
    #[must_use]
    pub fn is_empty(&self, pass: RenderPass) -> bool {
        self.commands(pass).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_ordering() {
        assert!(RenderPass::Background < RenderPass::SkyBox);
        assert!(RenderPass::SkyBox < RenderPass::OpaqueLinear);
        assert!(RenderPass::OpaqueLinear < RenderPass::OpaquePlanar);
        assert!(RenderPass::OpaquePlanar < RenderPass::OpaqueGeneral);
        assert!(RenderPass::OpaqueGeneral < RenderPass::HiddenEdge);
        assert!(RenderPass::HiddenEdge < RenderPass::Translucent);
        assert!(RenderPass::Translucent < RenderPass::Hilite);
    }

    #[test]
    fn test_all_matches_order() {
        for (index, pass) in RenderPass::ALL.iter().enumerate() {
            assert_eq!(pass.order() as usize, index);
        }
    }

    #[test]
    fn test_command_buckets() {
        let mut list = CommandList::new();
        list.push(RenderPass::OpaqueGeneral, 7u32);
        list.push(RenderPass::OpaqueGeneral, 9u32);
        list.push(RenderPass::Translucent, 1u32);

        assert_eq!(list.commands(RenderPass::OpaqueGeneral), &[7, 9]);
        assert_eq!(list.commands(RenderPass::Translucent), &[1]);
        assert!(list.is_empty(RenderPass::Background));
        assert!(list.composite_flags().is_empty());
    }
}
