//! wgpu Backend
//!
//! [`WgpuBackend`] implements [`RenderBackend`] over a wgpu device. Scene
//! geometry stays opaque to it: the owner supplies a [`TechniqueDispatch`]
//! that records the actual draw calls of each pass replay, while the backend
//! owns the targets, the attachment groups, the screen-space resolve
//! pipelines and the synchronous pick read-back.
//!
//! # Capability probe
//!
//! Run once at construction: `max_color_attachments` comes from the device
//! limits, and float precision from [`wgpu::Features::FLOAT32_BLENDABLE`].
//! Core WebGPU guarantees blendable 16-bit float targets, so the probe never
//! reports [`FloatPrecision::Fixed`] here.

mod geometry;
mod readback;

use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::backend::{
    Capabilities, CompositeInputs, CompositeParams, DepthAction, FloatPrecision, GroupDesc,
    GroupKey, LoadAction, PassOps, PassState, PickPlanes, RenderBackend, TargetDesc,
    TargetFormat, TargetKey, ViewRect,
};
use crate::error::{CompositorError, Result};

use geometry::ScreenSpaceGeometry;

// ─── Technique dispatch ──────────────────────────────────────────────────────

/// Scene-side recorder of draw commands.
///
/// The compositor never interprets a command; this trait is where the
/// technique layer turns a pass bucket into actual draw calls. [`record`]
/// runs inside an already-begun render pass whose attachments match
/// [`PassState::output`], with the viewport covering the whole target.
///
/// [`record`]: TechniqueDispatch::record
pub trait TechniqueDispatch {
    /// Draw command type carried in the command list.
    type Command;

    /// Records the draw calls of one pass replay.
    fn record(
        &mut self,
        pass: &mut wgpu::RenderPass<'_>,
        ctx: &TechniqueContext<'_>,
        state: &PassState,
        commands: &[Self::Command],
    );

    /// Pushes the active clip volume for subsequent replays.
    fn push_clip(&mut self) {}

    /// Pops the active clip volume.
    fn pop_clip(&mut self) {}
}

/// Resolver handed to [`TechniqueDispatch::record`], giving the technique
/// layer read access to compositor-owned planes (most importantly the
/// ping-pong pick copies named in [`PassState::pick_planes`]).
pub struct TechniqueContext<'a> {
    device: &'a wgpu::Device,
    targets: &'a SlotMap<TargetKey, GpuTarget>,
}

impl<'a> TechniqueContext<'a> {
    /// The device, for techniques that bind resources lazily.
    #[must_use]
    pub fn device(&self) -> &'a wgpu::Device {
        self.device
    }

    /// The live view behind a target key.
    #[must_use]
    pub fn view(&self, key: TargetKey) -> Option<&'a wgpu::TextureView> {
        self.targets.get(key).map(|target| &target.view)
    }
}

// ─── Backend ─────────────────────────────────────────────────────────────────

/// A texture and its render view, owned by the backend.
struct GpuTarget {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TargetDesc,
}

/// [`RenderBackend`] over a wgpu device and queue.
///
/// The output plane is created at construction and resized only through
/// [`resize_output`](Self::resize_output); it keeps its key across resizes,
/// so attachment groups referencing it never go stale.
pub struct WgpuBackend<T: TechniqueDispatch> {
    device: wgpu::Device,
    queue: wgpu::Queue,
    capabilities: Capabilities,
    targets: SlotMap<TargetKey, GpuTarget>,
    groups: SlotMap<GroupKey, GroupDesc>,
    output: TargetKey,
    screen: ScreenSpaceGeometry,
    dispatch: T,
}

impl<T: TechniqueDispatch> WgpuBackend<T> {
    /// Creates the backend and its output plane at the given size.
    pub fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        width: u32,
        height: u32,
        dispatch: T,
    ) -> Result<Self> {
        let float_precision = if device.features().contains(wgpu::Features::FLOAT32_BLENDABLE) {
            FloatPrecision::Full
        } else {
            FloatPrecision::Half
        };
        let capabilities = Capabilities {
            max_color_attachments: device.limits().max_color_attachments,
            float_precision,
        };
        log::debug!(
            "wgpu backend: {} color attachments, {:?} float precision",
            capabilities.max_color_attachments,
            capabilities.float_precision,
        );
        let screen = ScreenSpaceGeometry::new(
            &device,
            capabilities.oit_format(),
            capabilities.supports_wide_attachments(),
        );
        let output_target = create_gpu_target(&device, &output_desc(width, height))?;
        let mut targets = SlotMap::with_key();
        let output = targets.insert(output_target);
        Ok(Self {
            device,
            queue,
            capabilities,
            targets,
            groups: SlotMap::with_key(),
            output,
            screen,
            dispatch,
        })
    }

    /// Re-creates the output plane at a new size, keeping its key.
    pub fn resize_output(&mut self, width: u32, height: u32) -> Result<()> {
        let target = create_gpu_target(&self.device, &output_desc(width, height))?;
        match self.targets.get_mut(self.output) {
            Some(slot) => *slot = target,
            None => self.output = self.targets.insert(target),
        }
        Ok(())
    }

    /// View of the output plane, for presentation blits.
    #[must_use]
    pub fn output_view(&self) -> Option<&wgpu::TextureView> {
        self.targets.get(self.output).map(|target| &target.view)
    }
}

impl<T: TechniqueDispatch> RenderBackend for WgpuBackend<T> {
    type Command = T::Command;

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn output_target(&self) -> TargetKey {
        self.output
    }

    fn create_target(&mut self, desc: &TargetDesc) -> Result<TargetKey> {
        let target = create_gpu_target(&self.device, desc)?;
        Ok(self.targets.insert(target))
    }

    fn destroy_target(&mut self, key: TargetKey) {
        if self.targets.remove(key).is_some() {
            self.screen.purge(key);
        }
    }

    fn create_group(&mut self, desc: &GroupDesc) -> Result<GroupKey> {
        for &key in &desc.colors {
            let Some(target) = self.targets.get(key) else {
                return Err(CompositorError::AttachmentGroup(format!(
                    "{}: color attachment is stale",
                    desc.label
                )));
            };
            if target.desc.format == TargetFormat::DepthStencil {
                return Err(CompositorError::AttachmentGroup(format!(
                    "{}: depth texture bound as color",
                    desc.label
                )));
            }
        }
        if let Some(key) = desc.depth {
            let Some(target) = self.targets.get(key) else {
                return Err(CompositorError::AttachmentGroup(format!(
                    "{}: depth attachment is stale",
                    desc.label
                )));
            };
            if target.desc.format != TargetFormat::DepthStencil {
                return Err(CompositorError::AttachmentGroup(format!(
                    "{}: color texture bound as depth",
                    desc.label
                )));
            }
        }
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
        commands: &[Self::Command],
    ) {
        let Self {
            device,
            queue,
            targets,
            groups,
            dispatch,
            ..
        } = self;
        let Some(group) = groups.get(group) else {
            log::error!("render pass on a stale attachment group");
            return;
        };
        debug_assert_eq!(
            group.colors.len(),
            ops.colors.len(),
            "{}: one load action per color attachment",
            group.label,
        );
        debug_assert_eq!(
            group.depth.is_some(),
            ops.depth.is_some(),
            "{}: depth action without a depth attachment (or the reverse)",
            group.label,
        );

        let mut colors: SmallVec<[Option<wgpu::RenderPassColorAttachment>; 4]> = SmallVec::new();
        for (&key, &action) in group.colors.iter().zip(&ops.colors) {
            let Some(target) = targets.get(key) else {
                log::error!("{}: color attachment is stale", group.label);
                return;
            };
            colors.push(Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: color_load(action),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            }));
        }

        let mut depth_attachment = None;
        if let Some(key) = group.depth {
            let Some(target) = targets.get(key) else {
                log::error!("{}: depth attachment is stale", group.label);
                return;
            };
            let (depth_load, stencil_load) = match ops.depth.unwrap_or(DepthAction::Load) {
                DepthAction::Load => (wgpu::LoadOp::Load, wgpu::LoadOp::Load),
                DepthAction::Clear(value) => {
                    (wgpu::LoadOp::Clear(value), wgpu::LoadOp::Clear(0))
                }
            };
            depth_attachment = Some(wgpu::RenderPassDepthStencilAttachment {
                view: &target.view,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: stencil_load,
                    store: wgpu::StoreOp::Store,
                }),
            });
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(group.label),
        });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(group.label),
                color_attachments: colors.as_slice(),
                depth_stencil_attachment: depth_attachment,
                ..Default::default()
            });
            if !commands.is_empty() {
                let ctx = TechniqueContext { device, targets };
                dispatch.record(&mut pass, &ctx, state, commands);
            }
        }
        queue.submit([encoder.finish()]);
    }

    fn composite(&mut self, output: GroupKey, inputs: &CompositeInputs, params: &CompositeParams) {
        let Self {
            device,
            queue,
            targets,
            groups,
            screen,
            ..
        } = self;
        let Some(group) = groups.get(output) else {
            log::error!("composite into a stale group");
            return;
        };
        let Some(view) = group.colors.first().and_then(|&key| target_view(targets, key)) else {
            log::error!("{}: composite destination is stale", group.label);
            return;
        };
        screen.composite(device, queue, targets, view, inputs, params);
    }

    fn copy_pick_planes(&mut self, dest: GroupKey, sources: &PickPlanes) {
        let Self {
            device,
            queue,
            targets,
            groups,
            screen,
            ..
        } = self;
        let Some(group) = groups.get(dest) else {
            log::error!("pick-plane copy into a stale group");
            return;
        };
        if group.colors.len() != 3 {
            log::error!("{}: pick-plane copy needs three attachments", group.label);
            return;
        }
        let (Some(low), Some(high), Some(order)) = (
            target_view(targets, group.colors[0]),
            target_view(targets, group.colors[1]),
            target_view(targets, group.colors[2]),
        ) else {
            log::error!("{}: pick-plane copy destination is stale", group.label);
            return;
        };
        screen.copy_pick_planes(device, queue, targets, [low, high, order], sources);
    }

    fn copy_target(&mut self, dest: GroupKey, source: TargetKey) {
        let Self {
            device,
            queue,
            targets,
            groups,
            screen,
            ..
        } = self;
        let Some(group) = groups.get(dest) else {
            log::error!("texture copy into a stale group");
            return;
        };
        let Some(view) = group.colors.first().and_then(|&key| target_view(targets, key)) else {
            log::error!("{}: copy destination is stale", group.label);
            return;
        };
        screen.copy_target(device, queue, targets, view, source);
    }

    fn read_target(&mut self, target: TargetKey, rect: ViewRect) -> Result<Vec<u8>> {
        let Some(gpu) = self.targets.get(target) else {
            return Err(CompositorError::ReadBack("stale source target".into()));
        };
        if gpu.desc.format != TargetFormat::Rgba8 {
            return Err(CompositorError::ReadBack(format!(
                "{}: not an 8-bit RGBA target",
                gpu.desc.label
            )));
        }
        if rect.is_empty() || rect.right() > gpu.desc.width || rect.bottom() > gpu.desc.height {
            return Err(CompositorError::ReadBack(format!(
                "{}: rectangle outside the target",
                gpu.desc.label
            )));
        }
        readback::read_texture(&self.device, &self.queue, &gpu.texture, rect)
    }

    fn push_clip(&mut self) {
        self.dispatch.push_clip();
    }

    fn pop_clip(&mut self) {
        self.dispatch.pop_clip();
    }
}

// ─── Target plumbing ─────────────────────────────────────────────────────────

const fn output_desc(width: u32, height: u32) -> TargetDesc {
    TargetDesc {
        label: "output",
        width,
        height,
        format: TargetFormat::Rgba8,
    }
}

fn target_view(targets: &SlotMap<TargetKey, GpuTarget>, key: TargetKey) -> Option<&wgpu::TextureView> {
    targets.get(key).map(|target| &target.view)
}

/// Creates a texture under an out-of-memory error scope, so exhaustion
/// surfaces as [`CompositorError::TargetAllocation`] instead of a device
/// loss later.
fn create_gpu_target(device: &wgpu::Device, desc: &TargetDesc) -> Result<GpuTarget> {
    if desc.width == 0 || desc.height == 0 {
        return Err(CompositorError::InvalidDimensions {
            width: desc.width,
            height: desc.height,
        });
    }
    let usage = match desc.format {
        TargetFormat::DepthStencil => wgpu::TextureUsages::RENDER_ATTACHMENT,
        _ => {
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
        }
    };
    let error_scope = device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(desc.label),
        size: wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: texture_format(desc.format),
        usage,
        view_formats: &[],
    });
    if let Some(error) = pollster::block_on(error_scope.pop()) {
        return Err(CompositorError::TargetAllocation {
            label: desc.label,
            detail: error.to_string(),
        });
    }
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    Ok(GpuTarget {
        texture,
        view,
        desc: *desc,
    })
}

const fn texture_format(format: TargetFormat) -> wgpu::TextureFormat {
    match format {
        // Pick planes carry raw bytes, so the output stays non-sRGB.
        TargetFormat::Rgba8 => wgpu::TextureFormat::Rgba8Unorm,
        TargetFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TargetFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TargetFormat::DepthStencil => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

fn color_load(action: LoadAction) -> wgpu::LoadOp<wgpu::Color> {
    match action {
        LoadAction::Load => wgpu::LoadOp::Load,
        LoadAction::Clear([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
    }
}
