//! Screen-Space Resolve Pipelines
//!
//! Fullscreen-triangle draws for everything that is not scene geometry: the
//! composite resolve, the three-plane ping-pong copy and the single-texture
//! copy. Pipelines are built once at backend construction; bind groups are
//! cached per source-key and purged when a target is destroyed.
//!
//! Sources are sampled with `textureLoad`, so the bindings use
//! unfilterable-float sample types and work unchanged for 8-bit, 16-bit and
//! 32-bit float planes.

use std::borrow::Cow;

use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;

use crate::backend::{CompositeInputs, CompositeParams, PickPlanes, TargetFormat, TargetKey};
use crate::strategy::COMPOSITE_EPSILON;

use super::{GpuTarget, target_view, texture_format};

const FULLSCREEN_VERTEX: &str = "
@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}
";

/// Mode bit values match [`crate::command::CompositeFlags`].
const COMPOSITE_FRAGMENT: &str = "
const MODE_TRANSLUCENT: u32 = 1u;
const MODE_HILITE: u32 = 2u;

struct Params {
    mode: u32,
    hilite_ratio: f32,
    _pad: vec2<f32>,
    hilite_color: vec4<f32>,
}

@group(0) @binding(0) var color_plane: texture_2d<f32>;
@group(0) @binding(1) var accumulation_plane: texture_2d<f32>;
@group(0) @binding(2) var revealage_plane: texture_2d<f32>;
@group(0) @binding(3) var hilite_plane: texture_2d<f32>;
@group(0) @binding(4) var<uniform> params: Params;

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    let texel = vec2<i32>(position.xy);
    var color = textureLoad(color_plane, texel, 0);
    if (params.mode & MODE_TRANSLUCENT) != 0u {
        let accum = textureLoad(accumulation_plane, texel, 0);
        let revealage = textureLoad(revealage_plane, texel, 0).r;
        let average = accum.rgb / max(accum.a, EPSILON);
        color = vec4<f32>(color.rgb * revealage + average * (1.0 - revealage), color.a);
    }
    if (params.mode & MODE_HILITE) != 0u {
        let mask = textureLoad(hilite_plane, texel, 0).r;
        if mask > 0.0 {
            color = vec4<f32>(mix(color.rgb, params.hilite_color.rgb, params.hilite_ratio), color.a);
        }
    }
    return color;
}
";

const COPY_PICK_FRAGMENT: &str = "
@group(0) @binding(0) var id_low_plane: texture_2d<f32>;
@group(0) @binding(1) var id_high_plane: texture_2d<f32>;
@group(0) @binding(2) var depth_order_plane: texture_2d<f32>;

struct Copies {
    @location(0) id_low: vec4<f32>,
    @location(1) id_high: vec4<f32>,
    @location(2) depth_order: vec4<f32>,
}

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> Copies {
    let texel = vec2<i32>(position.xy);
    var out: Copies;
    out.id_low = textureLoad(id_low_plane, texel, 0);
    out.id_high = textureLoad(id_high_plane, texel, 0);
    out.depth_order = textureLoad(depth_order_plane, texel, 0);
    return out;
}
";

const COPY_FRAGMENT: &str = "
@group(0) @binding(0) var source_plane: texture_2d<f32>;

@fragment
fn fs_main(@builtin(position) position: vec4<f32>) -> @location(0) vec4<f32> {
    return textureLoad(source_plane, vec2<i32>(position.xy), 0);
}
";

/// Uniform block of the composite resolve; layout mirrors the WGSL `Params`
/// struct.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CompositeUniforms {
    mode: u32,
    hilite_ratio: f32,
    _pad: [f32; 2],
    hilite_color: [f32; 4],
}

struct ResolvePipeline {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
}

/// The backend's fullscreen pipelines and their bind group caches.
pub(super) struct ScreenSpaceGeometry {
    composite: ResolvePipeline,
    composite_uniforms: wgpu::Buffer,
    composite_binds: FxHashMap<CompositeInputs, wgpu::BindGroup>,
    /// Absent on narrow hardware, which cannot bind three attachments and
    /// replays single copies instead.
    copy_pick: Option<ResolvePipeline>,
    copy_pick_binds: FxHashMap<PickPlanes, wgpu::BindGroup>,
    copy: ResolvePipeline,
    copy_binds: FxHashMap<TargetKey, wgpu::BindGroup>,
}

impl ScreenSpaceGeometry {
    pub(super) fn new(
        device: &wgpu::Device,
        oit_format: TargetFormat,
        wide_attachments: bool,
    ) -> Self {
        let oit = texture_format(oit_format);

        let composite_source = format!(
            "const EPSILON: f32 = {COMPOSITE_EPSILON:?};\n{FULLSCREEN_VERTEX}{COMPOSITE_FRAGMENT}"
        );
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("composite-layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                texture_entry(2),
                texture_entry(3),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });
        let composite = build_pipeline(
            device,
            "composite",
            &composite_source,
            composite_layout,
            &[replace_target(wgpu::TextureFormat::Rgba8Unorm)],
        );
        let composite_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("composite-params"),
            size: std::mem::size_of::<CompositeUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let copy_pick = wide_attachments.then(|| {
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("copy-pick-layout"),
                entries: &[texture_entry(0), texture_entry(1), texture_entry(2)],
            });
            build_pipeline(
                device,
                "copy-pick",
                &format!("{FULLSCREEN_VERTEX}{COPY_PICK_FRAGMENT}"),
                layout,
                &[replace_target(oit), replace_target(oit), replace_target(oit)],
            )
        });

        let copy_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("copy-layout"),
            entries: &[texture_entry(0)],
        });
        let copy = build_pipeline(
            device,
            "copy",
            &format!("{FULLSCREEN_VERTEX}{COPY_FRAGMENT}"),
            copy_layout,
            &[replace_target(oit)],
        );

        Self {
            composite,
            composite_uniforms,
            composite_binds: FxHashMap::default(),
            copy_pick,
            copy_pick_binds: FxHashMap::default(),
            copy,
            copy_binds: FxHashMap::default(),
        }
    }

    /// Resolves the four input planes into the output attachment.
    pub(super) fn composite(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        targets: &SlotMap<TargetKey, GpuTarget>,
        output: &wgpu::TextureView,
        inputs: &CompositeInputs,
        params: &CompositeParams,
    ) {
        let (Some(color), Some(accumulation), Some(revealage), Some(hilite)) = (
            target_view(targets, inputs.color),
            target_view(targets, inputs.accumulation),
            target_view(targets, inputs.revealage),
            target_view(targets, inputs.hilite),
        ) else {
            log::error!("composite sampled a stale plane");
            return;
        };

        let uniforms = CompositeUniforms {
            mode: u32::from(params.flags.bits()),
            hilite_ratio: params.hilite_ratio,
            _pad: [0.0; 2],
            hilite_color: [
                params.hilite_color[0],
                params.hilite_color[1],
                params.hilite_color[2],
                1.0,
            ],
        };
        queue.write_buffer(&self.composite_uniforms, 0, bytemuck::bytes_of(&uniforms));

        let Self {
            composite,
            composite_uniforms,
            composite_binds,
            ..
        } = self;
        let bind = composite_binds.entry(*inputs).or_insert_with(|| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("composite-bind"),
                layout: &composite.layout,
                entries: &[
                    bind_texture(0, color),
                    bind_texture(1, accumulation),
                    bind_texture(2, revealage),
                    bind_texture(3, hilite),
                    wgpu::BindGroupEntry {
                        binding: 4,
                        resource: composite_uniforms.as_entire_binding(),
                    },
                ],
            })
        });

        fullscreen_draw(device, queue, "composite", &composite.pipeline, bind, &[output]);
    }

    /// Copies the three pick planes into the ping-pong attachments.
    pub(super) fn copy_pick_planes(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        targets: &SlotMap<TargetKey, GpuTarget>,
        dest: [&wgpu::TextureView; 3],
        sources: &PickPlanes,
    ) {
        let Some(copy_pick) = &self.copy_pick else {
            log::error!("pick-plane copy on narrow hardware");
            return;
        };
        let (Some(low), Some(high), Some(order)) = (
            target_view(targets, sources.element_id_low),
            target_view(targets, sources.element_id_high),
            target_view(targets, sources.depth_order),
        ) else {
            log::error!("pick-plane copy sampled a stale plane");
            return;
        };

        let bind = self.copy_pick_binds.entry(*sources).or_insert_with(|| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("copy-pick-bind"),
                layout: &copy_pick.layout,
                entries: &[
                    bind_texture(0, low),
                    bind_texture(1, high),
                    bind_texture(2, order),
                ],
            })
        });

        fullscreen_draw(device, queue, "copy-pick", &copy_pick.pipeline, bind, &dest);
    }

    /// Copies one plane into a single attachment.
    pub(super) fn copy_target(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        targets: &SlotMap<TargetKey, GpuTarget>,
        dest: &wgpu::TextureView,
        source: TargetKey,
    ) {
        let Some(view) = target_view(targets, source) else {
            log::error!("texture copy sampled a stale plane");
            return;
        };

        let Self {
            copy, copy_binds, ..
        } = self;
        let bind = copy_binds.entry(source).or_insert_with(|| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("copy-bind"),
                layout: &copy.layout,
                entries: &[bind_texture(0, view)],
            })
        });

        fullscreen_draw(device, queue, "copy", &copy.pipeline, bind, &[dest]);
    }

    /// Drops every cached bind group that samples the destroyed target.
    pub(super) fn purge(&mut self, key: TargetKey) {
        self.composite_binds.retain(|inputs, _| {
            inputs.color != key
                && inputs.accumulation != key
                && inputs.revealage != key
                && inputs.hilite != key
        });
        self.copy_pick_binds.retain(|planes, _| {
            planes.element_id_low != key
                && planes.element_id_high != key
                && planes.depth_order != key
        });
        self.copy_binds.remove(&key);
    }
}

// ─── Pipeline plumbing ───────────────────────────────────────────────────────

fn build_pipeline(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    layout: wgpu::BindGroupLayout,
    targets: &[Option<wgpu::ColorTargetState>],
) -> ResolvePipeline {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[Some(&layout)],
        immediate_size: 0,
    });
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            targets,
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview_mask: None,
        cache: None,
    });
    ResolvePipeline { pipeline, layout }
}

fn fullscreen_draw(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    label: &str,
    pipeline: &wgpu::RenderPipeline,
    bind: &wgpu::BindGroup,
    attachments: &[&wgpu::TextureView],
) {
    let colors: SmallVec<[Option<wgpu::RenderPassColorAttachment>; 3]> = attachments
        .iter()
        .map(|view| {
            Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })
        })
        .collect();
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some(label),
    });
    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(label),
            color_attachments: colors.as_slice(),
            depth_stencil_attachment: None,
            ..Default::default()
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, bind, &[]);
        // Fullscreen triangle.
        pass.draw(0..3, 0..1);
    }
    queue.submit([encoder.finish()]);
}

const fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn bind_texture(binding: u32, view: &wgpu::TextureView) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: wgpu::BindingResource::TextureView(view),
    }
}

const fn replace_target(format: wgpu::TextureFormat) -> Option<wgpu::ColorTargetState> {
    Some(wgpu::ColorTargetState {
        format,
        blend: Some(wgpu::BlendState::REPLACE),
        write_mask: wgpu::ColorWrites::ALL,
    })
}
