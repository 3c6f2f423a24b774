//! Headless compositor demo: renders one opaque triangle into the offscreen
//! output plane and reads the center pixel back, no window required.
//!
//! Run with `cargo run --example headless`.

use lucent::backend::{OutputSelect, PassState, RenderBackend, ViewRect};
use lucent::command::{CommandList, RenderPass};
use lucent::compositor::{Compositor, FrameState};
use lucent::gpu::{TechniqueContext, TechniqueDispatch, WgpuBackend};

const WIDTH: u32 = 256;
const HEIGHT: u32 = 256;

/// One opaque triangle in normalized device coordinates.
struct Triangle {
    color: [f32; 4],
}

/// Minimal technique layer: a single lazily-built pipeline that draws each
/// triangle command with its color passed through a vertex attribute-free
/// immediate draw. Real scenes hang their whole material system off this
/// trait; the demo only ever renders into the color plane.
#[derive(Default)]
struct TriangleTechnique {
    pipeline: Option<wgpu::RenderPipeline>,
}

const TRIANGLE_SHADER: &str = r#"
struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> color: vec4<f32>;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VertexOut {
    var corners = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 0.8),
        vec2<f32>(-0.8, -0.8),
        vec2<f32>(0.8, -0.8),
    );
    var out: VertexOut;
    out.position = vec4<f32>(corners[index], 0.5, 1.0);
    out.color = color;
    return out;
}

@fragment
fn fs_main(in: VertexOut) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

impl TriangleTechnique {
    fn pipeline(&mut self, device: &wgpu::Device) -> &wgpu::RenderPipeline {
        self.pipeline.get_or_insert_with(|| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("triangle"),
                source: wgpu::ShaderSource::Wgsl(TRIANGLE_SHADER.into()),
            });
            let bind_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("triangle color"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });
            let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("triangle"),
                bind_group_layouts: &[Some(&bind_layout)],
                immediate_size: 0,
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("triangle"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: wgpu::TextureFormat::Rgba8Unorm,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive: wgpu::PrimitiveState::default(),
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: wgpu::TextureFormat::Depth24PlusStencil8,
                    depth_write_enabled: Some(true),
                    depth_compare: Some(wgpu::CompareFunction::LessEqual),
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            })
        })
    }
}

impl TechniqueDispatch for TriangleTechnique {
    type Command = Triangle;

    fn record(
        &mut self,
        pass: &mut wgpu::RenderPass<'_>,
        ctx: &TechniqueContext<'_>,
        state: &PassState,
        commands: &[Triangle],
    ) {
        // The demo material only has a color-plane variant.
        if state.output != OutputSelect::Color {
            return;
        }
        use wgpu::util::DeviceExt;

        let device = ctx.device();
        pass.set_pipeline(self.pipeline(device));
        for triangle in commands {
            let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("triangle color"),
                contents: bytemuck::cast_slice(&triangle.color),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            let bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("triangle color"),
                layout: &self.pipeline.as_ref().unwrap().get_bind_group_layout(0),
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            });
            pass.set_bind_group(0, &bind, &[]);
            pass.draw(0..3, 0..1);
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // 1. Acquire a headless device.
    let instance = wgpu::Instance::default();
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: None,
        required_features: adapter.features() & wgpu::Features::FLOAT32_BLENDABLE,
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::Performance,
        ..Default::default()
    }))?;

    // 2. Stand the compositor up over the wgpu backend.
    let mut backend =
        WgpuBackend::new(device, queue, WIDTH, HEIGHT, TriangleTechnique::default())?;
    let mut compositor = Compositor::new(&backend);
    println!("strategy: {}", compositor.strategy_name());

    // 3. One opaque triangle, no transparency, no hilite.
    let mut commands = CommandList::new();
    commands.push(
        RenderPass::OpaqueGeneral,
        Triangle {
            color: [0.9, 0.4, 0.1, 1.0],
        },
    );

    // 4. Render and read the center of the output plane back.
    let frame = FrameState::new(WIDTH, HEIGHT);
    compositor.draw(&mut backend, &commands, &frame)?;
    let center = ViewRect::new(WIDTH / 2, HEIGHT / 2, 1, 1);
    let pixel = backend.read_target(backend.output_target(), center)?;
    println!("center pixel: {pixel:?}");

    compositor.dispose(&mut backend);
    Ok(())
}
