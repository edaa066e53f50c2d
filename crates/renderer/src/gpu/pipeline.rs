use std::path::Path;

use anyhow::{Context, Result};
use paperconfig::CHANNEL_COUNT;

/// Fullscreen-triangle vertex stage shared by every pipeline.
const FULLSCREEN_VS: &str = r#"
struct VsOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VsOut {
    var positions = array<vec2<f32>, 3>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(3.0, -1.0),
        vec2<f32>(-1.0, 3.0),
    );
    var uvs = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 1.0),
        vec2<f32>(2.0, 1.0),
        vec2<f32>(0.0, -1.0),
    );
    var out: VsOut;
    out.pos = vec4<f32>(positions[index], 0.0, 1.0);
    out.uv = uvs[index];
    return out;
}
"#;

const BLIT_FS: &str = r#"
@group(0) @binding(0) var wall_texture: texture_2d<f32>;
@group(0) @binding(1) var wall_sampler: sampler;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    return textureSample(wall_texture, wall_sampler, in.uv);
}
"#;

const BLEND_FS: &str = r#"
struct BlendParams {
    progress: f32,
    kind: u32,
    resolution: vec2<f32>,
};

@group(0) @binding(0) var<uniform> params: BlendParams;
@group(1) @binding(0) var outgoing_texture: texture_2d<f32>;
@group(1) @binding(1) var incoming_texture: texture_2d<f32>;
@group(1) @binding(2) var blend_sampler: sampler;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let from_color = textureSample(outgoing_texture, blend_sampler, in.uv);
    let to_color = textureSample(incoming_texture, blend_sampler, in.uv);
    if params.kind == 1u {
        // Wipe sweeps left to right.
        if in.uv.x < params.progress {
            return to_color;
        }
        return from_color;
    }
    return mix(from_color, to_color, params.progress);
}
"#;

/// Prelude prepended to user shader files. They see a `Globals` uniform plus
/// four texture channels and define `fs_main(in: VsOut)`. Unconfigured
/// channels are bound to a 1x1 black texture.
const ANIMATED_PRELUDE: &str = r#"
struct Globals {
    time: f32,
    _pad: f32,
    resolution: vec2<f32>,
};

@group(0) @binding(0) var<uniform> globals: Globals;
@group(1) @binding(0) var channel0: texture_2d<f32>;
@group(1) @binding(1) var channel1: texture_2d<f32>;
@group(1) @binding(2) var channel2: texture_2d<f32>;
@group(1) @binding(3) var channel3: texture_2d<f32>;
@group(1) @binding(4) var channel_sampler: sampler;
"#;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct BlendParams {
    pub progress: f32,
    pub kind: u32,
    pub resolution: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub(crate) struct AnimatedGlobals {
    pub time: f32,
    pub _pad: f32,
    pub resolution: [f32; 2],
}

/// Pipelines and fixed resources shared by all content on one output.
pub(crate) struct OutputPipelines {
    pub blit_pipeline: wgpu::RenderPipeline,
    pub blit_layout: wgpu::BindGroupLayout,
    pub blend_pipeline: wgpu::RenderPipeline,
    pub blend_texture_layout: wgpu::BindGroupLayout,
    pub blend_uniforms: wgpu::Buffer,
    pub blend_uniform_group: wgpu::BindGroup,
    pub animated_layout: wgpu::BindGroupLayout,
    pub animated_uniforms: wgpu::Buffer,
    pub animated_uniform_group: wgpu::BindGroup,
    pub channel_layout: wgpu::BindGroupLayout,
    pub sampler: wgpu::Sampler,
}

impl OutputPipelines {
    pub(crate) fn new(device: &wgpu::Device, surface_format: wgpu::TextureFormat) -> Self {
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("wallpaper sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };

        let blit_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("blit layout"),
            entries: &[texture_entry(0), sampler_entry(1)],
        });
        let blend_texture_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("blend texture layout"),
                entries: &[texture_entry(0), texture_entry(1), sampler_entry(2)],
            });

        let mut channel_entries: Vec<wgpu::BindGroupLayoutEntry> = (0..CHANNEL_COUNT)
            .map(|slot| texture_entry(slot as u32))
            .collect();
        channel_entries.push(sampler_entry(CHANNEL_COUNT as u32));
        let channel_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("channel layout"),
            entries: &channel_entries,
        });

        let blit_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blit shader"),
            source: wgpu::ShaderSource::Wgsl(format!("{FULLSCREEN_VS}{BLIT_FS}").into()),
        });
        let blend_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("blend shader"),
            source: wgpu::ShaderSource::Wgsl(format!("{FULLSCREEN_VS}{BLEND_FS}").into()),
        });

        let blit_pipeline = build_pipeline(
            device,
            "blit pipeline",
            &[&blit_layout],
            &blit_module,
            surface_format,
        );
        let blend_pipeline = build_pipeline(
            device,
            "blend pipeline",
            &[&uniform_layout, &blend_texture_layout],
            &blend_module,
            surface_format,
        );

        let blend_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("blend uniforms"),
            size: std::mem::size_of::<BlendParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let blend_uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("blend uniform group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: blend_uniforms.as_entire_binding(),
            }],
        });

        let animated_uniforms = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("animated uniforms"),
            size: std::mem::size_of::<AnimatedGlobals>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let animated_uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("animated uniform group"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: animated_uniforms.as_entire_binding(),
            }],
        });

        Self {
            blit_pipeline,
            blit_layout,
            blend_pipeline,
            blend_texture_layout,
            blend_uniforms,
            blend_uniform_group,
            animated_layout: uniform_layout,
            animated_uniforms,
            animated_uniform_group,
            channel_layout,
            sampler,
        }
    }

    /// Compiles a user WGSL file into a pipeline, trapping validation errors
    /// instead of letting wgpu panic on first use.
    pub(crate) fn compile_animated(
        &self,
        device: &wgpu::Device,
        surface_format: wgpu::TextureFormat,
        path: &Path,
    ) -> Result<wgpu::RenderPipeline> {
        let user_source = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read shader at {}", path.display()))?;
        let source = format!("{FULLSCREEN_VS}{ANIMATED_PRELUDE}{user_source}");

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("animated shader"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let pipeline = build_pipeline(
            device,
            "animated pipeline",
            &[&self.animated_layout, &self.channel_layout],
            &module,
            surface_format,
        );
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            anyhow::bail!("shader {} failed validation: {err}", path.display());
        }
        Ok(pipeline)
    }
}

fn build_pipeline(
    device: &wgpu::Device,
    label: &str,
    bind_group_layouts: &[&wgpu::BindGroupLayout],
    module: &wgpu::ShaderModule,
    surface_format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts,
        push_constant_ranges: &[],
    });
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            polygon_mode: wgpu::PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState {
            count: 1,
            mask: !0,
            alpha_to_coverage_enabled: false,
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: surface_format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview: None,
        cache: None,
    })
}
