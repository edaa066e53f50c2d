//! wgpu rendering backend.

mod context;
mod pipeline;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use engine::{DrawContent, DrawError, OutputId, PixelBuffer, RenderBackend, UploadError};
use paperconfig::CHANNEL_COUNT;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use context::SurfaceContext;
use pipeline::{AnimatedGlobals, BlendParams, OutputPipelines};

const FALLBACK_CLEAR: wgpu::Color = wgpu::Color {
    r: 0.18,
    g: 0.18,
    b: 0.18,
    a: 1.0,
};

/// Single-owner texture handle. Created by `upload`, destroyed by `release`.
pub struct ImageTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct OutputTarget {
    context: SurfaceContext,
    pipelines: OutputPipelines,
    animated: HashMap<PathBuf, wgpu::RenderPipeline>,
    /// Channel textures bound for animated content, keyed by the path list
    /// they were built from.
    channels: Option<(Vec<PathBuf>, wgpu::BindGroup)>,
    started: Instant,
}

/// All GPU state for the daemon, one surface context per output.
#[derive(Default)]
pub struct WgpuBackend {
    targets: HashMap<OutputId, OutputTarget>,
}

impl WgpuBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_output<T>(
        &mut self,
        id: OutputId,
        handle: &T,
        size: (u32, u32),
        vsync: bool,
    ) -> Result<()>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let context = SurfaceContext::new(handle, size, vsync)?;
        let pipelines = OutputPipelines::new(&context.device, context.surface_format);
        tracing::info!(%id, width = size.0, height = size.1, "initialised GPU surface");
        self.targets.insert(
            id,
            OutputTarget {
                context,
                pipelines,
                animated: HashMap::new(),
                channels: None,
                started: Instant::now(),
            },
        );
        Ok(())
    }

    pub fn has_output(&self, id: OutputId) -> bool {
        self.targets.contains_key(&id)
    }

    pub fn resize_output(&mut self, id: OutputId, size: (u32, u32)) {
        if let Some(target) = self.targets.get_mut(&id) {
            target.context.resize(size);
        }
    }

    pub fn set_vsync(&mut self, id: OutputId, enabled: bool) {
        if let Some(target) = self.targets.get_mut(&id) {
            target.context.set_vsync(enabled);
        }
    }

    pub fn remove_output(&mut self, id: OutputId) {
        self.targets.remove(&id);
    }

    /// Drops cached shader pipelines and channel textures, forcing a rebuild
    /// on next use. Called when a reload may have changed files on disk.
    pub fn invalidate_shaders(&mut self, id: OutputId) {
        if let Some(target) = self.targets.get_mut(&id) {
            target.animated.clear();
            target.channels = None;
        }
    }

    fn encode_draw(
        target: &mut OutputTarget,
        content: DrawContent<'_, ImageTexture>,
    ) -> Result<(), DrawError> {
        let frame = match target.context.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(err @ (wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated)) => {
                target.context.recover();
                return Err(DrawError::Surface(err.to_string()));
            }
            Err(err) => return Err(DrawError::Surface(err.to_string())),
        };
        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let device = &target.context.device;
        let queue = &target.context.queue;
        let (width, height) = target.context.size();
        let resolution = [width as f32, height as f32];

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("wallpaper encoder"),
        });

        match content {
            DrawContent::Fallback => {
                begin_clear_pass(&mut encoder, &view);
            }
            DrawContent::Texture(texture) => {
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("blit bind group"),
                    layout: &target.pipelines.blit_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&texture.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::Sampler(&target.pipelines.sampler),
                        },
                    ],
                });
                let mut pass = begin_clear_pass(&mut encoder, &view);
                pass.set_pipeline(&target.pipelines.blit_pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            DrawContent::Blend {
                outgoing,
                incoming,
                progress,
                kind,
            } => {
                let params = BlendParams {
                    progress,
                    kind: match kind {
                        paperconfig::TransitionKind::Wipe => 1,
                        _ => 0,
                    },
                    resolution,
                };
                queue.write_buffer(
                    &target.pipelines.blend_uniforms,
                    0,
                    bytemuck::bytes_of(&params),
                );
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("blend bind group"),
                    layout: &target.pipelines.blend_texture_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(&outgoing.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: wgpu::BindingResource::TextureView(&incoming.view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 2,
                            resource: wgpu::BindingResource::Sampler(&target.pipelines.sampler),
                        },
                    ],
                });
                let mut pass = begin_clear_pass(&mut encoder, &view);
                pass.set_pipeline(&target.pipelines.blend_pipeline);
                pass.set_bind_group(0, &target.pipelines.blend_uniform_group, &[]);
                pass.set_bind_group(1, &bind_group, &[]);
                pass.draw(0..3, 0..1);
            }
            DrawContent::Animated {
                path,
                speed,
                channels,
            } => {
                if !target.animated.contains_key(path) {
                    let pipeline = target
                        .pipelines
                        .compile_animated(device, target.context.surface_format, path)
                        .map_err(|err| DrawError::Animated {
                            path: path.to_path_buf(),
                            message: format!("{err:#}"),
                        })?;
                    target.animated.insert(path.to_path_buf(), pipeline);
                }
                let stale = target
                    .channels
                    .as_ref()
                    .map_or(true, |(paths, _)| paths.as_slice() != channels);
                if stale {
                    let group = build_channel_group(
                        device,
                        queue,
                        &target.pipelines.channel_layout,
                        &target.pipelines.sampler,
                        channels,
                    )
                    .map_err(|err| DrawError::Animated {
                        path: path.to_path_buf(),
                        message: format!("{err:#}"),
                    })?;
                    target.channels = Some((channels.to_vec(), group));
                }
                let globals = AnimatedGlobals {
                    time: target.started.elapsed().as_secs_f32() * speed,
                    _pad: 0.0,
                    resolution,
                };
                queue.write_buffer(
                    &target.pipelines.animated_uniforms,
                    0,
                    bytemuck::bytes_of(&globals),
                );
                let pipeline = &target.animated[path];
                let Some((_, channel_group)) = &target.channels else {
                    return Err(DrawError::Surface("channel bind group missing".into()));
                };
                let mut pass = begin_clear_pass(&mut encoder, &view);
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &target.pipelines.animated_uniform_group, &[]);
                pass.set_bind_group(1, channel_group, &[]);
                pass.draw(0..3, 0..1);
            }
        }

        queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }
}

/// Loads the configured channel images and binds them, with a 1x1 black
/// placeholder filling every unconfigured slot.
fn build_channel_group(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    channels: &[PathBuf],
) -> Result<wgpu::BindGroup> {
    let mut views = Vec::with_capacity(CHANNEL_COUNT);
    for slot in 0..CHANNEL_COUNT {
        let view = match channels.get(slot) {
            Some(path) => {
                let bytes = std::fs::read(path).with_context(|| {
                    format!("failed to read channel texture {}", path.display())
                })?;
                let pixels = image::load_from_memory(&bytes)
                    .with_context(|| {
                        format!("failed to decode channel texture {}", path.display())
                    })?
                    .into_rgba8();
                channel_texture(device, queue, pixels.width(), pixels.height(), pixels.as_raw())
            }
            None => channel_texture(device, queue, 1, 1, &[0, 0, 0, 0xff]),
        };
        views.push(view);
    }

    let mut entries: Vec<wgpu::BindGroupEntry> = views
        .iter()
        .enumerate()
        .map(|(slot, view)| wgpu::BindGroupEntry {
            binding: slot as u32,
            resource: wgpu::BindingResource::TextureView(view),
        })
        .collect();
    entries.push(wgpu::BindGroupEntry {
        binding: CHANNEL_COUNT as u32,
        resource: wgpu::BindingResource::Sampler(sampler),
    });
    Ok(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("channel bind group"),
        layout,
        entries: &entries,
    }))
}

fn channel_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    width: u32,
    height: u32,
    data: &[u8],
) -> wgpu::TextureView {
    let size = wgpu::Extent3d {
        width: width.max(1),
        height: height.max(1),
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("channel texture"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4 * size.width),
            rows_per_image: Some(size.height),
        },
        size,
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn begin_clear_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    view: &wgpu::TextureView,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("wallpaper pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(FALLBACK_CLEAR),
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

impl RenderBackend for WgpuBackend {
    type Texture = ImageTexture;

    fn upload(
        &mut self,
        output: OutputId,
        pixels: &PixelBuffer,
    ) -> Result<ImageTexture, UploadError> {
        let target = self.targets.get(&output).ok_or_else(|| UploadError {
            width: pixels.width,
            height: pixels.height,
            message: format!("no GPU target for {output}"),
        })?;

        let size = wgpu::Extent3d {
            width: pixels.width.max(1),
            height: pixels.height.max(1),
            depth_or_array_layers: 1,
        };
        let texture = target
            .context
            .device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some("wallpaper texture"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            });
        target.context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &pixels.data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * size.width),
                rows_per_image: Some(size.height),
            },
            size,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(ImageTexture { texture, view })
    }

    fn release(&mut self, texture: ImageTexture) {
        texture.texture.destroy();
    }

    fn draw(
        &mut self,
        output: OutputId,
        content: DrawContent<'_, ImageTexture>,
    ) -> Result<(), DrawError> {
        let target = self
            .targets
            .get_mut(&output)
            .ok_or_else(|| DrawError::Surface(format!("no GPU target for {output}")))?;
        Self::encode_draw(target, content)
    }
}
