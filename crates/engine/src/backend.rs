//! Seams between the engine and the rendering/decoding backends.
//!
//! The engine never touches a GPU or an image codec directly. It drives a
//! [`RenderBackend`] whose texture type it treats as an opaque, single-owner
//! handle, and asks a [`Decoder`] for pixel data on worker threads. Tests
//! substitute both with in-memory stubs.

use std::path::{Path, PathBuf};

use paperconfig::DisplayMode;

use crate::error::{DecodeError, DrawError, UploadError};

/// Identifies one output (monitor) for the lifetime of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutputId(pub u64);

impl std::fmt::Display for OutputId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "output-{}", self.0)
    }
}

/// Decoded RGBA8 pixels, already scaled for the target output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            data,
        }
    }
}

/// Decodes an image file into pixels sized for an output.
///
/// Implementations run on preload worker threads as well as on the render
/// thread, so they must be `Send + Sync` and keep no per-call state.
pub trait Decoder: Send + Sync {
    fn decode(
        &self,
        path: &Path,
        target: (u32, u32),
        mode: DisplayMode,
    ) -> Result<PixelBuffer, DecodeError>;
}

/// What the backend should put on screen for one frame.
pub enum DrawContent<'a, T> {
    /// A single static texture.
    Texture(&'a T),
    /// Two textures blended by the transition engine.
    Blend {
        outgoing: &'a T,
        incoming: &'a T,
        progress: f32,
        kind: paperconfig::TransitionKind,
    },
    /// Animated shader content, re-rendered every frame. `channels` are the
    /// auxiliary textures the shader may sample, in binding order.
    Animated {
        path: &'a Path,
        speed: f32,
        channels: &'a [PathBuf],
    },
    /// Neutral fallback when no content is displayable.
    Fallback,
}

/// Rendering backend owning surfaces and textures for all outputs.
///
/// Texture handles are single-owner and deliberately not `Clone`: the engine
/// moves them in and out, and every handle it stops holding goes back through
/// [`RenderBackend::release`].
pub trait RenderBackend {
    type Texture;

    fn upload(
        &mut self,
        output: OutputId,
        pixels: &PixelBuffer,
    ) -> Result<Self::Texture, UploadError>;

    fn release(&mut self, texture: Self::Texture);

    fn draw(
        &mut self,
        output: OutputId,
        content: DrawContent<'_, Self::Texture>,
    ) -> Result<(), DrawError>;
}

/// Result of a background decode, staged for pickup by the render thread.
#[derive(Debug)]
pub struct StagedDecode {
    pub path: PathBuf,
    pub pixels: PixelBuffer,
}
