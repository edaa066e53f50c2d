//! Wayland + wgpu rendering backend for the wallflow daemon.
//!
//! [`wallpaper::run`] owns the calloop event loop and the layer-shell
//! surfaces; [`gpu::WgpuBackend`] implements the engine's render backend on
//! top of wgpu; [`decode::ImageDecoder`] turns image files into pixels sized
//! for an output.

pub mod decode;
pub mod gpu;
pub mod wallpaper;

pub use decode::ImageDecoder;
pub use gpu::{ImageTexture, WgpuBackend};
pub use wallpaper::{run, ControlMsg, ControlSender, RuntimeOptions, StatusSink};
