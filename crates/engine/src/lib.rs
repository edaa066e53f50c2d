//! Backend-agnostic wallpaper engine.
//!
//! Everything that decides *what* an output shows and *when* lives here; the
//! actual GPU work and image decoding sit behind the [`backend`] traits.
//! Per output the runtime owns one [`driver::OutputDriver`], which wires
//! together:
//!
//! - [`slots::ConfigSlotStore`]: double-buffered config with atomic publish
//! - [`preload::PreloadPipeline`]: background decode of the next target
//! - [`cycle::CycleController`]: interval/skip/pause rotation state machine
//! - [`transition::TransitionEngine`]: eased two-texture blends
//! - [`pacer::FramePacer`]: redraw scheduling for animated content
//!
//! All timing enters through `Instant` parameters, so every state machine in
//! this crate is tested without sleeping.

pub mod backend;
pub mod control;
pub mod cycle;
pub mod driver;
pub mod error;
pub mod handoff;
pub mod pacer;
pub mod preload;
pub mod registry;
pub mod slots;
pub mod status;
pub mod transition;

pub use backend::{Decoder, DrawContent, OutputId, PixelBuffer, RenderBackend};
pub use control::EngineControl;
pub use driver::{OutputDriver, TickReport};
pub use error::{DecodeError, DrawError, UploadError};
pub use registry::{OutputRegistry, RegistryGuard};
pub use status::{ContentKind, StatusRecord};

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use paperconfig::{ConfigFile, DisplayMode, Section, WallpaperConfig};

    use crate::backend::{Decoder, DrawContent, OutputId, PixelBuffer, RenderBackend};
    use crate::error::{DecodeError, DrawError, UploadError};

    /// In-memory decoder producing solid-color pixels.
    #[derive(Default)]
    pub struct StubDecoder {
        delay: Option<Duration>,
        fail: bool,
        call_count: AtomicUsize,
    }

    impl StubDecoder {
        pub fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    impl Decoder for StubDecoder {
        fn decode(
            &self,
            path: &Path,
            target: (u32, u32),
            _mode: DisplayMode,
        ) -> Result<PixelBuffer, DecodeError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.fail {
                return Err(DecodeError::Malformed {
                    path: path.to_path_buf(),
                    message: "stub failure".into(),
                });
            }
            let (width, height) = target;
            Ok(PixelBuffer::new(
                width,
                height,
                vec![0x80; width as usize * height as usize * 4],
            ))
        }
    }

    /// Counting backend with `u32` texture handles.
    #[derive(Default)]
    pub struct StubBackend {
        next_texture: u32,
        pub uploads: usize,
        pub releases: usize,
        pub draws: usize,
        pub blend_draws: usize,
        pub animated_draws: usize,
        pub fallback_draws: usize,
        pub fail_animated: bool,
        /// Speed and channel count of the most recent animated draw.
        pub last_animated: Option<(f32, usize)>,
    }

    impl RenderBackend for StubBackend {
        type Texture = u32;

        fn upload(
            &mut self,
            _output: OutputId,
            _pixels: &PixelBuffer,
        ) -> Result<u32, UploadError> {
            self.uploads += 1;
            self.next_texture += 1;
            Ok(self.next_texture)
        }

        fn release(&mut self, _texture: u32) {
            self.releases += 1;
        }

        fn draw(
            &mut self,
            _output: OutputId,
            content: DrawContent<'_, u32>,
        ) -> Result<(), DrawError> {
            self.draws += 1;
            match content {
                DrawContent::Blend { .. } => self.blend_draws += 1,
                DrawContent::Animated {
                    path,
                    speed,
                    channels,
                } => {
                    self.animated_draws += 1;
                    self.last_animated = Some((speed, channels.len()));
                    if self.fail_animated {
                        return Err(DrawError::Animated {
                            path: path.to_path_buf(),
                            message: "stub failure".into(),
                        });
                    }
                }
                DrawContent::Fallback => self.fallback_draws += 1,
                DrawContent::Texture(_) => {}
            }
            Ok(())
        }
    }

    pub fn test_config(paths: &[&str]) -> WallpaperConfig {
        test_config_with(|section| {
            section.rotation = Some(
                paths
                    .iter()
                    .map(|path| paperconfig::RotationTarget::Image { image: path.into() })
                    .collect(),
            );
        })
    }

    pub fn test_config_with(build: impl FnOnce(&mut Section)) -> WallpaperConfig {
        let mut defaults = Section::default();
        defaults.rotation = Some(vec![paperconfig::RotationTarget::Image {
            image: "/walls/a.png".into(),
        }]);
        build(&mut defaults);
        let file = ConfigFile {
            version: 1,
            defaults,
            outputs: BTreeMap::new(),
        };
        file.resolve("test").expect("test config resolves")
    }
}
