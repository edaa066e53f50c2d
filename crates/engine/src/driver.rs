//! Per-output render loop orchestrator.
//!
//! The driver owns every moving part of one output: its cycle controller,
//! transition engine, frame pacer, preload pipeline, and the texture handles
//! currently on screen. The runtime calls [`OutputDriver::tick`] whenever
//! something might need doing (a timer fired, a frame callback arrived, a
//! control message landed) and the driver works out the rest.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use paperconfig::{DisplayMode, RotationTarget, TransitionKind, WallpaperConfig};

use crate::backend::{Decoder, DrawContent, OutputId, RenderBackend};
use crate::cycle::CycleController;
use crate::pacer::{interval_for_fps, FramePacer, PacingMode};
use crate::preload::PreloadPipeline;
use crate::registry::RegistryGuard;
use crate::status::{ContentKind, StatusRecord};
use crate::transition::TransitionEngine;

/// Animated draw failures tolerated before an output falls back to the
/// neutral fill instead of retrying every frame.
const MAX_ANIMATED_FAILURES: u32 = 3;

enum CurrentContent<T> {
    Image {
        path: PathBuf,
        texture: T,
        mode: DisplayMode,
    },
    Shader {
        path: PathBuf,
        speed: f32,
        channels: Vec<PathBuf>,
    },
}

/// What the runtime should do after a tick.
pub struct TickReport {
    /// New status snapshot, present when the displayed content changed.
    pub status: Option<StatusRecord>,
    /// Earliest instant at which the driver wants another tick.
    pub deadline: Option<Instant>,
    /// True while content wants a redraw on every display frame.
    pub continuous: bool,
}

pub struct OutputDriver<T> {
    id: OutputId,
    name: String,
    size: (u32, u32),
    cycle: CycleController,
    transition: TransitionEngine<T>,
    pacer: FramePacer,
    preload: PreloadPipeline<T>,
    current: Option<CurrentContent<T>>,
    animated_failures: u32,
    degraded: bool,
    seen_generation: u64,
}

impl<T> OutputDriver<T> {
    pub fn new(id: OutputId, name: impl Into<String>, size: (u32, u32), now: Instant) -> Self {
        let seed = id.0 ^ 0x77a1_1f0e_5eed_c0de;
        Self {
            id,
            name: name.into(),
            size,
            cycle: CycleController::new(now, 1, paperconfig::RotationOrder::Continuous, 0, seed),
            transition: TransitionEngine::new(),
            pacer: FramePacer::new(),
            preload: PreloadPipeline::new(id),
            current: None,
            animated_failures: 0,
            degraded: false,
            // Stores start at generation 1; zero forces the first tick to
            // pick up the initial config.
            seen_generation: 0,
        }
    }

    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// New surface dimensions after a mode switch. The next switch decodes
    /// at the new size; the texture already on screen is left alone.
    pub fn resize(&mut self, size: (u32, u32)) {
        self.size = size;
    }

    pub fn skip(&mut self) {
        self.cycle.skip();
    }

    pub fn pause(&mut self, now: Instant) {
        self.cycle.pause(now);
    }

    pub fn resume(&mut self, now: Instant) {
        self.cycle.resume(now);
    }

    /// Runs one iteration of the output's render loop.
    pub fn tick<B: RenderBackend<Texture = T>>(
        &mut self,
        now: Instant,
        registry: &RegistryGuard<'_>,
        backend: &mut B,
        decoder: &Arc<dyn Decoder>,
    ) -> TickReport {
        // Read the generation before the slot so a publish landing in
        // between is seen again on the next tick instead of skipped.
        let generation = registry.generation(self.id).unwrap_or(self.seen_generation);
        let Some(config) = registry.config(self.id).map(|guard| (*guard).clone()) else {
            return TickReport {
                status: None,
                deadline: None,
                continuous: false,
            };
        };

        let mut switched = false;
        if generation != self.seen_generation {
            self.apply_config(&config, now, backend);
            self.seen_generation = generation;
            switched |= self.ensure_current(&config, now, backend, decoder);
        }

        self.preload.pump(backend);

        while self.cycle.due(now, config.duration).is_some() {
            self.cycle.advance(now);
            switched |= self.switch_to(self.cycle.current(), &config, now, backend, decoder);
        }

        if switched {
            self.request_next_preload(&config, decoder);
        }

        // A completed transition still needs one frame at full opacity.
        let mut finished = false;
        if let Some(outgoing) = self.transition.finish_if_complete(now) {
            backend.release(outgoing);
            finished = true;
        }

        let continuous = self.configure_pacing(&config, now);
        let timer_due = self.pacer.due(now);
        if switched || finished || continuous || timer_due || self.current.is_none() {
            self.draw(now, backend);
        }

        TickReport {
            status: switched.then(|| self.snapshot(&config)),
            deadline: self.next_deadline(&config),
            continuous,
        }
    }

    /// Current status snapshot, also used when pause state flips without a
    /// content switch.
    pub fn snapshot(&self, config: &WallpaperConfig) -> StatusRecord {
        let (path, kind) = match (&self.current, self.degraded) {
            (_, true) | (None, _) => (String::new(), ContentKind::Fallback),
            (Some(CurrentContent::Image { path, .. }), _) => {
                (path.display().to_string(), ContentKind::Image)
            }
            (Some(CurrentContent::Shader { path, .. }), _) => {
                (path.display().to_string(), ContentKind::Shader)
            }
        };
        StatusRecord {
            output: self.name.clone(),
            path,
            kind,
            position: self.cycle.current(),
            rotation_len: config.rotation_len(),
            paused: self.cycle.is_paused(),
            degraded: self.degraded,
        }
    }

    /// Releases everything the driver holds. Called when the output is
    /// unplugged or the daemon exits.
    pub fn shutdown<B: RenderBackend<Texture = T>>(&mut self, backend: &mut B) {
        self.preload.shutdown(backend);
        if let Some(outgoing) = self.transition.cancel() {
            backend.release(outgoing);
        }
        if let Some(CurrentContent::Image { texture, .. }) = self.current.take() {
            backend.release(texture);
        }
    }

    fn apply_config<B: RenderBackend<Texture = T>>(
        &mut self,
        config: &WallpaperConfig,
        now: Instant,
        backend: &mut B,
    ) {
        self.cycle.rebuild(
            now,
            config.rotation_len(),
            config.order,
            config.rotation_index,
        );
        // Whatever was preloaded was chosen under the old rotation.
        self.preload.discard_ready(backend);
        self.degraded = false;
        self.animated_failures = 0;
    }

    /// Brings the displayed content in line with the cycle's current index.
    /// No-op when the right thing is already on screen.
    fn ensure_current<B: RenderBackend<Texture = T>>(
        &mut self,
        config: &WallpaperConfig,
        now: Instant,
        backend: &mut B,
        decoder: &Arc<dyn Decoder>,
    ) -> bool {
        let index = self.cycle.current();
        let Some(target) = config.target(index) else {
            return false;
        };
        if self.matches_config(target, config) {
            return false;
        }
        self.switch_to(index, config, now, backend, decoder)
    }

    /// Whether the displayed content already reflects `target` under
    /// `config`. A reload can keep a path while changing the display mode,
    /// shader speed, or channel bindings; those force a rebuild too.
    fn matches_config(&self, target: &RotationTarget, config: &WallpaperConfig) -> bool {
        match (&self.current, target) {
            (Some(CurrentContent::Image { path, mode, .. }), RotationTarget::Image { image }) => {
                path == image && *mode == config.mode
            }
            (
                Some(CurrentContent::Shader {
                    path,
                    speed,
                    channels,
                }),
                RotationTarget::Shader {
                    shader,
                    speed: wanted,
                },
            ) => path == shader && speed == wanted && channels == &config.channels,
            _ => false,
        }
    }

    /// Switches the displayed content to rotation entry `index`. On failure
    /// the previous content stays up.
    fn switch_to<B: RenderBackend<Texture = T>>(
        &mut self,
        index: usize,
        config: &WallpaperConfig,
        now: Instant,
        backend: &mut B,
        decoder: &Arc<dyn Decoder>,
    ) -> bool {
        let Some(target) = config.target(index) else {
            return false;
        };

        match target {
            RotationTarget::Image { image } => {
                let texture = match self.preload.take_ready(image) {
                    Some(texture) => texture,
                    None => match self.decode_and_upload(image, config, backend, decoder) {
                        Some(texture) => texture,
                        None => return false,
                    },
                };
                self.install_image(image.clone(), texture, config, now, backend);
            }
            RotationTarget::Shader { shader, speed } => {
                // Shader switches are immediate; there is no second texture
                // to blend against.
                self.release_current(backend);
                self.current = Some(CurrentContent::Shader {
                    path: shader.clone(),
                    speed: *speed,
                    channels: config.channels.clone(),
                });
                self.animated_failures = 0;
                self.degraded = false;
            }
        }
        true
    }

    fn decode_and_upload<B: RenderBackend<Texture = T>>(
        &mut self,
        path: &std::path::Path,
        config: &WallpaperConfig,
        backend: &mut B,
        decoder: &Arc<dyn Decoder>,
    ) -> Option<T> {
        let pixels = match decoder.decode(path, self.size, config.mode) {
            Ok(pixels) => pixels,
            Err(err) => {
                tracing::warn!(output = %self.name, error = %err, "decode failed; keeping previous content");
                return None;
            }
        };
        match backend.upload(self.id, &pixels) {
            Ok(texture) => Some(texture),
            Err(err) => {
                tracing::warn!(output = %self.name, error = %err, "upload failed; keeping previous content");
                None
            }
        }
    }

    fn install_image<B: RenderBackend<Texture = T>>(
        &mut self,
        path: PathBuf,
        texture: T,
        config: &WallpaperConfig,
        now: Instant,
        backend: &mut B,
    ) {
        let previous = self.current.take();
        match previous {
            Some(CurrentContent::Image {
                texture: outgoing, ..
            }) if config.transition != TransitionKind::None
                && !config.transition_duration.is_zero() =>
            {
                if let Some(superseded) = self.transition.begin(
                    outgoing,
                    config.transition,
                    config.transition_duration,
                    now,
                ) {
                    backend.release(superseded);
                }
            }
            Some(CurrentContent::Image {
                texture: outgoing, ..
            }) => {
                backend.release(outgoing);
            }
            Some(CurrentContent::Shader { .. }) | None => {}
        }
        self.current = Some(CurrentContent::Image {
            path,
            texture,
            mode: config.mode,
        });
        self.degraded = false;
    }

    fn release_current<B: RenderBackend<Texture = T>>(&mut self, backend: &mut B) {
        if let Some(outgoing) = self.transition.cancel() {
            backend.release(outgoing);
        }
        if let Some(CurrentContent::Image { texture, .. }) = self.current.take() {
            backend.release(texture);
        }
    }

    fn request_next_preload(&mut self, config: &WallpaperConfig, decoder: &Arc<dyn Decoder>) {
        if config.rotation_len() <= 1 {
            return;
        }
        let next = self.cycle.peek_next();
        if let Some(RotationTarget::Image { image }) = config.target(next) {
            self.preload
                .request(image, self.size, config.mode, decoder);
        }
    }

    fn configure_pacing(&mut self, config: &WallpaperConfig, now: Instant) -> bool {
        if self.degraded {
            self.pacer.configure(PacingMode::Inactive, now);
            return false;
        }
        if self.transition.is_active() {
            // Blend frames ride the display's own cadence.
            self.pacer.configure(PacingMode::Continuous, now);
            return true;
        }
        match &self.current {
            Some(CurrentContent::Shader { .. }) => {
                if config.animation.vsync {
                    self.pacer.configure(PacingMode::Continuous, now);
                    true
                } else {
                    match interval_for_fps(config.animation.fps) {
                        Some(interval) => {
                            self.pacer.configure(PacingMode::Interval(interval), now);
                            false
                        }
                        None => {
                            self.pacer.configure(PacingMode::Inactive, now);
                            false
                        }
                    }
                }
            }
            _ => {
                self.pacer.configure(PacingMode::Inactive, now);
                false
            }
        }
    }

    fn draw<B: RenderBackend<Texture = T>>(&mut self, now: Instant, backend: &mut B) {
        let content = if self.degraded {
            DrawContent::Fallback
        } else {
            match (&self.current, self.transition.outgoing()) {
                (Some(CurrentContent::Image { texture, .. }), Some(outgoing)) => {
                    match self.transition.frame(now) {
                        Some(frame) => DrawContent::Blend {
                            outgoing,
                            incoming: texture,
                            progress: frame.eased,
                            kind: frame.kind,
                        },
                        None => DrawContent::Texture(texture),
                    }
                }
                (Some(CurrentContent::Image { texture, .. }), None) => {
                    DrawContent::Texture(texture)
                }
                (
                    Some(CurrentContent::Shader {
                        path,
                        speed,
                        channels,
                    }),
                    _,
                ) => DrawContent::Animated {
                    path,
                    speed: *speed,
                    channels,
                },
                (None, _) => DrawContent::Fallback,
            }
        };

        if let Err(err) = backend.draw(self.id, content) {
            match err {
                crate::error::DrawError::Animated { .. } => {
                    self.animated_failures += 1;
                    tracing::warn!(output = %self.name, error = %err, failures = self.animated_failures, "animated draw failed");
                    if self.animated_failures >= MAX_ANIMATED_FAILURES {
                        self.degraded = true;
                        tracing::warn!(output = %self.name, "animated content disabled after repeated failures");
                        if let Err(err) = backend.draw(self.id, DrawContent::Fallback) {
                            tracing::warn!(output = %self.name, error = %err, "fallback draw failed");
                        }
                    }
                }
                crate::error::DrawError::Surface(_) => {
                    tracing::warn!(output = %self.name, error = %err, "draw failed");
                }
            }
        }
    }

    fn next_deadline(&self, config: &WallpaperConfig) -> Option<Instant> {
        let cycle = self.cycle.next_deadline(config.duration);
        let pacer = self.pacer.deadline();
        match (cycle, pacer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (deadline, None) | (None, deadline) => deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::OutputRegistry;
    use crate::testutil::{test_config, test_config_with, StubBackend, StubDecoder};
    use std::time::Duration;

    const ID: OutputId = OutputId(1);

    struct Fixture {
        registry: OutputRegistry,
        backend: StubBackend,
        decoder: Arc<dyn Decoder>,
        driver: OutputDriver<u32>,
        start: Instant,
    }

    impl Fixture {
        fn new(config: WallpaperConfig) -> Self {
            let registry = OutputRegistry::new();
            registry.insert(ID, config);
            let start = Instant::now();
            Self {
                registry,
                backend: StubBackend::default(),
                decoder: Arc::new(StubDecoder::default()),
                driver: OutputDriver::new(ID, "DP-1", (1920, 1080), start),
                start,
            }
        }

        fn tick(&mut self, now: Instant) -> TickReport {
            let guard = self.registry.lock();
            self.driver
                .tick(now, &guard, &mut self.backend, &self.decoder)
        }

        fn wait_preload(&self) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.driver.preload.is_busy() {
                assert!(Instant::now() < deadline, "preload did not finish");
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    fn rotation_config(paths: &[&str], duration: Duration) -> WallpaperConfig {
        let mut config = test_config(paths);
        config.duration = duration;
        config.transition_duration = Duration::from_millis(300);
        config
    }

    #[test]
    fn first_tick_shows_initial_target() {
        let mut fx = Fixture::new(test_config(&["/walls/a.png", "/walls/b.png"]));
        let report = fx.tick(fx.start);
        let status = report.status.expect("status after first switch");
        assert_eq!(status.path, "/walls/a.png");
        assert_eq!(status.kind, ContentKind::Image);
        assert_eq!(fx.backend.uploads, 1);
        assert_eq!(fx.backend.draws, 1);
    }

    #[test]
    fn rotation_advances_with_transition_and_releases_outgoing() {
        let interval = Duration::from_secs(5);
        let mut fx = Fixture::new(rotation_config(
            &["/walls/a.png", "/walls/b.png", "/walls/c.png"],
            interval,
        ));
        fx.tick(fx.start);
        fx.wait_preload();

        // Interval elapses; the switch starts a 300ms blend.
        let t1 = fx.start + interval;
        let report = fx.tick(t1);
        assert_eq!(report.status.unwrap().path, "/walls/b.png");
        assert!(report.continuous);
        assert!(fx.driver.transition.is_active());

        let blends_before = fx.backend.blend_draws;
        fx.tick(t1 + Duration::from_millis(150));
        assert!(fx.backend.blend_draws > blends_before);

        // Transition completes; outgoing texture goes back to the backend.
        let releases_before = fx.backend.releases;
        let report = fx.tick(t1 + Duration::from_millis(400));
        assert!(!report.continuous);
        assert!(!fx.driver.transition.is_active());
        assert_eq!(fx.backend.releases, releases_before + 1);
    }

    #[test]
    fn preloaded_texture_is_used_without_second_upload() {
        let interval = Duration::from_secs(5);
        let mut fx = Fixture::new(rotation_config(
            &["/walls/a.png", "/walls/b.png"],
            interval,
        ));
        fx.tick(fx.start);
        fx.wait_preload();
        // Pump the staged decode onto the GPU ahead of the switch.
        fx.tick(fx.start + Duration::from_secs(1));
        let uploads_before = fx.backend.uploads;

        fx.tick(fx.start + interval);
        // The switch consumed the preloaded texture; no synchronous upload.
        assert_eq!(fx.backend.uploads, uploads_before);
    }

    #[test]
    fn skip_advances_immediately() {
        let mut fx = Fixture::new(rotation_config(
            &["/walls/a.png", "/walls/b.png"],
            Duration::from_secs(600),
        ));
        fx.tick(fx.start);
        fx.wait_preload();

        fx.driver.skip();
        let report = fx.tick(fx.start + Duration::from_secs(1));
        assert_eq!(report.status.unwrap().path, "/walls/b.png");
    }

    #[test]
    fn pause_holds_rotation_until_resume() {
        let interval = Duration::from_secs(5);
        let mut fx = Fixture::new(rotation_config(
            &["/walls/a.png", "/walls/b.png"],
            interval,
        ));
        fx.tick(fx.start);
        fx.wait_preload();

        fx.driver.pause(fx.start + Duration::from_secs(1));
        let report = fx.tick(fx.start + Duration::from_secs(60));
        assert!(report.status.is_none());

        fx.driver.resume(fx.start + Duration::from_secs(60));
        // 1s of the interval was used before the pause.
        let report = fx.tick(fx.start + Duration::from_secs(63));
        assert!(report.status.is_none());
        let report = fx.tick(fx.start + Duration::from_secs(64));
        assert_eq!(report.status.unwrap().path, "/walls/b.png");
    }

    #[test]
    fn failed_decode_keeps_previous_content() {
        let mut fx = Fixture::new(rotation_config(
            &["/walls/a.png", "/walls/broken.png"],
            Duration::from_secs(5),
        ));
        fx.tick(fx.start);
        fx.wait_preload();
        fx.decoder = Arc::new(StubDecoder::failing());
        // Drop whatever the good decoder preloaded so the switch must
        // decode synchronously, and fail.
        fx.driver.preload.shutdown(&mut fx.backend);

        let report = fx.tick(fx.start + Duration::from_secs(5));
        assert!(report.status.is_none());
        let status = fx
            .driver
            .snapshot(&test_config(&["/walls/a.png", "/walls/broken.png"]));
        assert_eq!(status.path, "/walls/a.png");
    }

    #[test]
    fn published_config_is_picked_up_on_next_tick() {
        let mut fx = Fixture::new(test_config(&["/walls/a.png"]));
        fx.tick(fx.start);

        {
            let guard = fx.registry.lock();
            let mut writer = guard.begin_write(ID).unwrap();
            writer.set(test_config(&["/walls/z.png"]));
            writer.publish();
        }

        let report = fx.tick(fx.start + Duration::from_secs(1));
        assert_eq!(report.status.unwrap().path, "/walls/z.png");
    }

    #[test]
    fn unpublished_config_changes_nothing() {
        let mut fx = Fixture::new(test_config(&["/walls/a.png"]));
        fx.tick(fx.start);

        {
            let guard = fx.registry.lock();
            let mut writer = guard.begin_write(ID).unwrap();
            writer.set(test_config(&["/walls/z.png"]));
            // Dropped without publish, as after a failed validation.
        }

        let report = fx.tick(fx.start + Duration::from_secs(1));
        assert!(report.status.is_none());
        let status = fx.driver.snapshot(&test_config(&["/walls/a.png"]));
        assert_eq!(status.path, "/walls/a.png");
    }

    #[test]
    fn reload_with_same_shader_applies_new_speed_and_channels() {
        let shader_section = |speed: f32, channels: Option<Vec<PathBuf>>| {
            test_config_with(move |section| {
                section.rotation = Some(vec![paperconfig::RotationTarget::Shader {
                    shader: "/shaders/waves.wgsl".into(),
                    speed,
                }]);
                section.channels = channels;
            })
        };
        let mut fx = Fixture::new(shader_section(1.0, None));
        fx.tick(fx.start);
        assert_eq!(fx.backend.last_animated, Some((1.0, 0)));

        {
            let guard = fx.registry.lock();
            let mut writer = guard.begin_write(ID).unwrap();
            writer.set(shader_section(2.0, Some(vec!["/walls/noise.png".into()])));
            writer.publish();
        }

        let report = fx.tick(fx.start + Duration::from_secs(1));
        assert!(report.status.is_some());
        assert_eq!(fx.backend.last_animated, Some((2.0, 1)));
    }

    #[test]
    fn reload_with_new_display_mode_redecodes_current_image() {
        let image_config = |mode: paperconfig::DisplayMode| {
            test_config_with(move |section| {
                section.rotation = Some(vec![paperconfig::RotationTarget::Image {
                    image: "/walls/a.png".into(),
                }]);
                section.mode = Some(mode);
                section.transition = Some(TransitionKind::None);
            })
        };
        let mut fx = Fixture::new(image_config(paperconfig::DisplayMode::Fill));
        fx.tick(fx.start);
        assert_eq!(fx.backend.uploads, 1);

        {
            let guard = fx.registry.lock();
            let mut writer = guard.begin_write(ID).unwrap();
            writer.set(image_config(paperconfig::DisplayMode::Center));
            writer.publish();
        }

        fx.tick(fx.start + Duration::from_secs(1));
        assert_eq!(fx.backend.uploads, 2);
        assert_eq!(fx.backend.releases, 1);
    }

    #[test]
    fn shader_target_paces_by_fps() {
        let config = test_config_with(|section| {
            section.rotation = Some(vec![paperconfig::RotationTarget::Shader {
                shader: "/shaders/waves.wgsl".into(),
                speed: 1.0,
            }]);
            section.fps = Some(10.0);
            section.vsync = Some(false);
        });
        let mut fx = Fixture::new(config);
        let report = fx.tick(fx.start);
        let status = report.status.unwrap();
        assert_eq!(status.kind, ContentKind::Shader);
        assert!(!report.continuous);
        assert_eq!(report.deadline, Some(fx.start + Duration::from_millis(100)));
        assert_eq!(fx.backend.animated_draws, 1);
    }

    #[test]
    fn repeated_animated_failures_degrade_to_fallback() {
        let config = test_config_with(|section| {
            section.rotation = Some(vec![paperconfig::RotationTarget::Shader {
                shader: "/shaders/bad.wgsl".into(),
                speed: 1.0,
            }]);
            section.fps = Some(1000.0);
        });
        let mut fx = Fixture::new(config);
        fx.backend.fail_animated = true;

        let mut now = fx.start;
        for _ in 0..MAX_ANIMATED_FAILURES + 1 {
            fx.tick(now);
            now += Duration::from_millis(2);
        }

        let status = fx.driver.snapshot(&test_config(&["/x.png"]));
        assert!(status.degraded);
        assert_eq!(status.kind, ContentKind::Fallback);
        assert!(fx.backend.fallback_draws >= 1);
    }

    #[test]
    fn shutdown_releases_all_textures() {
        let mut fx = Fixture::new(rotation_config(
            &["/walls/a.png", "/walls/b.png"],
            Duration::from_secs(5),
        ));
        fx.tick(fx.start);
        fx.wait_preload();
        fx.tick(fx.start + Duration::from_secs(5));

        fx.driver.shutdown(&mut fx.backend);
        assert_eq!(fx.backend.uploads, fx.backend.releases);
    }
}
