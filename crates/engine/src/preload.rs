//! Background decode pipeline.
//!
//! Decoding a large image on the render thread stalls every output sharing
//! it, so the next rotation target is decoded ahead of time on a worker
//! thread and handed back through a [`HandoffSlot`]. The GPU upload still
//! happens on the render thread, inside [`PreloadPipeline::pump`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use paperconfig::DisplayMode;

use crate::backend::{Decoder, OutputId, RenderBackend, StagedDecode};
use crate::handoff::{CancelToken, HandoffSlot};

struct PreloadShared {
    /// True from request until the worker has finished staging (or bailed).
    /// The worker clears this last, after the staged slot is filled.
    active: AtomicBool,
    cancel: CancelToken,
    staged: HandoffSlot<StagedDecode>,
}

/// Per-output preload state. At most one decode worker runs per output.
pub struct PreloadPipeline<T> {
    output: OutputId,
    shared: Arc<PreloadShared>,
    requested: Option<PathBuf>,
    ready: Option<(PathBuf, T)>,
    worker: Option<JoinHandle<()>>,
}

impl<T> PreloadPipeline<T> {
    pub fn new(output: OutputId) -> Self {
        Self {
            output,
            shared: Arc::new(PreloadShared {
                active: AtomicBool::new(false),
                cancel: CancelToken::new(),
                staged: HandoffSlot::new(),
            }),
            requested: None,
            ready: None,
            worker: None,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.shared.active.load(Ordering::Acquire)
    }

    /// Kicks off a background decode of `path` unless one is already in
    /// flight or its result is already available.
    pub fn request(
        &mut self,
        path: &Path,
        size: (u32, u32),
        mode: DisplayMode,
        decoder: &Arc<dyn Decoder>,
    ) {
        if self.is_busy() {
            return;
        }
        if self
            .ready
            .as_ref()
            .map_or(false, |(ready_path, _)| ready_path == path)
        {
            return;
        }
        if self.shared.staged.is_pending() && self.requested.as_deref() == Some(path) {
            return;
        }

        // Reap a finished worker before spawning the next one.
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }

        self.shared.cancel.reset();
        self.shared.active.store(true, Ordering::Release);
        self.requested = Some(path.to_path_buf());

        let shared = Arc::clone(&self.shared);
        let decoder = Arc::clone(decoder);
        let path = path.to_path_buf();
        let output = self.output;
        let spawned = std::thread::Builder::new()
            .name("wallflow-preload".into())
            .spawn(move || {
                let result = decoder.decode(&path, size, mode);
                if shared.cancel.is_cancelled() {
                    shared.active.store(false, Ordering::Release);
                    return;
                }
                match result {
                    Ok(pixels) => {
                        shared.staged.stage(StagedDecode { path, pixels });
                    }
                    Err(err) => {
                        tracing::warn!(%output, error = %err, "preload decode failed");
                    }
                }
                shared.active.store(false, Ordering::Release);
            });
        match spawned {
            Ok(handle) => self.worker = Some(handle),
            Err(err) => {
                tracing::warn!(%output, error = %err, "failed to spawn preload worker");
                self.shared.active.store(false, Ordering::Release);
                self.requested = None;
            }
        }
    }

    /// Moves a staged decode onto the GPU. Called from the render thread; a
    /// texture superseded by a newer staging goes back to the backend.
    pub fn pump<B: RenderBackend<Texture = T>>(&mut self, backend: &mut B) {
        let Some(staged) = self.shared.staged.take() else {
            return;
        };
        match backend.upload(self.output, &staged.pixels) {
            Ok(texture) => {
                if let Some((_, old)) = self.ready.replace((staged.path, texture)) {
                    backend.release(old);
                }
            }
            Err(err) => {
                tracing::warn!(output = %self.output, error = %err, "preload upload failed");
            }
        }
    }

    /// Takes the preloaded texture if it matches `path`.
    pub fn take_ready(&mut self, path: &Path) -> Option<T> {
        match &self.ready {
            Some((ready_path, _)) if ready_path == path => {
                self.ready.take().map(|(_, texture)| texture)
            }
            _ => None,
        }
    }

    /// Drops any preloaded texture that no longer matches the rotation, for
    /// example after a config reload changed the upcoming target.
    pub fn discard_ready<B: RenderBackend<Texture = T>>(&mut self, backend: &mut B) {
        if let Some((_, texture)) = self.ready.take() {
            backend.release(texture);
        }
    }

    /// Cancels any in-flight decode and releases everything the pipeline
    /// holds. Called when the output goes away.
    pub fn shutdown<B: RenderBackend<Texture = T>>(&mut self, backend: &mut B) {
        self.shared.cancel.cancel();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
        self.shared.staged.clear();
        self.discard_ready(backend);
        self.requested = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{StubBackend, StubDecoder};
    use std::time::{Duration, Instant};

    fn wait_idle(pipeline: &PreloadPipeline<u32>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.is_busy() {
            assert!(Instant::now() < deadline, "preload worker did not finish");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn decode_stages_and_pump_uploads() {
        let decoder: Arc<dyn Decoder> = Arc::new(StubDecoder::default());
        let mut backend = StubBackend::default();
        let mut pipeline = PreloadPipeline::new(OutputId(1));

        pipeline.request(
            Path::new("/walls/a.png"),
            (64, 64),
            DisplayMode::Fill,
            &decoder,
        );
        wait_idle(&pipeline);

        pipeline.pump(&mut backend);
        assert_eq!(backend.uploads, 1);
        let texture = pipeline.take_ready(Path::new("/walls/a.png"));
        assert!(texture.is_some());
        assert!(pipeline.take_ready(Path::new("/walls/a.png")).is_none());
    }

    #[test]
    fn take_ready_rejects_mismatched_path() {
        let decoder: Arc<dyn Decoder> = Arc::new(StubDecoder::default());
        let mut backend = StubBackend::default();
        let mut pipeline = PreloadPipeline::new(OutputId(1));

        pipeline.request(
            Path::new("/walls/a.png"),
            (64, 64),
            DisplayMode::Fill,
            &decoder,
        );
        wait_idle(&pipeline);
        pipeline.pump(&mut backend);

        assert!(pipeline.take_ready(Path::new("/walls/b.png")).is_none());
        assert!(pipeline.take_ready(Path::new("/walls/a.png")).is_some());
    }

    #[test]
    fn request_dedupes_while_busy() {
        let stub = Arc::new(StubDecoder::slow(Duration::from_millis(50)));
        let decoder: Arc<dyn Decoder> = stub.clone();
        let mut pipeline: PreloadPipeline<u32> = PreloadPipeline::new(OutputId(1));

        pipeline.request(
            Path::new("/walls/a.png"),
            (8, 8),
            DisplayMode::Fill,
            &decoder,
        );
        pipeline.request(
            Path::new("/walls/a.png"),
            (8, 8),
            DisplayMode::Fill,
            &decoder,
        );
        wait_idle(&pipeline);

        assert_eq!(stub.calls(), 1);
    }

    #[test]
    fn failed_decode_leaves_nothing_staged() {
        let decoder: Arc<dyn Decoder> = Arc::new(StubDecoder::failing());
        let mut backend = StubBackend::default();
        let mut pipeline = PreloadPipeline::new(OutputId(1));

        pipeline.request(
            Path::new("/walls/broken.png"),
            (8, 8),
            DisplayMode::Fill,
            &decoder,
        );
        wait_idle(&pipeline);
        pipeline.pump(&mut backend);

        assert_eq!(backend.uploads, 0);
        assert!(pipeline.take_ready(Path::new("/walls/broken.png")).is_none());
    }

    #[test]
    fn newer_result_replaces_unconsumed_one() {
        let decoder: Arc<dyn Decoder> = Arc::new(StubDecoder::default());
        let mut backend = StubBackend::default();
        let mut pipeline = PreloadPipeline::new(OutputId(1));

        pipeline.request(
            Path::new("/walls/a.png"),
            (8, 8),
            DisplayMode::Fill,
            &decoder,
        );
        wait_idle(&pipeline);
        pipeline.pump(&mut backend);

        // The rotation moved on before anyone consumed a.png.
        pipeline.request(
            Path::new("/walls/b.png"),
            (8, 8),
            DisplayMode::Fill,
            &decoder,
        );
        wait_idle(&pipeline);
        pipeline.pump(&mut backend);

        assert_eq!(backend.uploads, 2);
        assert_eq!(backend.releases, 1);
        assert!(pipeline.take_ready(Path::new("/walls/a.png")).is_none());
        assert!(pipeline.take_ready(Path::new("/walls/b.png")).is_some());
    }

    #[test]
    fn shutdown_releases_ready_texture() {
        let decoder: Arc<dyn Decoder> = Arc::new(StubDecoder::default());
        let mut backend = StubBackend::default();
        let mut pipeline = PreloadPipeline::new(OutputId(1));

        pipeline.request(
            Path::new("/walls/a.png"),
            (8, 8),
            DisplayMode::Fill,
            &decoder,
        );
        wait_idle(&pipeline);
        pipeline.pump(&mut backend);
        pipeline.shutdown(&mut backend);

        assert_eq!(backend.uploads, 1);
        assert_eq!(backend.releases, 1);
    }
}
