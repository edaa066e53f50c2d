//! Wayland layer-shell runtime.
//!
//! One calloop event loop drives everything: Wayland events, per-output
//! rotation timers, and the control channel fed by the IPC socket and the
//! config file watcher. Each output gets a background layer surface and an
//! [`engine::OutputDriver`] that decides what to render on it.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use engine::{Decoder, EngineControl, OutputDriver, OutputId, OutputRegistry, StatusRecord};
use paperconfig::ConfigFile;
use smithay_client_toolkit::reexports::calloop::{
    channel::{self, Sender},
    timer::{TimeoutAction, Timer},
    EventLoop, LoopHandle, RegistrationToken,
};
use smithay_client_toolkit::reexports::calloop_wayland_source::WaylandSource;
use smithay_client_toolkit::reexports::client::{
    globals::registry_queue_init,
    protocol::{wl_output, wl_surface},
    Connection, Proxy, QueueHandle,
};
use smithay_client_toolkit::{
    compositor::{CompositorHandler, CompositorState},
    delegate_compositor, delegate_layer, delegate_output, delegate_registry,
    output::{OutputHandler, OutputInfo, OutputState},
    registry::{ProvidesRegistryState, RegistryState},
    registry_handlers,
    shell::wlr_layer::{
        Anchor, KeyboardInteractivity, Layer, LayerShell, LayerShellHandler, LayerSurface,
        LayerSurfaceConfigure,
    },
    shell::WaylandSurface,
};

use crate::decode::ImageDecoder;
use crate::gpu::{ImageTexture, WgpuBackend};

/// Messages from the control socket and the config watcher.
#[derive(Debug, Clone)]
pub enum ControlMsg {
    /// Re-read the config file and publish it to every output.
    Reload,
    /// Advance one output by name, or all outputs.
    Skip(Option<String>),
    Pause,
    Resume,
    Shutdown,
}

pub struct RuntimeOptions {
    pub config_path: PathBuf,
    pub config: ConfigFile,
    /// Surface size used when the compositor reports nothing useful.
    pub fallback_size: (u32, u32),
}

pub type StatusSink = Box<dyn FnMut(&StatusRecord)>;

/// Sender half of the daemon's control channel.
pub type ControlSender = Sender<ControlMsg>;

/// Runs the daemon until shutdown. `on_ready` receives the control channel
/// sender once the loop is set up, so the caller can wire up the watcher and
/// IPC threads.
pub fn run(
    options: RuntimeOptions,
    control: Arc<EngineControl>,
    status_sink: StatusSink,
    on_ready: impl FnOnce(Sender<ControlMsg>),
) -> Result<()> {
    let conn = Connection::connect_to_env().context("failed to connect to Wayland compositor")?;
    let (globals, event_queue) =
        registry_queue_init(&conn).context("failed to initialize Wayland registry queue")?;
    let qh: QueueHandle<DaemonState> = event_queue.handle();

    let compositor =
        CompositorState::bind(&globals, &qh).context("wl_compositor is not available")?;
    let layer_shell =
        LayerShell::bind(&globals, &qh).context("layer shell protocol is not available")?;
    let registry_state = RegistryState::new(&globals);
    let output_state = OutputState::new(&globals, &qh);

    let mut event_loop: EventLoop<'static, DaemonState> =
        EventLoop::try_new().context("failed to create event loop")?;
    WaylandSource::new(conn.clone(), event_queue)
        .insert(event_loop.handle())
        .context("failed to insert Wayland source")?;

    let (control_tx, control_rx) = channel::channel();
    event_loop
        .handle()
        .insert_source(control_rx, |event, _, state: &mut DaemonState| {
            match event {
                channel::Event::Msg(msg) => state.handle_control(msg),
                channel::Event::Closed => state.exit = true,
            }
        })
        .map_err(|err| anyhow::anyhow!("failed to insert control channel: {err}"))?;

    on_ready(control_tx);

    let mut state = DaemonState {
        conn,
        qh,
        loop_handle: event_loop.handle(),
        compositor,
        layer_shell,
        registry_state,
        output_state,
        backend: WgpuBackend::new(),
        decoder: Arc::new(ImageDecoder),
        registry: OutputRegistry::new(),
        control,
        drivers: HashMap::new(),
        surfaces: HashMap::new(),
        next_output_id: 1,
        config_path: options.config_path,
        config_file: options.config,
        fallback_size: options.fallback_size,
        status_sink,
        exit: false,
    };

    while !state.exit && state.control.is_running() {
        event_loop
            .dispatch(None, &mut state)
            .context("error while processing events")?;
        if state.control.take_reload() {
            state.reload();
        }
    }

    state.shutdown_outputs();
    Ok(())
}

struct OutputSurface {
    wl_output: wl_output::WlOutput,
    layer: LayerSurface,
    name: String,
    configured: bool,
    frame_scheduled: bool,
    timer: Option<RegistrationToken>,
}

struct DaemonState {
    conn: Connection,
    qh: QueueHandle<DaemonState>,
    loop_handle: LoopHandle<'static, DaemonState>,
    compositor: CompositorState,
    layer_shell: LayerShell,
    registry_state: RegistryState,
    output_state: OutputState,
    backend: WgpuBackend,
    decoder: Arc<dyn Decoder>,
    registry: OutputRegistry,
    control: Arc<EngineControl>,
    drivers: HashMap<OutputId, OutputDriver<ImageTexture>>,
    surfaces: HashMap<OutputId, OutputSurface>,
    next_output_id: u64,
    config_path: PathBuf,
    config_file: ConfigFile,
    fallback_size: (u32, u32),
    status_sink: StatusSink,
    exit: bool,
}

impl DaemonState {
    fn output_by_surface(&self, surface: &wl_surface::WlSurface) -> Option<OutputId> {
        self.surfaces
            .iter()
            .find(|(_, entry)| entry.layer.wl_surface() == surface)
            .map(|(id, _)| *id)
    }

    fn output_by_wl_output(&self, output: &wl_output::WlOutput) -> Option<OutputId> {
        self.surfaces
            .iter()
            .find(|(_, entry)| &entry.wl_output == output)
            .map(|(id, _)| *id)
    }

    fn add_output(&mut self, output: wl_output::WlOutput) {
        if self.output_by_wl_output(&output).is_some() {
            return;
        }
        let id = OutputId(self.next_output_id);
        self.next_output_id += 1;

        let name = self
            .output_state
            .info(&output)
            .and_then(|info| info.name)
            .unwrap_or_else(|| format!("{id}"));

        let surface = self.compositor.create_surface(&self.qh);
        let layer = self.layer_shell.create_layer_surface(
            &self.qh,
            surface,
            Layer::Background,
            Some("wallflow".to_string()),
            Some(&output),
        );
        layer.set_anchor(Anchor::TOP | Anchor::BOTTOM | Anchor::LEFT | Anchor::RIGHT);
        layer.set_keyboard_interactivity(KeyboardInteractivity::None);
        layer.set_exclusive_zone(-1);
        layer.commit();

        tracing::info!(%id, %name, "new output");
        self.surfaces.insert(
            id,
            OutputSurface {
                wl_output: output,
                layer,
                name,
                configured: false,
                frame_scheduled: false,
                timer: None,
            },
        );
    }

    fn remove_output(&mut self, id: OutputId) {
        if let Some(mut driver) = self.drivers.remove(&id) {
            driver.shutdown(&mut self.backend);
        }
        self.backend.remove_output(id);
        self.registry.remove(id);
        if let Some(entry) = self.surfaces.remove(&id) {
            if let Some(token) = entry.timer {
                self.loop_handle.remove(token);
            }
            tracing::info!(%id, name = %entry.name, "output removed");
        }
    }

    fn shutdown_outputs(&mut self) {
        let ids: Vec<OutputId> = self.surfaces.keys().copied().collect();
        for id in ids {
            self.remove_output(id);
        }
    }

    fn resolve_size(&self, id: OutputId, new_size: (u32, u32)) -> (u32, u32) {
        if new_size.0 > 0 && new_size.1 > 0 {
            return new_size;
        }
        self.surfaces
            .get(&id)
            .and_then(|entry| self.output_state.info(&entry.wl_output))
            .and_then(output_info_physical_size)
            .unwrap_or(self.fallback_size)
    }

    /// First configure creates the GPU surface, the driver, and the config
    /// slots; later configures resize them.
    fn configure_output(&mut self, id: OutputId, size: (u32, u32)) {
        let Some(entry) = self.surfaces.get_mut(&id) else {
            return;
        };
        entry.configured = true;

        if self.backend.has_output(id) {
            self.backend.resize_output(id, size);
            if let Some(driver) = self.drivers.get_mut(&id) {
                driver.resize(size);
            }
            self.tick_output(id);
            return;
        }

        let resolved = match self.config_file.resolve(&entry.name) {
            Ok(resolved) => resolved,
            Err(err) => {
                tracing::error!(name = %entry.name, error = %err, "no usable config for output");
                return;
            }
        };

        let handle = WaylandSurfaceHandle::new(&self.conn, &entry.layer);
        if let Err(err) =
            self.backend
                .add_output(id, &handle, size, resolved.animation.vsync)
        {
            tracing::error!(name = %entry.name, error = %err, "failed to initialise GPU surface");
            return;
        }

        let now = Instant::now();
        let mut driver = OutputDriver::new(id, entry.name.clone(), size, now);
        if self.control.is_paused() {
            driver.pause(now);
        }
        self.registry.insert(id, resolved);
        self.drivers.insert(id, driver);
        self.tick_output(id);
    }

    fn tick_output(&mut self, id: OutputId) {
        let Some(driver) = self.drivers.get_mut(&id) else {
            return;
        };
        let now = Instant::now();
        let report = {
            let guard = self.registry.lock();
            driver.tick(now, &guard, &mut self.backend, &self.decoder)
        };

        if let Some(status) = report.status {
            (self.status_sink)(&status);
        }

        if let Some(entry) = self.surfaces.get_mut(&id) {
            if report.continuous && !entry.frame_scheduled {
                let surface = entry.layer.wl_surface();
                surface.frame(&self.qh, surface.clone());
                entry.frame_scheduled = true;
                entry.layer.commit();
            }
        }

        self.rearm_timer(id, report.deadline);
    }

    /// Replaces the output's timer with one for `deadline`. Stale timers are
    /// always removed so an output never ticks on an outdated schedule.
    fn rearm_timer(&mut self, id: OutputId, deadline: Option<Instant>) {
        let Some(entry) = self.surfaces.get_mut(&id) else {
            return;
        };
        if let Some(token) = entry.timer.take() {
            self.loop_handle.remove(token);
        }
        let Some(deadline) = deadline else {
            return;
        };
        let source = Timer::from_deadline(deadline);
        match self
            .loop_handle
            .insert_source(source, move |_, _, state: &mut DaemonState| {
                if let Some(entry) = state.surfaces.get_mut(&id) {
                    entry.timer = None;
                }
                state.tick_output(id);
                TimeoutAction::Drop
            }) {
            Ok(token) => entry.timer = Some(token),
            Err(err) => tracing::warn!(%id, error = %err, "failed to arm output timer"),
        }
    }

    fn handle_control(&mut self, msg: ControlMsg) {
        match msg {
            // Reload runs from the main loop after dispatch; the flag
            // coalesces a burst of watcher events into one re-read.
            ControlMsg::Reload => self.control.request_reload(),
            ControlMsg::Skip(name) => {
                let ids: Vec<OutputId> = self
                    .surfaces
                    .iter()
                    .filter(|(_, entry)| {
                        name.as_deref()
                            .map_or(true, |wanted| entry.name == wanted)
                    })
                    .map(|(id, _)| *id)
                    .collect();
                for id in ids {
                    if let Some(driver) = self.drivers.get_mut(&id) {
                        driver.skip();
                    }
                    self.tick_output(id);
                }
            }
            ControlMsg::Pause => self.set_paused(true),
            ControlMsg::Resume => self.set_paused(false),
            ControlMsg::Shutdown => {
                self.control.shutdown();
                self.exit = true;
            }
        }
    }

    fn set_paused(&mut self, paused: bool) {
        if paused {
            self.control.pause();
        } else {
            self.control.resume();
        }
        let now = Instant::now();
        let ids: Vec<OutputId> = self.drivers.keys().copied().collect();
        for id in ids {
            if let Some(driver) = self.drivers.get_mut(&id) {
                if paused {
                    driver.pause(now);
                } else {
                    driver.resume(now);
                }
                let config = {
                    let guard = self.registry.lock();
                    guard.config(id).map(|config| (*config).clone())
                };
                if let Some(config) = config {
                    let status = driver.snapshot(&config);
                    (self.status_sink)(&status);
                }
            }
            self.tick_output(id);
        }
        tracing::info!(paused, "rotation pause state changed");
    }

    /// Re-reads the config file and publishes it per output. A file that
    /// fails to parse or validate leaves every output untouched.
    fn reload(&mut self) {
        let raw = match std::fs::read_to_string(&self.config_path) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(path = %self.config_path.display(), error = %err, "reload failed to read config");
                return;
            }
        };
        let parsed = match ConfigFile::from_toml_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(path = %self.config_path.display(), error = %err, "reload rejected; keeping previous config");
                return;
            }
        };
        self.config_file = parsed;
        tracing::info!(path = %self.config_path.display(), "config reloaded");

        let targets: Vec<(OutputId, String)> = self
            .surfaces
            .iter()
            .filter(|(id, _)| self.drivers.contains_key(id))
            .map(|(id, entry)| (*id, entry.name.clone()))
            .collect();
        for (id, name) in targets {
            match self.config_file.resolve(&name) {
                Ok(resolved) => {
                    let vsync = resolved.animation.vsync;
                    {
                        let guard = self.registry.lock();
                        if let Some(mut writer) = guard.begin_write(id) {
                            writer.set(resolved);
                            writer.publish();
                        };
                    }
                    self.backend.set_vsync(id, vsync);
                    self.backend.invalidate_shaders(id);
                    self.tick_output(id);
                }
                Err(err) => {
                    tracing::warn!(%name, error = %err, "output keeps previous config");
                }
            }
        }
    }
}

impl CompositorHandler for DaemonState {
    fn scale_factor_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_factor: i32,
    ) {
    }

    fn transform_changed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        _surface: &wl_surface::WlSurface,
        _new_transform: wl_output::Transform,
    ) {
    }

    fn frame(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        surface: &wl_surface::WlSurface,
        _time: u32,
    ) {
        if let Some(id) = self.output_by_surface(surface) {
            if let Some(entry) = self.surfaces.get_mut(&id) {
                entry.frame_scheduled = false;
            }
            self.tick_output(id);
        }
    }
}

impl LayerShellHandler for DaemonState {
    fn closed(&mut self, _conn: &Connection, _qh: &QueueHandle<Self>, layer: &LayerSurface) {
        let id = self.output_by_surface(layer.wl_surface());
        if let Some(id) = id {
            self.remove_output(id);
        }
    }

    fn configure(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        layer: &LayerSurface,
        configure: LayerSurfaceConfigure,
        _serial: u32,
    ) {
        let Some(id) = self.output_by_surface(layer.wl_surface()) else {
            return;
        };
        let size = self.resolve_size(id, configure.new_size);
        layer.set_size(size.0, size.1);
        tracing::debug!(
            %id,
            "layer configure new_size={}x{} -> using {}x{}",
            configure.new_size.0,
            configure.new_size.1,
            size.0,
            size.1
        );
        self.configure_output(id, size);
    }
}

impl OutputHandler for DaemonState {
    fn output_state(&mut self) -> &mut OutputState {
        &mut self.output_state
    }

    fn new_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        self.add_output(output);
    }

    fn update_output(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        let Some(id) = self.output_by_wl_output(&output) else {
            return;
        };
        let configured = self
            .surfaces
            .get(&id)
            .map_or(false, |entry| entry.configured);
        if !configured {
            return;
        }
        if let Some(size) = self
            .output_state
            .info(&output)
            .and_then(output_info_physical_size)
        {
            if let Some(entry) = self.surfaces.get(&id) {
                entry.layer.set_size(size.0, size.1);
                entry.layer.commit();
            }
            self.configure_output(id, size);
        }
    }

    fn output_destroyed(
        &mut self,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
        output: wl_output::WlOutput,
    ) {
        if let Some(id) = self.output_by_wl_output(&output) {
            self.remove_output(id);
        }
    }
}

impl ProvidesRegistryState for DaemonState {
    fn registry(&mut self) -> &mut RegistryState {
        &mut self.registry_state
    }

    registry_handlers![OutputState];
}

delegate_compositor!(DaemonState);
delegate_output!(DaemonState);
delegate_layer!(DaemonState);
delegate_registry!(DaemonState);

struct WaylandSurfaceHandle {
    display: *mut c_void,
    surface: *mut c_void,
}

impl WaylandSurfaceHandle {
    fn new(conn: &Connection, layer_surface: &LayerSurface) -> Self {
        let display = conn.backend().display_ptr() as *mut c_void;
        let surface = layer_surface.wl_surface().id().as_ptr() as *mut c_void;
        Self { display, surface }
    }
}

impl raw_window_handle::HasDisplayHandle for WaylandSurfaceHandle {
    fn display_handle(
        &self,
    ) -> StdResult<raw_window_handle::DisplayHandle<'_>, raw_window_handle::HandleError> {
        let display =
            NonNull::new(self.display).ok_or(raw_window_handle::HandleError::Unavailable)?;
        let wayland = raw_window_handle::WaylandDisplayHandle::new(display);
        let raw = raw_window_handle::RawDisplayHandle::Wayland(wayland);
        Ok(unsafe { raw_window_handle::DisplayHandle::borrow_raw(raw) })
    }
}

impl raw_window_handle::HasWindowHandle for WaylandSurfaceHandle {
    fn window_handle(
        &self,
    ) -> StdResult<raw_window_handle::WindowHandle<'_>, raw_window_handle::HandleError> {
        let surface =
            NonNull::new(self.surface).ok_or(raw_window_handle::HandleError::Unavailable)?;
        let wayland = raw_window_handle::WaylandWindowHandle::new(surface);
        let raw = raw_window_handle::RawWindowHandle::Wayland(wayland);
        Ok(unsafe { raw_window_handle::WindowHandle::borrow_raw(raw) })
    }
}

fn output_info_physical_size(info: OutputInfo) -> Option<(u32, u32)> {
    if let Some(mode) = info.modes.iter().find(|mode| mode.current) {
        let width = mode.dimensions.0.max(1) as u32;
        let height = mode.dimensions.1.max(1) as u32;
        return Some((width, height));
    }

    if let Some((width, height)) = info.logical_size {
        let scale = info.scale_factor.max(1) as u32;
        return Some((width.max(1) as u32 * scale, height.max(1) as u32 * scale));
    }

    None
}
