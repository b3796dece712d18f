//! Background bake scheduling.
//!
//! [`LightmapBaker::start`] allocates the maps and bakes geometry buffers on
//! the calling thread (the rasterizer is usually tied to it), then hands the
//! remaining stages to a named worker thread that fans texel work out over a
//! dedicated rayon pool:
//!
//! ```text
//! Initializing -> BakingGeometryBuffers -> BuildingScene -> BiasingPositions
//!   -> ComputingDirect -> ComputingIndirect(0..N) -> Completed
//! ```
//!
//! `Cancelled` is reachable from every non-terminal stage and `Failed` from
//! any stage that returns an error.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use nebula_config::{DebugOutputConfig, LightmapBakingSettings};
use tracing::{debug, error, info, warn};

use crate::allocator::allocate_lightmaps;
use crate::bias::correct_positions;
use crate::context::CancellationToken;
use crate::denoise::Compositor;
use crate::direct::compute_direct;
use crate::error::BakeError;
use crate::events::{BakeEventHandler, BakeStage, BakeState, BakeStatus, EventSink};
use crate::gbuffer::{ObjectSpaceRasterizer, bake_geometry_buffers};
use crate::indirect::compute_indirect;
use crate::lightmap_set::{LightmapSet, save_diffuse_images};
use crate::map::ObjectMapSet;
use crate::scene::{Level, LightmapIds};

/// How long `wait_with` blocks between calls to its pump.
const WAIT_SLICE: Duration = Duration::from_millis(1);

/// Clears the running flag and signals completion when the worker exits,
/// including by panic.
struct RunningGuard {
    state: Arc<BakeState>,
    done: Sender<()>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.state.set_running(false);
        let _ = self.done.send(());
    }
}

/// Runs lightmap bakes in the background.
pub struct LightmapBaker {
    state: Arc<BakeState>,
    sink: Arc<EventSink>,
    output: Arc<Mutex<LightmapSet>>,
    worker: Option<JoinHandle<Result<(), BakeError>>>,
    done: Option<Receiver<()>>,
    debug_output: DebugOutputConfig,
}

impl LightmapBaker {
    pub fn new(handler: impl BakeEventHandler + 'static) -> Self {
        let state = Arc::new(BakeState::new());
        let sink = Arc::new(EventSink::new(state.clone(), Box::new(handler)));
        Self {
            state,
            sink,
            output: Arc::new(Mutex::new(LightmapSet::default())),
            worker: None,
            done: None,
            debug_output: DebugOutputConfig::default(),
        }
    }

    /// Write debug images as configured once a bake completes.
    pub fn with_debug_output(mut self, debug_output: DebugOutputConfig) -> Self {
        self.debug_output = debug_output;
        self
    }

    /// Start baking `level`.
    ///
    /// Geometry buffers are rasterized before this returns; everything else
    /// runs on the worker. Fails with [`BakeError::AlreadyRunning`] while a
    /// previous bake is still running.
    pub fn start(
        &mut self,
        settings: &LightmapBakingSettings,
        level: Arc<dyn Level>,
        rasterizer: &dyn ObjectSpaceRasterizer,
    ) -> Result<(), BakeError> {
        if self.is_running() {
            return Err(BakeError::AlreadyRunning);
        }
        // A finished previous bake still needs joining.
        if let Err(e) = self.join_worker() {
            warn!("Previous lightmap bake ended with an unreported error: {e}");
        }

        self.state.token().reset();
        self.state.set_running(true);
        let started = self.prepare_and_spawn(settings, level, rasterizer);
        if let Err(e) = &started {
            error!("Lightmap bake failed to start: {e}");
            self.state.set_stage(BakeStage::Failed);
            self.state.set_running(false);
        }
        started
    }

    fn prepare_and_spawn(
        &mut self,
        settings: &LightmapBakingSettings,
        level: Arc<dyn Level>,
        rasterizer: &dyn ObjectSpaceRasterizer,
    ) -> Result<(), BakeError> {
        self.state.set_stage(BakeStage::Initializing);
        self.sink.status("Initializing lightmaps...");
        let allocation = allocate_lightmaps(level.objects(), settings);
        let mut maps = allocation
            .resolutions
            .iter()
            .map(|&resolution| ObjectMapSet::new(resolution, resolution))
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            lightmaps = maps.len(),
            texels = maps.iter().map(|m| m.light_map.len()).sum::<usize>(),
            "Allocated lightmaps"
        );
        *lock(&self.output) = LightmapSet {
            object_lightmap_ids: allocation.ids.clone(),
            lightmaps: Vec::new(),
        };

        self.state.set_stage(BakeStage::BakingGeometryBuffers);
        self.sink.status("Baking G-Buffers...");
        let sink = &self.sink;
        bake_geometry_buffers(
            level.objects(),
            &allocation.ids,
            &mut maps,
            rasterizer,
            settings.super_sample_factor,
            |done, total| sink.progress(done, total),
        )?;
        if let Some(dir) = &self.debug_output.dump_dir {
            if self.debug_output.dump_diffuse_maps {
                dump_images(dir, "diffuse", || save_diffuse_images(&maps, dir));
            }
        }

        let threads = match settings.worker_threads {
            0 => num_cpus::get(),
            n => n,
        };
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("lightmap-texel-{i}"))
            .build()
            .map_err(BakeError::ThreadPool)?;

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let guard = RunningGuard {
            state: self.state.clone(),
            done: done_tx,
        };
        let job = BakeJob {
            settings: settings.clone(),
            level,
            ids: allocation.ids,
            maps,
            state: self.state.clone(),
            sink: self.sink.clone(),
            output: self.output.clone(),
            debug_output: self.debug_output.clone(),
        };
        let handle = std::thread::Builder::new()
            .name("lightmap-bake".into())
            .spawn(move || {
                let _guard = guard;
                pool.install(|| job.run())
            })
            .map_err(BakeError::WorkerSpawn)?;

        info!(threads, "Lightmap bake started");
        self.worker = Some(handle);
        self.done = Some(done_rx);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.token().is_cancelled()
    }

    /// Clone of the flag [`cancel`](Self::cancel) raises.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.state.token().clone()
    }

    /// Current stage and its completion fraction.
    pub fn state(&self) -> BakeStatus {
        self.state.snapshot()
    }

    /// Block until the worker finishes.
    pub fn wait(&mut self) -> Result<(), BakeError> {
        self.wait_with(|| {})
    }

    /// Block until the worker finishes, calling `pump` between short waits
    /// so the caller can keep its event loop alive.
    pub fn wait_with(&mut self, mut pump: impl FnMut()) -> Result<(), BakeError> {
        if let Some(done) = self.done.take() {
            loop {
                match done.recv_timeout(WAIT_SLICE) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => pump(),
                }
            }
        }
        self.join_worker()
    }

    fn join_worker(&mut self) -> Result<(), BakeError> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        match handle.join() {
            Ok(result) => result,
            Err(_) => {
                error!("Lightmap bake worker panicked");
                self.state.set_stage(BakeStage::Failed);
                Err(BakeError::WorkerPanicked)
            }
        }
    }

    /// Raise the cancellation flag and wait for the worker to stop.
    ///
    /// No status or progress event is delivered once the flag is raised.
    pub fn cancel(&mut self) -> Result<(), BakeError> {
        self.cancel_with(|| {})
    }

    /// Like [`cancel`](Self::cancel), calling `pump` while waiting, both
    /// for a handler callback that is still running and for the worker.
    ///
    /// Handlers that forward events to a queue drained by the caller's event
    /// loop need this to make progress.
    pub fn cancel_with(&mut self, mut pump: impl FnMut()) -> Result<(), BakeError> {
        self.sink.cancel_with(&mut pump);
        info!("Lightmap bake cancellation requested");
        self.wait_with(pump)
    }

    /// Snapshot of the lightmaps published so far. Complete after a
    /// successful [`wait`](Self::wait).
    pub fn lightmap_set(&self) -> LightmapSet {
        lock(&self.output).clone()
    }
}

impl Drop for LightmapBaker {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.cancel();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn dump_images(
    dir: &Path,
    what: &str,
    save: impl FnOnce() -> Result<Vec<std::path::PathBuf>, BakeError>,
) {
    if let Err(e) = std::fs::create_dir_all(dir) {
        warn!("Failed to create debug output directory {}: {e}", dir.display());
        return;
    }
    match save() {
        Ok(paths) => debug!(count = paths.len(), "Wrote {what} debug images to {}", dir.display()),
        Err(e) => warn!("Failed to write {what} debug images: {e}"),
    }
}

/// Everything the worker owns for the stages after geometry baking.
struct BakeJob {
    settings: LightmapBakingSettings,
    level: Arc<dyn Level>,
    ids: LightmapIds,
    maps: Vec<ObjectMapSet>,
    state: Arc<BakeState>,
    sink: Arc<EventSink>,
    output: Arc<Mutex<LightmapSet>>,
    debug_output: DebugOutputConfig,
}

/// Whether a stage finished or was cancelled.
enum Flow {
    Continue,
    Cancelled,
}

impl BakeJob {
    fn run(mut self) -> Result<(), BakeError> {
        let result = self.run_stages();
        match &result {
            Ok(Flow::Continue) => {
                self.state.set_stage(BakeStage::Completed);
                self.state.set_fraction(1.0);
                self.sink.status("Baking completed.");
                info!("Lightmap bake completed");
                if let Some(dir) = &self.debug_output.dump_dir {
                    let set = lock(&self.output).clone();
                    dump_images(dir, "lightmap", || set.save_debug_images(dir));
                }
                self.sink.completed();
            }
            Ok(Flow::Cancelled) => {
                self.state.set_stage(BakeStage::Cancelled);
                self.sink.status("Baking cancelled.");
                info!("Lightmap bake cancelled");
            }
            Err(e) => {
                self.state.set_stage(BakeStage::Failed);
                error!("Lightmap bake failed: {e}");
            }
        }
        result.map(|_| ())
    }

    fn checkpoint(&self) -> Flow {
        if self.state.token().is_cancelled() {
            Flow::Cancelled
        } else {
            Flow::Continue
        }
    }

    fn run_stages(&mut self) -> Result<Flow, BakeError> {
        let token = self.state.token().clone();

        self.state.set_stage(BakeStage::BuildingScene);
        self.sink.status("Building BVH...");
        let scene = self.level.build_static_scene(&self.ids);
        if let Flow::Cancelled = self.checkpoint() {
            return Ok(Flow::Cancelled);
        }

        self.state.set_stage(BakeStage::BiasingPositions);
        correct_positions(&mut self.maps, scene.as_ref(), self.settings.shadow_bias, &token);
        if let Flow::Cancelled = self.checkpoint() {
            return Ok(Flow::Cancelled);
        }

        self.state.set_stage(BakeStage::ComputingDirect);
        self.sink.status("Computing direct lighting...");
        let sink = &self.sink;
        compute_direct(&mut self.maps, scene.as_ref(), &token, |done, total| {
            sink.progress(done, total)
        });
        if let Flow::Cancelled = self.checkpoint() {
            return Ok(Flow::Cancelled);
        }

        let mut compositor = Compositor::new();
        self.publish(&mut compositor)?;

        let bounces = self.settings.indirect_lighting_bounces;
        for bounce in 0..bounces {
            let final_gather = bounce + 1 == bounces;
            let sample_count = if final_gather {
                self.settings.final_gather_sample_count
            } else {
                self.settings.sample_count
            };
            self.state.set_stage(BakeStage::ComputingIndirect { bounce });
            self.sink.status(&format!(
                "Computing indirect lighting, pass {}/{}{}...",
                bounce + 1,
                bounces,
                if final_gather { "(final gather)" } else { "" }
            ));
            let sink = &self.sink;
            compute_indirect(
                &mut self.maps,
                scene.as_ref(),
                sample_count,
                bounce,
                self.settings.seed,
                &token,
                |done, total| sink.progress(done, total),
            )?;
            if let Flow::Cancelled = self.checkpoint() {
                return Ok(Flow::Cancelled);
            }
            self.publish(&mut compositor)?;
            self.sink.iteration_completed(bounce);
        }
        Ok(Flow::Continue)
    }

    /// Composite every map and replace the published lightmaps.
    fn publish(&mut self, compositor: &mut Compositor) -> Result<(), BakeError> {
        let lightmaps = self
            .maps
            .iter_mut()
            .map(|map| compositor.process(map))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = lightmaps.len(), "Published lightmaps");
        let mut output = lock(&self.output);
        output.object_lightmap_ids = self.ids.clone();
        output.lightmaps = lightmaps;
        Ok(())
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
