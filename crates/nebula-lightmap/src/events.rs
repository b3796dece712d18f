//! Bake state shared with the caller, and event delivery.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use crate::context::CancellationToken;

/// Receives bake notifications.
///
/// Called synchronously from whichever thread runs the current stage, while
/// an internal lock is held. Implementations must not call back into the
/// [`LightmapBaker`](crate::LightmapBaker).
pub trait BakeEventHandler: Send {
    fn on_status_changed(&mut self, _status: &str) {}

    fn on_progress_changed(&mut self, _done: usize, _total: usize) {}

    /// A bounce (0-based) finished and its lightmaps were published.
    fn on_iteration_completed(&mut self, _bounce: u32) {}

    /// The bake ran to completion. Not called for cancelled or failed bakes.
    fn on_completed(&mut self) {}
}

/// Handler that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

impl BakeEventHandler for NoopHandler {}

/// Pipeline stage of a bake.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BakeStage {
    #[default]
    Idle,
    Initializing,
    BakingGeometryBuffers,
    BuildingScene,
    BiasingPositions,
    ComputingDirect,
    ComputingIndirect {
        bounce: u32,
    },
    Completed,
    Cancelled,
    Failed,
}

impl BakeStage {
    /// Whether the bake has stopped in this stage.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    fn encode(self) -> u64 {
        match self {
            Self::Idle => 0,
            Self::Initializing => 1,
            Self::BakingGeometryBuffers => 2,
            Self::BuildingScene => 3,
            Self::BiasingPositions => 4,
            Self::ComputingDirect => 5,
            Self::ComputingIndirect { bounce } => 6 | (bounce as u64) << 32,
            Self::Completed => 7,
            Self::Cancelled => 8,
            Self::Failed => 9,
        }
    }

    fn decode(raw: u64) -> Self {
        match raw & 0xff {
            1 => Self::Initializing,
            2 => Self::BakingGeometryBuffers,
            3 => Self::BuildingScene,
            4 => Self::BiasingPositions,
            5 => Self::ComputingDirect,
            6 => Self::ComputingIndirect {
                bounce: (raw >> 32) as u32,
            },
            7 => Self::Completed,
            8 => Self::Cancelled,
            9 => Self::Failed,
            _ => Self::Idle,
        }
    }
}

/// Snapshot of a bake's progress.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BakeStatus {
    pub stage: BakeStage,
    /// Completion of the current stage in `[0, 1]`.
    pub fraction: f32,
}

/// Lock-free bake state.
///
/// Stage and fraction are written by the bake, the cancellation flag by the
/// caller.
#[derive(Debug, Default)]
pub struct BakeState {
    stage: AtomicU64,
    fraction: AtomicU32,
    running: AtomicBool,
    token: CancellationToken,
}

impl BakeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self) -> BakeStage {
        BakeStage::decode(self.stage.load(Ordering::Acquire))
    }

    pub(crate) fn set_stage(&self, stage: BakeStage) {
        self.stage.store(stage.encode(), Ordering::Release);
        self.set_fraction(0.0);
    }

    pub fn fraction(&self) -> f32 {
        f32::from_bits(self.fraction.load(Ordering::Relaxed))
    }

    pub(crate) fn set_fraction(&self, fraction: f32) {
        self.fraction
            .store(fraction.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn snapshot(&self) -> BakeStatus {
        BakeStatus {
            stage: self.stage(),
            fraction: self.fraction(),
        }
    }
}

/// Delivers events to the handler, gated by the cancellation flag.
///
/// The flag is re-checked under the handler lock before every delivery, and
/// [`cancel_with`](Self::cancel_with) waits for that lock after raising the
/// flag, so once it returns no further status or progress event is
/// delivered.
pub struct EventSink {
    state: Arc<BakeState>,
    handler: Mutex<Box<dyn BakeEventHandler>>,
}

impl EventSink {
    pub fn new(state: Arc<BakeState>, handler: Box<dyn BakeEventHandler>) -> Self {
        Self {
            state,
            handler: Mutex::new(handler),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn BakeEventHandler>> {
        self.handler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self, status: &str) {
        let mut handler = self.lock();
        if !self.state.token().is_cancelled() {
            handler.on_status_changed(status);
        }
    }

    /// Record and report stage progress.
    pub fn progress(&self, done: usize, total: usize) {
        if total > 0 {
            self.state.set_fraction(done as f32 / total as f32);
        }
        let mut handler = self.lock();
        if !self.state.token().is_cancelled() {
            handler.on_progress_changed(done, total);
        }
    }

    pub fn iteration_completed(&self, bounce: u32) {
        let mut handler = self.lock();
        if !self.state.token().is_cancelled() {
            handler.on_iteration_completed(bounce);
        }
    }

    pub fn completed(&self) {
        self.lock().on_completed();
    }

    /// Raise the cancellation flag, then fence any delivery already in
    /// flight, calling `pump` while a handler callback holds the lock.
    ///
    /// Once this returns no further status or progress event is delivered.
    pub fn cancel_with(&self, mut pump: impl FnMut()) {
        self.state.token().cancel();
        loop {
            match self.handler.try_lock() {
                Ok(_) | Err(TryLockError::Poisoned(_)) => return,
                Err(TryLockError::WouldBlock) => {
                    pump();
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}
