use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Phase of workbench shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShutdownPhase {
    Running = 0,
    AbortingQueries = 1,
    ClosingSessions = 2,
    DrainingWorkers = 3,
    Complete = 4,
}

impl ShutdownPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ShutdownPhase::Running,
            1 => ShutdownPhase::AbortingQueries,
            2 => ShutdownPhase::ClosingSessions,
            3 => ShutdownPhase::DrainingWorkers,
            _ => ShutdownPhase::Complete,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ShutdownPhase::Running => "",
            ShutdownPhase::AbortingQueries => "Aborting running queries...",
            ShutdownPhase::ClosingSessions => "Closing connections...",
            ShutdownPhase::DrainingWorkers => "Waiting for background work...",
            ShutdownPhase::Complete => "Shutdown complete",
        }
    }
}

/// Tracks shutdown progress. Clones share state.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    phase: Arc<AtomicU8>,
    start_time: Arc<RwLock<Option<Instant>>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            phase: Arc::new(AtomicU8::new(ShutdownPhase::Running as u8)),
            start_time: Arc::new(RwLock::new(None)),
        }
    }

    /// Returns `true` if this call started the shutdown.
    pub fn request_shutdown(&self) -> bool {
        let started = self.advance_phase(ShutdownPhase::Running, ShutdownPhase::AbortingQueries);

        if started && let Ok(mut guard) = self.start_time.write() {
            *guard = Some(Instant::now());
        }

        started
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.phase() != ShutdownPhase::Running
    }

    pub fn phase(&self) -> ShutdownPhase {
        ShutdownPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Moves to `next` only if currently in `expected`.
    pub fn advance_phase(&self, expected: ShutdownPhase, next: ShutdownPhase) -> bool {
        match self.phase.compare_exchange(
            expected as u8,
            next as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => true,
            Err(actual) => {
                log::debug!(
                    "Shutdown phase transition {:?} -> {:?} skipped, was {:?}",
                    expected,
                    next,
                    ShutdownPhase::from_u8(actual)
                );
                false
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.phase() == ShutdownPhase::Complete
    }

    pub fn elapsed(&self) -> Option<std::time::Duration> {
        self.start_time
            .read()
            .ok()
            .and_then(|guard| guard.map(|start| start.elapsed()))
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
