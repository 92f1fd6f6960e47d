use crate::engine::{CycleStats, Engine, EngineConfig};
use crate::store;
use anyhow::{Context, Result};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// File the final best weights are written to inside the session directory.
const BEST_FILE: &str = "best.bin";
/// How long the worker sleeps between pause-flag polls.
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Copy-on-publish progress record. The worker replaces the whole snapshot
/// under the lock after each cycle; readers only ever copy it out, so they
/// never observe a partially updated cycle.
#[derive(Debug, Clone, Default)]
pub struct ProgressSnapshot {
    pub latest: Option<CycleStats>,
    pub history: Vec<CycleStats>,
    pub best_weights: Option<Vec<f32>>,
    pub best_score: usize,
    pub best_fitness: f32,
}

struct Shared {
    snapshot: Mutex<ProgressSnapshot>,
    /// Shared with the engine as its cancel flag, so a stop request is seen
    /// mid-cycle, between individual agent evaluations.
    stop: Arc<AtomicBool>,
    paused: AtomicBool,
}

/// Handle to a background training worker running the continuous
/// self-improvement regime. The worker owns the engine; observers reach its
/// progress only through `snapshot`. Dropping the handle stops the worker.
pub struct Trainer {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl Trainer {
    /// Validates the config, then spawns the worker thread. If
    /// `dir/best.bin` exists its weights seed the first cycle, so a stopped
    /// session resumes where it left off.
    pub fn spawn(config: EngineConfig, dir: impl Into<PathBuf>) -> Result<Trainer> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create session directory {}", dir.display()))?;

        let mut engine = Engine::new(config)?;
        let resume = dir.join(BEST_FILE);
        if resume.exists() {
            match store::load_weights(&resume).and_then(|w| engine.set_seed_weights(&w)) {
                Ok(()) => info!("resuming from {}", resume.display()),
                Err(e) => warn!("ignoring {}: {e:#}", resume.display()),
            }
        }

        let shared = Arc::new(Shared {
            snapshot: Mutex::new(ProgressSnapshot::default()),
            stop: Arc::new(AtomicBool::new(false)),
            paused: AtomicBool::new(false),
        });
        engine.set_cancel_flag(Arc::clone(&shared.stop));

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("evo-trainer".into())
            .spawn(move || worker_loop(engine, worker_shared, dir))
            .context("failed to spawn trainer thread")?;

        Ok(Trainer { shared, handle: Some(handle) })
    }

    /// Cheap copy-out of the latest published progress.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.shared
            .snapshot
            .lock()
            .expect("trainer snapshot lock is not poisoned")
            .clone()
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Relaxed)
    }

    /// True once the worker thread has exited, whether by `stop` or by a
    /// failed cycle.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Requests a stop and joins the worker. Idempotent; the worker finishes
    /// its final best-model save before exiting.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::Relaxed);
        self.shared.paused.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("trainer thread panicked");
            }
        }
    }
}

impl Drop for Trainer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(mut engine: Engine, shared: Arc<Shared>, dir: PathBuf) {
    info!("training worker started in {}", dir.display());

    loop {
        // The engine polls the same stop flag between individual agent
        // evaluations, so a request lands within one episode's latency.
        while shared.paused.load(Ordering::Relaxed) && !shared.stop.load(Ordering::Relaxed) {
            thread::sleep(PAUSE_POLL);
        }
        if shared.stop.load(Ordering::Relaxed) {
            break;
        }

        match engine.evolve_from_best() {
            Ok(stats) => {
                info!(
                    "cycle {}: best score {} avg score {:.1} best fitness {:.1}",
                    stats.cycle, stats.best_score, stats.avg_score, stats.best_fitness
                );
                autosave_cycle(&engine, &dir, stats.cycle);
                publish(&engine, &shared, stats);
            }
            Err(e) => {
                if shared.stop.load(Ordering::Relaxed) {
                    break;
                }
                error!("training stopped: {e:#}");
                break;
            }
        }
    }

    // Best-effort final save; a failure here must not prevent the exit.
    if let Some(weights) = engine.best_weights() {
        let path = dir.join(BEST_FILE);
        match store::save_weights(&path, &weights) {
            Ok(()) => info!("saved best model to {}", path.display()),
            Err(e) => warn!("final save failed: {e:#}"),
        }
    }
    info!("training worker exited after {} cycles", engine.generation());
}

fn autosave_cycle(engine: &Engine, dir: &Path, cycle: u64) {
    let Some(weights) = engine.last_best_weights() else {
        return;
    };
    let path = dir.join(format!("cycle_{cycle:04}.bin"));
    if let Err(e) = store::save_weights(&path, &weights) {
        warn!("autosave failed for cycle {cycle}: {e:#}");
    }
}

fn publish(engine: &Engine, shared: &Shared, stats: CycleStats) {
    let next = ProgressSnapshot {
        latest: Some(stats),
        history: engine.history().to_vec(),
        best_weights: engine.best_weights(),
        best_score: engine.best_score(),
        best_fitness: engine.best_fitness(),
    };
    *shared
        .snapshot
        .lock()
        .expect("trainer snapshot lock is not poisoned") = next;
}
