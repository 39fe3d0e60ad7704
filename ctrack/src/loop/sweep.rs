use crate::collector::Accumulator;
use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/*
 * Retention only shrinks here: every tick drops whatever has not been
 * observed for a full ttl. Scrapes keep running while a sweep is in
 * progress, the registries tolerate that on their own.
 */

pub struct SweepLoopHandle {
    name: &'static str,
    shutdown: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl SweepLoopHandle {
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.task.abort();
        debug!("Stopped {} sweep loop", self.name);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct SweepLoop<F> {
    name: &'static str,
    sweep: F,
}

impl<F> SweepLoop<F>
where
    F: Fn() -> usize + Send + 'static,
{
    pub fn new(name: &'static str, sweep: F) -> Self {
        Self { name, sweep }
    }

    /// Runs the sweep every `tick` until the returned handle is stopped.
    /// The first sweep happens right away
    pub fn start(self, tick: Duration) -> SweepLoopHandle {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();

        let mut ticker = interval(tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let name = self.name;
        let task = tokio::spawn(async move {
            loop {
                ticker.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let evicted = (self.sweep)();
                if evicted > 0 {
                    debug!("{} sweep evicted {} entries", self.name, evicted);
                }
            }
        });

        info!("Started {} sweep loop every {:?}", name, tick);

        SweepLoopHandle {
            name,
            shutdown,
            task,
        }
    }
}

/// Spawns the two independent sweeps owned by `accumulator`,
/// one for retained tuples and one for byte counters
pub fn spawn_sweepers(accumulator: &Arc<Accumulator>, tick: Duration) -> Vec<SweepLoopHandle> {
    let tuples = accumulator.clone();
    let traffic = accumulator.clone();

    vec![
        SweepLoop::new("tuple", move || tuples.sweep_tuples()).start(tick),
        SweepLoop::new("traffic", move || traffic.sweep_traffic()).start(tick),
    ]
}
