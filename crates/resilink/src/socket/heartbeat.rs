//! Heartbeat/keepalive mechanism.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between heartbeats.
    pub interval: Duration,
    /// Unanswered heartbeats tolerated before the link is declared dead.
    /// `None` disables liveness enforcement.
    pub max_missed_acks: Option<u32>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_missed_acks: None,
        }
    }
}

/// What the heartbeat task asks its owner to do on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Send a heartbeat frame.
    Send,
    /// Too many heartbeats went unanswered; the task stops after this.
    Expired,
}

/// Handle for controlling the heartbeat task.
#[derive(Debug)]
pub struct HeartbeatHandle {
    running: Arc<AtomicBool>,
    missed_acks: Arc<AtomicU32>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Check if the heartbeat task is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of consecutive unanswered heartbeats.
    #[must_use]
    pub fn missed_acks(&self) -> u32 {
        self.missed_acks.load(Ordering::SeqCst)
    }

    /// Reset the missed ack counter.
    pub fn ack_received(&self) {
        self.missed_acks.store(0, Ordering::SeqCst);
    }

    /// Stop the heartbeat task.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

/// Start a periodic heartbeat task.
///
/// The first beat fires one `interval` after the call. `on_beat` returning
/// `false` stops the task.
pub fn start_heartbeat_task<F>(config: HeartbeatConfig, mut on_beat: F) -> HeartbeatHandle
where
    F: FnMut(Beat) -> bool + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let missed_acks = Arc::new(AtomicU32::new(0));

    let task_running = Arc::clone(&running);
    let task_missed = Arc::clone(&missed_acks);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while task_running.load(Ordering::SeqCst) {
            ticker.tick().await;

            if !task_running.load(Ordering::SeqCst) {
                break;
            }

            if let Some(max) = config.max_missed_acks {
                if task_missed.load(Ordering::SeqCst) >= max {
                    task_running.store(false, Ordering::SeqCst);
                    on_beat(Beat::Expired);
                    break;
                }
            }

            if !on_beat(Beat::Send) {
                task_running.store(false, Ordering::SeqCst);
                break;
            }

            // Reset by ack_received().
            task_missed.fetch_add(1, Ordering::SeqCst);
        }
    });

    HeartbeatHandle {
        running,
        missed_acks,
        task,
    }
}
