//! Heartbeat pacing for the driving loop.

use std::cell::Cell;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use smashmon_events::{Event, Listener, ListenerError};
use tracing::{info, warn};

/// Longest elapsed time reported by one heartbeat, in seconds.
///
/// A stall longer than this (debugger, suspended laptop) is reported as
/// this much time rather than as one huge step.
pub const MAX_FRAME_TIME: f64 = 0.25;

/// Sleeps out the remainder of each frame and measures real frame time.
pub struct FrameClock {
    frame_budget: Duration,
    previous_time: Instant,
    frame_count: u64,
}

impl FrameClock {
    /// A clock for `fps` frames per second. `fps` must be positive.
    pub fn new(fps: u32) -> Self {
        Self {
            frame_budget: Duration::from_secs(1) / fps.max(1),
            previous_time: Instant::now(),
            frame_count: 0,
        }
    }

    /// Wait until the current frame's budget is used up, then return the
    /// seconds since the previous tick.
    pub fn tick(&mut self) -> f64 {
        let spent = self.previous_time.elapsed();
        if spent < self.frame_budget {
            thread::sleep(self.frame_budget - spent);
        }

        let current_time = Instant::now();
        let mut frame_time = current_time
            .duration_since(self.previous_time)
            .as_secs_f64();
        self.previous_time = current_time;

        if frame_time > MAX_FRAME_TIME {
            warn!(
                "Frame time {:.1}ms exceeds maximum, clamping to {:.1}ms",
                frame_time * 1000.0,
                MAX_FRAME_TIME * 1000.0
            );
            frame_time = MAX_FRAME_TIME;
        }

        self.frame_count += 1;
        frame_time
    }

    /// Number of completed ticks.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frame_budget(&self) -> Duration {
        self.frame_budget
    }
}

/// Keeps the driving loop alive until a `Quit` event passes through the bus.
#[derive(Debug)]
pub struct HeartbeatTicker {
    running: Cell<bool>,
}

impl HeartbeatTicker {
    pub fn new() -> Rc<Self> {
        Rc::new(Self {
            running: Cell::new(true),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.get()
    }
}

impl Listener for HeartbeatTicker {
    fn receive(&self, event: &Event) -> Result<(), ListenerError> {
        if let Event::Quit = event {
            if self.running.replace(false) {
                info!("Quit requested");
            }
        }
        Ok(())
    }
}
