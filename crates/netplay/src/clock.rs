use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic millisecond tick source. Tick values wrap; compare them with
/// `wrapping_sub`.
pub trait Clock {
    fn ticks(&self) -> u32;

    fn sleep(&self, ms: u32);

    fn elapsed_since(&self, tick: u32) -> u32 {
        self.ticks().wrapping_sub(tick)
    }
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn ticks(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }

    fn sleep(&self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// Virtual clock that only moves when slept on or advanced by hand.
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(tick: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(tick)),
        }
    }

    pub fn advance(&self, ms: u32) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn ticks(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, ms: u32) {
        self.advance(ms);
        thread::yield_now();
    }
}
