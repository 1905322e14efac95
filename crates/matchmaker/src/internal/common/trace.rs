use std::time::{Duration, Instant};

/// Emits `tracing` events at the start and at the end of a scope.
/// The end event carries the elapsed time.
pub struct ScopedTimer<'a> {
    process: &'a str,
    method: &'static str,
    start: Instant,
}

impl<'a> ScopedTimer<'a> {
    pub fn new(process: &'a str, method: &'static str) -> Self {
        tracing::debug!(
            action = "measure",
            process = process,
            method = method,
            event = "start"
        );
        Self {
            process,
            method,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        tracing::debug!(
            action = "measure",
            method = self.method,
            process = self.process,
            event = "end",
            elapsed_us = self.start.elapsed().as_micros() as u64
        );
    }
}

macro_rules! trace_time {
    ($process:tt, $method:tt, $block:expr) => {{
        let _timer = $crate::internal::common::trace::ScopedTimer::new($process, $method);
        $block
    }};
}

/// Runs `block` and stores its wall-clock duration into `$target`.
macro_rules! timed_phase {
    ($target:expr, $method:tt, $block:expr) => {{
        let timer = $crate::internal::common::trace::ScopedTimer::new("negotiator", $method);
        let result = $block;
        $target = timer.elapsed();
        result
    }};
}
