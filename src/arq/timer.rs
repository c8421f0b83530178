use std::time::Instant;

/// Relative monotonic millisecond timer with an explicit counting flag, the
/// way the protocol timers are polled.
#[derive(Debug, Clone)]
pub struct Timer {
    started_at: Option<Instant>,
    frozen_ms: i64,
    counting: bool,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Timer {
            started_at: None,
            frozen_ms: 0,
            counting: false,
        }
    }

    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
        self.frozen_ms = 0;
        self.counting = true;
    }

    pub fn stop(&mut self) {
        self.frozen_ms = self.elapsed_ms();
        self.counting = false;
    }

    pub fn reset(&mut self) {
        self.started_at = None;
        self.frozen_ms = 0;
    }

    pub fn is_counting(&self) -> bool {
        self.counting
    }

    pub fn elapsed_ms(&self) -> i64 {
        if self.counting {
            self.started_at
                .map(|t| t.elapsed().as_millis() as i64)
                .unwrap_or(0)
        } else {
            self.frozen_ms
        }
    }
}
