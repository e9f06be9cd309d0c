/// Refresh gate decoupling cache updates from frame rate
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RefreshThrottle {
    last_refresh: Option<f64>,
}

impl RefreshThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when at least `interval` seconds passed since the last refresh.
    ///
    /// `None` disables throttling. The first call always refreshes.
    pub fn should_refresh(&self, now: f64, interval: Option<f64>) -> bool {
        match (self.last_refresh, interval) {
            (Some(last), Some(interval)) => now - last >= interval,
            _ => true,
        }
    }

    pub fn mark(&mut self, now: f64) {
        self.last_refresh = Some(now);
    }

    pub fn last_refresh(&self) -> Option<f64> {
        self.last_refresh
    }

    /// Forget the last refresh so the next frame refreshes unconditionally
    pub fn reset(&mut self) {
        self.last_refresh = None;
    }
}
