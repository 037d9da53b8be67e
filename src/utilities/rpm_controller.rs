//! Requests-per-minute limiting for agent model calls.
//!
//! Counts calls in a fixed one-minute window. When the window is full the
//! caller waits until the window rolls over instead of failing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Shared RPM limiter. Cloning shares the window.
#[derive(Debug, Clone)]
pub struct RpmController {
    max_rpm: Option<u32>,
    window: Arc<Mutex<Window>>,
}

impl RpmController {
    /// `None` disables limiting.
    pub fn new(max_rpm: Option<u32>) -> Self {
        Self {
            max_rpm,
            window: Arc::new(Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            })),
        }
    }

    pub fn max_rpm(&self) -> Option<u32> {
        self.max_rpm
    }

    /// Count one request, waiting for the next window if the limit is reached.
    pub async fn acquire(&self) {
        let Some(max) = self.max_rpm else {
            return;
        };

        let mut window = self.window.lock().await;
        let now = Instant::now();
        if now.duration_since(window.started) >= WINDOW {
            window.started = now;
            window.count = 0;
        }
        if window.count < max {
            window.count += 1;
            return;
        }

        let resume_at = window.started + WINDOW;
        log::info!("Max RPM ({}) reached, waiting for next minute to start.", max);
        // Hold the lock while sleeping so waiters queue in order.
        tokio::time::sleep_until(resume_at).await;
        window.started = Instant::now();
        window.count = 1;
    }

    /// Requests counted in the current window.
    pub async fn current_rpm(&self) -> u32 {
        self.window.lock().await.count
    }
}

impl Default for RpmController {
    fn default() -> Self {
        Self::new(None)
    }
}
