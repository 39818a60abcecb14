//! Status outputs without GPIO.
//!
//! [`TracingIndicator`] stands in for a status LED by emitting trace events, and
//! [`run_connection_blinker`] drives the connection LED pattern: a short flash
//! every second while no controller is connected, and the inverse (mostly on with
//! a short gap) while one is.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::trace;

use super::capabilities::StatusIndicator;
use crate::config::IndicatorConfig;

/// Status indicator that reports its state changes as trace events.
#[derive(Debug)]
pub struct TracingIndicator {
    name: &'static str,
    on: AtomicBool,
}

impl TracingIndicator {
    /// New indicator, initially off.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            on: AtomicBool::new(false),
        }
    }

    /// Current state.
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Relaxed)
    }
}

impl StatusIndicator for TracingIndicator {
    fn toggle(&self) {
        let on = !self.on.fetch_xor(true, Ordering::Relaxed);
        trace!(indicator = self.name, on, "toggle");
    }

    fn set(&self, on: bool) {
        self.on.store(on, Ordering::Relaxed);
        trace!(indicator = self.name, on, "set");
    }
}

/// Length of the next blink phase.
///
/// Disconnected: on for the short phase, off for the long one. Connected: the
/// pattern is inverted.
pub fn blink_phase(config: &IndicatorConfig, connected: bool, led_on: bool) -> Duration {
    let short = Duration::from_millis(config.short_phase_ms);
    let long = Duration::from_millis(config.long_phase_ms);
    if connected == led_on {
        long
    } else {
        short
    }
}

/// Blink `indicator` according to the connection state until the sender side of
/// `connected` is dropped.
///
/// A connection change restarts the pattern immediately.
pub async fn run_connection_blinker(
    indicator: Arc<dyn StatusIndicator>,
    config: IndicatorConfig,
    mut connected: watch::Receiver<bool>,
) {
    let mut led_on = true;
    loop {
        let is_connected = *connected.borrow_and_update();
        indicator.set(led_on);
        let phase = blink_phase(&config, is_connected, led_on);

        tokio::select! {
            changed = connected.changed() => {
                if changed.is_err() {
                    break;
                }
                led_on = true;
            }
            _ = tokio::time::sleep(phase) => {
                led_on = !led_on;
            }
        }
    }
    indicator.set(false);
}
