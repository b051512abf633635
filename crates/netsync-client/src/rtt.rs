//! Round-trip time measurement against the relay server.

/// Smoothing factor for the moving average.
const RTT_SMOOTHING: f64 = 0.2;

/// RTT tracker for ping/pong. Times are session seconds.
#[derive(Debug, Clone)]
pub struct RttTracker {
    ping_interval: f64,
    last_ping_time: Option<f64>,
    last_rtt_ms: Option<u32>,
    smoothed_ms: Option<f64>,
}

impl RttTracker {
    pub fn new(ping_interval_secs: f64) -> Self {
        Self {
            ping_interval: ping_interval_secs,
            last_ping_time: None,
            last_rtt_ms: None,
            smoothed_ms: None,
        }
    }

    /// Check if we should send a ping.
    pub fn should_ping(&self, now: f64) -> bool {
        self.last_ping_time
            .is_none_or(|last| now - last >= self.ping_interval)
    }

    /// Record that we sent a ping.
    pub fn record_ping_sent(&mut self, timestamp: f64) {
        self.last_ping_time = Some(timestamp);
    }

    /// Process a pong and return the RTT in milliseconds.
    pub fn process_pong(&mut self, sent_timestamp: f64, now: f64) -> Option<u32> {
        if now < sent_timestamp {
            return None;
        }
        let sample = (now - sent_timestamp) * 1000.0;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let rtt = sample.round() as u32;
        self.last_rtt_ms = Some(rtt);
        self.smoothed_ms = Some(match self.smoothed_ms {
            Some(avg) => avg + (sample - avg) * RTT_SMOOTHING,
            None => sample,
        });
        Some(rtt)
    }

    /// Smoothed RTT in milliseconds.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn rtt_ms(&self) -> Option<u32> {
        self.smoothed_ms.map(|ms| ms.round() as u32)
    }

    pub fn last_rtt_ms(&self) -> Option<u32> {
        self.last_rtt_ms
    }

    /// Clear all tracking data.
    pub fn clear(&mut self) {
        self.last_ping_time = None;
        self.last_rtt_ms = None;
        self.smoothed_ms = None;
    }
}
