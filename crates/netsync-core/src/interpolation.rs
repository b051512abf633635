//! Transform buffering for smooth remote avatars.
//!
//! Samples are stamped with local receive time in seconds. Rendering samples
//! the buffer a fixed delay in the past so there are usually two samples to
//! interpolate between.

use std::collections::VecDeque;

use netsync_proto::Transform;

/// Default number of samples kept per remote client.
pub const DEFAULT_BUFFER_CAPACITY: usize = 32;

#[derive(Debug, Clone)]
pub struct TransformBuffer {
    samples: VecDeque<(f64, Transform)>,
    capacity: usize,
}

impl Default for TransformBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl TransformBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
        }
    }

    /// Record a sample. Samples older than the newest one are dropped.
    pub fn push(&mut self, time: f64, transform: Transform) {
        if let Some((last, _)) = self.samples.back()
            && time < *last
        {
            return;
        }
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back((time, transform));
    }

    pub fn latest(&self) -> Option<&Transform> {
        self.samples.back().map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Interpolated transform at `time`, clamped to the oldest/newest sample.
    pub fn sample(&self, time: f64) -> Option<Transform> {
        let (first_time, first) = self.samples.front()?;
        if time <= *first_time {
            return Some(*first);
        }

        let pairs = self.samples.iter().zip(self.samples.iter().skip(1));
        for ((t0, a), (t1, b)) in pairs {
            if time <= *t1 {
                let span = t1 - t0;
                #[allow(clippy::cast_possible_truncation)]
                let alpha = if span > 0.0 {
                    ((time - t0) / span) as f32
                } else {
                    1.0
                };
                return Some(lerp_transform(a, b, alpha));
            }
        }

        self.latest().copied()
    }
}

/// Linear position, normalized-lerp rotation along the shortest arc.
pub fn lerp_transform(a: &Transform, b: &Transform, alpha: f32) -> Transform {
    let alpha = alpha.clamp(0.0, 1.0);
    let mut position = [0.0; 3];
    for (i, p) in position.iter_mut().enumerate() {
        *p = a.position[i] + (b.position[i] - a.position[i]) * alpha;
    }

    let dot: f32 = a.rotation.iter().zip(b.rotation).map(|(x, y)| x * y).sum();
    let sign = if dot < 0.0 { -1.0 } else { 1.0 };
    let mut rotation = [0.0; 4];
    for (i, q) in rotation.iter_mut().enumerate() {
        *q = a.rotation[i] + (sign * b.rotation[i] - a.rotation[i]) * alpha;
    }
    let norm = rotation.iter().map(|q| q * q).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for q in &mut rotation {
            *q /= norm;
        }
    } else {
        rotation = b.rotation;
    }

    Transform { position, rotation }
}

/// Gate that opens at most once per interval.
#[derive(Debug, Clone)]
pub struct SendThrottle {
    interval: f64,
    last_sent: Option<f64>,
}

impl SendThrottle {
    /// `rate_hz` of zero disables sending.
    pub fn from_rate(rate_hz: f32) -> Self {
        let interval = if rate_hz > 0.0 {
            1.0 / f64::from(rate_hz)
        } else {
            f64::INFINITY
        };
        Self {
            interval,
            last_sent: None,
        }
    }

    /// Returns true and records the send when `now` is at least one interval
    /// after the previous send.
    pub fn try_send(&mut self, now: f64) -> bool {
        if !self.interval.is_finite() {
            return false;
        }
        match self.last_sent {
            Some(last) if now - last < self.interval => false,
            _ => {
                self.last_sent = Some(now);
                true
            }
        }
    }

    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32) -> Transform {
        Transform::from_position([x, 0.0, 0.0])
    }

    #[test]
    fn test_sample_interpolates_between_neighbours() {
        let mut buffer = TransformBuffer::default();
        buffer.push(1.0, at(0.0));
        buffer.push(2.0, at(10.0));
        buffer.push(3.0, at(20.0));

        let t = buffer.sample(2.5).unwrap();
        assert!((t.position[0] - 15.0).abs() < 1e-4);

        // Clamped at both ends.
        assert_eq!(buffer.sample(0.0).unwrap().position[0], 0.0);
        assert_eq!(buffer.sample(9.0).unwrap().position[0], 20.0);
    }

    #[test]
    fn test_out_of_order_samples_dropped() {
        let mut buffer = TransformBuffer::new(4);
        buffer.push(2.0, at(1.0));
        buffer.push(1.0, at(5.0));
        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.latest().unwrap().position[0], 1.0);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut buffer = TransformBuffer::new(2);
        buffer.push(1.0, at(1.0));
        buffer.push(2.0, at(2.0));
        buffer.push(3.0, at(3.0));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.sample(0.0).unwrap().position[0], 2.0);
    }

    #[test]
    fn test_rotation_stays_normalized() {
        let a = Transform::IDENTITY;
        let b = Transform {
            position: [0.0; 3],
            rotation: [0.0, 0.707_106_8, 0.0, 0.707_106_8],
        };
        let mid = lerp_transform(&a, &b, 0.5);
        let norm: f32 = mid.rotation.iter().map(|q| q * q).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_throttle() {
        let mut throttle = SendThrottle::from_rate(10.0);
        assert!(throttle.try_send(0.0));
        assert!(!throttle.try_send(0.05));
        assert!(throttle.try_send(0.1));

        let mut disabled = SendThrottle::from_rate(0.0);
        assert!(!disabled.try_send(100.0));
    }

    #[test]
    fn test_throttle_extreme_rates() {
        let mut nan = SendThrottle::from_rate(f32::NAN);
        assert!(!nan.try_send(1.0));

        // Tiny positive rate: first send passes, the next is effectively never.
        let mut tiny = SendThrottle::from_rate(f32::from_bits(1));
        assert!(tiny.try_send(0.0));
        assert!(!tiny.try_send(1.0e9));
    }
}
