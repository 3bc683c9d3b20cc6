//! Location sample producers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::{now_millis, LocationSample};

/// Buffer between a producer and its subscriber.
const SAMPLE_BUFFER: usize = 16;

/// Source of location samples.
pub trait SampleProducer: Send + Sync {
    /// Start emitting samples every `interval` until `cancel` fires.
    ///
    /// Only plausible samples are emitted. The producer never waits on the
    /// subscriber; samples that do not fit in the buffer are dropped.
    fn subscribe(&self, interval: Duration, cancel: CancellationToken) -> mpsc::Receiver<LocationSample>;

    /// Most recent fix, for one-shot diagnostic sends.
    fn current_sample(&self) -> Option<LocationSample>;
}

#[derive(Debug, Clone, Copy)]
struct Walk {
    latitude: f64,
    longitude: f64,
    heading: f64,
}

/// Produces a random walk around an origin. Useful without a GPS receiver.
#[derive(Clone)]
pub struct SimulatedProducer {
    walk: Arc<Mutex<Walk>>,
    last: Arc<Mutex<Option<LocationSample>>>,
}

impl SimulatedProducer {
    pub fn new(origin_lat: f64, origin_lon: f64) -> Self {
        Self {
            walk: Arc::new(Mutex::new(Walk {
                latitude: origin_lat,
                longitude: origin_lon,
                heading: 0.0,
            })),
            last: Arc::new(Mutex::new(None)),
        }
    }

    /// Advance the walk by one step and return the resulting fix.
    pub fn next_sample(&self) -> LocationSample {
        let mut rng = rand::thread_rng();
        let mut walk = match self.walk.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };

        // Roughly walking pace: up to ~15 m per step.
        walk.heading = (walk.heading + rng.gen_range(-0.6..0.6)) % std::f64::consts::TAU;
        let step = rng.gen_range(0.0..0.000_15);
        walk.latitude = (walk.latitude + step * walk.heading.cos()).clamp(-90.0, 90.0);
        walk.longitude = (walk.longitude + step * walk.heading.sin()).clamp(-180.0, 180.0);

        let sample = LocationSample::new(walk.latitude, walk.longitude, now_millis())
            .with_accuracy(rng.gen_range(3.0..12.0))
            .with_altitude(rng.gen_range(30.0..40.0))
            .with_speed(step * 111_000.0)
            .with_provider("simulated");

        if let Ok(mut last) = self.last.lock() {
            *last = Some(sample.clone());
        }
        sample
    }
}

impl SampleProducer for SimulatedProducer {
    fn subscribe(&self, interval: Duration, cancel: CancellationToken) -> mpsc::Receiver<LocationSample> {
        let (tx, rx) = mpsc::channel(SAMPLE_BUFFER);
        let producer = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let sample = producer.next_sample();
                        if !sample.is_valid() {
                            tracing::debug!("Producer: discarding implausible fix");
                            continue;
                        }
                        match tx.try_send(sample) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                tracing::warn!("Producer: subscriber lagging, sample dropped");
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
            tracing::debug!("Producer: subscription closed");
        });

        rx
    }

    fn current_sample(&self) -> Option<LocationSample> {
        self.last.lock().ok().and_then(|last| last.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_stays_near_origin() {
        let producer = SimulatedProducer::new(52.52, 13.405);
        for _ in 0..100 {
            let sample = producer.next_sample();
            assert!(sample.is_valid());
            assert!((sample.latitude - 52.52).abs() < 0.1);
            assert!((sample.longitude - 13.405).abs() < 0.1);
            assert_eq!(sample.provider.as_deref(), Some("simulated"));
        }
        assert!(producer.current_sample().is_some());
    }

    #[tokio::test]
    async fn test_subscription_emits_until_cancelled() {
        let producer = SimulatedProducer::new(48.8566, 2.3522);
        assert!(producer.current_sample().is_none());

        let cancel = CancellationToken::new();
        let mut rx = producer.subscribe(Duration::from_millis(10), cancel.clone());

        for _ in 0..3 {
            let sample = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(sample.is_valid());
        }

        cancel.cancel();
        // Drain whatever was buffered; the channel then closes.
        let closed = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok());
    }
}
