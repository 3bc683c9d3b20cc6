//! Bounded sequential retry around a single transport.

use std::time::Duration;

use crate::model::Destination;
use crate::transport::{SendOutcome, Transport};

use super::DeliveryError;

/// How the inter-attempt delay grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed,
    /// Delay multiplied by the number of the attempt that just failed.
    Linear,
}

impl std::str::FromStr for Backoff {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Backoff::Fixed),
            "linear" => Ok(Backoff::Linear),
            other => Err(format!("unknown backoff: {}", other)),
        }
    }
}

/// Retry settings shared by every destination.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Upper bound on transport calls per destination per round.
    pub max_attempts: u32,
    /// Timeout handed to each transport call.
    pub attempt_timeout: Duration,
    pub delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(3),
            delay: Duration::from_millis(500),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Attempts actually made; never fewer than one.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait after attempt number `failed` (1-based) before the next one.
    pub fn delay_after(&self, failed: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Linear => self.delay.saturating_mul(failed.max(1)),
        }
    }
}

/// What happened to one destination within a round.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// The first success, or the last failure seen.
    pub outcome: SendOutcome,
    pub attempts: u32,
}

impl Delivery {
    pub fn into_result(self) -> Result<SendOutcome, DeliveryError> {
        if self.outcome.is_success() {
            Ok(self.outcome)
        } else {
            Err(DeliveryError::AllRetriesExhausted {
                attempts: self.attempts,
                last: self.outcome,
            })
        }
    }
}

/// Send with retries, returning the first success or the last failure
/// together with the number of attempts made.
///
/// Returns on the first success. Oversized payloads get exactly one attempt
/// since resending cannot shrink them.
pub async fn send_with_retry(
    transport: &dyn Transport,
    destination: &Destination,
    payload: &[u8],
    policy: &RetryPolicy,
) -> Delivery {
    let max_attempts = if payload.len() > transport.max_payload(destination.protocol) {
        1
    } else {
        policy.attempts()
    };

    let mut attempt = 1;
    loop {
        let outcome = transport
            .send(destination, payload, policy.attempt_timeout)
            .await;

        match &outcome {
            SendOutcome::Success(_) => {
                tracing::debug!("{}: delivered on attempt {}", destination.id, attempt);
                return Delivery { outcome, attempts: attempt };
            }
            SendOutcome::Timeout => {
                tracing::debug!("{}: attempt {}/{} timed out", destination.id, attempt, max_attempts);
            }
            SendOutcome::Error(msg) => {
                tracing::debug!(
                    "{}: attempt {}/{} failed: {}",
                    destination.id,
                    attempt,
                    max_attempts,
                    msg
                );
            }
        }

        if attempt >= max_attempts {
            return Delivery { outcome, attempts: attempt };
        }

        tokio::time::sleep(policy.delay_after(attempt)).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SendReceipt;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Plays back a fixed list of outcomes, repeating the last one.
    struct Scripted {
        script: Mutex<VecDeque<SendOutcome>>,
        calls: Mutex<u32>,
        limit: usize,
    }

    impl Scripted {
        fn new(script: Vec<SendOutcome>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: Mutex::new(0),
                limit: usize::MAX,
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn send(&self, _: &Destination, _: &[u8], _: Duration) -> SendOutcome {
            *self.calls.lock().unwrap() += 1;
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().cloned().unwrap()
            }
        }

        async fn test_connection(&self, _: &Destination, _: Duration) -> SendOutcome {
            SendOutcome::Success(SendReceipt::default())
        }

        fn max_payload(&self, _: crate::model::Protocol) -> usize {
            self.limit
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            attempt_timeout: Duration::from_millis(10),
            delay: Duration::from_millis(1),
            backoff: Backoff::Fixed,
        }
    }

    fn dest() -> Destination {
        Destination::udp("d", "127.0.0.1", 6001)
    }

    fn ok() -> SendOutcome {
        SendOutcome::Success(SendReceipt::default())
    }

    #[tokio::test]
    async fn test_always_timeout_uses_all_attempts() {
        let transport = Scripted::new(vec![SendOutcome::Timeout]);
        let outcome = send_with_retry(&transport, &dest(), b"{}", &policy(3)).await.outcome;
        assert_eq!(outcome, SendOutcome::Timeout);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test]
    async fn test_stops_on_first_success() {
        let transport = Scripted::new(vec![SendOutcome::Timeout, ok(), SendOutcome::Timeout]);
        let delivery = send_with_retry(&transport, &dest(), b"{}", &policy(5)).await;
        assert!(delivery.outcome.is_success());
        assert_eq!(delivery.attempts, 2);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_returns_last_failure() {
        let transport = Scripted::new(vec![
            SendOutcome::Timeout,
            SendOutcome::Timeout,
            SendOutcome::Error("refused".into()),
        ]);
        let delivery = send_with_retry(&transport, &dest(), b"{}", &policy(3)).await;
        assert_eq!(delivery.outcome, SendOutcome::Error("refused".into()));

        match delivery.into_result() {
            Err(DeliveryError::AllRetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last, SendOutcome::Error("refused".into()));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let transport = Scripted::new(vec![SendOutcome::Timeout]);
        send_with_retry(&transport, &dest(), b"{}", &policy(0)).await;
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_oversized_not_retried() {
        let mut transport = Scripted::new(vec![SendOutcome::Error("Data too large".into())]);
        transport.limit = 4;
        let outcome = send_with_retry(&transport, &dest(), b"0123456789", &policy(3)).await.outcome;
        assert_eq!(outcome, SendOutcome::Error("Data too large".into()));
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_delay_schedule() {
        let mut p = policy(4);
        p.delay = Duration::from_millis(200);
        assert_eq!(p.delay_after(1), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(200));

        p.backoff = Backoff::Linear;
        assert_eq!(p.delay_after(1), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(600));
    }

    #[test]
    fn test_backoff_parse() {
        assert_eq!("Linear".parse::<Backoff>(), Ok(Backoff::Linear));
        assert!("exponential".parse::<Backoff>().is_err());
    }
}
