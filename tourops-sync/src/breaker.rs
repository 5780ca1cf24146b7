use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Trips after repeated retryable write failures so updates go straight to the
/// queue instead of each waiting out the write timeout.
pub struct CircuitBreaker {
    name: String,
    state: RwLock<CircuitState>,
    failure_count: AtomicUsize,
    failure_threshold: usize,
    reset_timeout: Duration,
    last_failure: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, reset_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold.max(1),
            reset_timeout,
            last_failure: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Whether a direct attempt may go ahead. An expired open breaker lets one trial attempt through.
    pub async fn check(&self) -> bool {
        let mut state = self.state.write().await;
        match *state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => false,
            CircuitState::Open => {
                let expired = self
                    .last_failure
                    .read()
                    .await
                    .is_some_and(|at| at.elapsed() >= self.reset_timeout);
                if expired {
                    *state = CircuitState::HalfOpen;
                    tracing::info!("Circuit breaker [{}] half-open, probing", self.name);
                }
                expired
            }
        }
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        self.failure_count.store(0, Ordering::SeqCst);
        if *state != CircuitState::Closed {
            *state = CircuitState::Closed;
            tracing::info!("Circuit breaker [{}] recovered to closed", self.name);
        }
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            *self.last_failure.write().await = Some(Instant::now());
            tracing::warn!("Circuit breaker [{}] open after {} failures", self.name, count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trips_and_recovers() {
        let breaker = CircuitBreaker::new("manifest_writes", 2, Duration::from_millis(30));
        assert!(breaker.check().await);

        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.check().await);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(breaker.check().await);
        // Only one trial attempt while half-open.
        assert!(!breaker.check().await);

        breaker.record_success().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.check().await);
    }

    #[tokio::test]
    async fn test_failed_trial_attempt_reopens() {
        let breaker = CircuitBreaker::new("manifest_writes", 1, Duration::ZERO);
        breaker.record_failure().await;
        assert!(breaker.check().await);
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }
}
