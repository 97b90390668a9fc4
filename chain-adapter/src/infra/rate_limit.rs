// This file is part of conviction-oracle.
// SPDX-License-Identifier: Apache-2.0

//! A simple async token bucket gating every outbound Chain Adapter call. Refills continuously
//! (not in discrete ticks), so bursts up to `capacity` are allowed and the steady-state rate is
//! exactly `capacity / refill_period`.

use std::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<State>,
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_period: Duration) -> Self {
        let capacity = capacity as f64;
        Self {
            capacity,
            refill_per_sec: capacity / refill_period.as_secs_f64(),
            state: Mutex::new(State {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Waits, if necessary, until one token is available, then consumes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("token bucket mutex poisoned");
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    let deficit = 1.0 - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };

            match wait {
                None => return,
                Some(wait) => tokio::time::sleep(wait).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn burst_up_to_capacity_does_not_wait() {
        let bucket = TokenBucket::new(5, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..5 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_bucket_waits_for_refill() {
        let bucket = TokenBucket::new(1, Duration::from_millis(100));
        bucket.acquire().await;

        let acquire = tokio::time::timeout(Duration::from_millis(50), bucket.acquire()).await;
        assert!(acquire.is_err(), "should not have a token yet");
    }
}
