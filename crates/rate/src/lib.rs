//! Rate Limiter: two independent limiters, a connect limiter keyed by remote
//! address and a message limiter keyed by `clientId`.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Token-bucket used by the message limiter. Lifted from the gateway's
/// original per-key limiter: refill continuously based on elapsed wall time
/// rather than ticking on a timer, so idle keys cost nothing to track.
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self { capacity, tokens: capacity, refill_per_sec, last: Instant::now() }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            self.last = now;
        }
    }

    fn try_consume(&mut self, amount: f64) -> bool {
        self.refill();
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }

    /// Seconds until at least one token would be available, for `retryAfter`.
    fn retry_after_secs(&self) -> u64 {
        if self.tokens >= 1.0 || self.refill_per_sec <= 0.0 {
            return 0;
        }
        (((1.0 - self.tokens) / self.refill_per_sec).ceil()).max(0.0) as u64
    }
}

/// Message limiter: capacity `P` refilled over duration `D`, keyed by
/// `clientId`. A breach doesn't close the connection — the dispatcher turns
/// it into an `error` frame carrying `retryAfter` and drops the message.
pub struct MessageLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    capacity: f64,
    refill_per_sec: f64,
}

impl MessageLimiter {
    pub fn new(capacity: u32, refill_window: Duration) -> Self {
        let refill_per_sec = capacity as f64 / refill_window.as_secs_f64().max(0.001);
        Self { buckets: Mutex::new(HashMap::new()), capacity: capacity as f64, refill_per_sec }
    }

    /// Try to consume one message's worth of budget for `client_id`. Returns
    /// `Ok(())` if allowed, `Err(retry_after_secs)` if the bucket is empty.
    pub fn allow(&self, client_id: &str) -> Result<(), u64> {
        let mut map = self.buckets.lock();
        let bucket = map
            .entry(client_id.to_string())
            .or_insert_with(|| TokenBucket::new(self.capacity, self.refill_per_sec));
        if bucket.try_consume(1.0) {
            Ok(())
        } else {
            Err(bucket.retry_after_secs())
        }
    }

    /// Drop a client's bucket once it disconnects; nothing else would ever
    /// remove it.
    pub fn remove(&self, client_id: &str) {
        self.buckets.lock().remove(client_id);
    }

    pub fn clear(&self) {
        self.buckets.lock().clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectRejection {
    TooManyAttempts,
    TooManyConcurrent,
}

struct AddressState {
    attempts: VecDeque<Instant>,
    concurrent: u32,
}

/// Connect limiter: at most `Kc` upgrade attempts per window `Wc`, at most
/// `Nc` concurrent connections, both keyed by remote address. A breach of
/// either rejects the upgrade with 429 before a socket is ever opened.
pub struct ConnectLimiter {
    state: Mutex<HashMap<String, AddressState>>,
    max_attempts: u32,
    window: Duration,
    max_concurrent: u32,
}

impl ConnectLimiter {
    pub fn new(max_attempts: u32, window: Duration, max_concurrent: u32) -> Self {
        Self { state: Mutex::new(HashMap::new()), max_attempts, window, max_concurrent }
    }

    /// Record an upgrade attempt for `addr` and check both limits. On
    /// success the address's concurrent count is incremented; callers must
    /// call [`ConnectLimiter::release`] when that connection closes.
    pub fn try_connect(&self, addr: &str) -> Result<(), ConnectRejection> {
        let mut map = self.state.lock();
        let entry = map.entry(addr.to_string()).or_insert_with(|| AddressState {
            attempts: VecDeque::new(),
            concurrent: 0,
        });

        let now = Instant::now();
        while let Some(&front) = entry.attempts.front() {
            if now.duration_since(front) > self.window {
                entry.attempts.pop_front();
            } else {
                break;
            }
        }

        if entry.concurrent >= self.max_concurrent {
            return Err(ConnectRejection::TooManyConcurrent);
        }
        if entry.attempts.len() as u32 >= self.max_attempts {
            return Err(ConnectRejection::TooManyAttempts);
        }

        entry.attempts.push_back(now);
        entry.concurrent += 1;
        Ok(())
    }

    /// Release a concurrent connection slot for `addr` once that connection
    /// closes. Removes the address entirely once it has no recent attempts
    /// and no open connections, matching the "cleaned when last-activity
    /// falls outside the window" rule.
    pub fn release(&self, addr: &str) {
        let mut map = self.state.lock();
        if let Some(entry) = map.get_mut(addr) {
            entry.concurrent = entry.concurrent.saturating_sub(1);
            let now = Instant::now();
            let stale = entry.attempts.iter().all(|&t| now.duration_since(t) > self.window);
            if entry.concurrent == 0 && stale {
                map.remove(addr);
            }
        }
    }

    /// Drop any address entries whose attempts are all outside the window
    /// and which hold no open connections. Intended to run periodically
    /// alongside the heartbeat sweep rather than on every request.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut map = self.state.lock();
        map.retain(|_, entry| {
            entry.attempts.retain(|&t| now.duration_since(t) <= self.window);
            entry.concurrent > 0 || !entry.attempts.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_limiter_allows_up_to_capacity_then_denies() {
        let limiter = MessageLimiter::new(3, Duration::from_secs(10));
        assert!(limiter.allow("c1").is_ok());
        assert!(limiter.allow("c1").is_ok());
        assert!(limiter.allow("c1").is_ok());
        let err = limiter.allow("c1").unwrap_err();
        assert!(err >= 1);
    }

    #[test]
    fn message_limiter_tracks_keys_independently() {
        let limiter = MessageLimiter::new(1, Duration::from_secs(10));
        assert!(limiter.allow("a").is_ok());
        assert!(limiter.allow("b").is_ok());
        assert!(limiter.allow("a").is_err());
    }

    #[test]
    fn connect_limiter_enforces_attempt_cap() {
        let limiter = ConnectLimiter::new(2, Duration::from_secs(60), 10);
        assert!(limiter.try_connect("1.2.3.4").is_ok());
        limiter.release("1.2.3.4");
        assert!(limiter.try_connect("1.2.3.4").is_ok());
        limiter.release("1.2.3.4");
        assert_eq!(limiter.try_connect("1.2.3.4"), Err(ConnectRejection::TooManyAttempts));
    }

    #[test]
    fn connect_limiter_enforces_concurrency_cap() {
        let limiter = ConnectLimiter::new(100, Duration::from_secs(60), 2);
        assert!(limiter.try_connect("5.6.7.8").is_ok());
        assert!(limiter.try_connect("5.6.7.8").is_ok());
        assert_eq!(limiter.try_connect("5.6.7.8"), Err(ConnectRejection::TooManyConcurrent));
        limiter.release("5.6.7.8");
        assert!(limiter.try_connect("5.6.7.8").is_ok());
    }

    #[test]
    fn connect_limiter_tracks_addresses_independently() {
        let limiter = ConnectLimiter::new(1, Duration::from_secs(60), 1);
        assert!(limiter.try_connect("a").is_ok());
        assert!(limiter.try_connect("b").is_ok());
    }

    #[test]
    fn sweep_removes_idle_addresses_outside_window() {
        let limiter = ConnectLimiter::new(5, Duration::from_millis(1), 5);
        limiter.try_connect("stale").unwrap();
        limiter.release("stale");
        std::thread::sleep(Duration::from_millis(5));
        limiter.sweep();
        assert_eq!(limiter.state.lock().len(), 0);
    }
}
