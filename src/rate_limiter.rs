//! Sliding-window rate limiting keyed by client.
//!
//! Used by the login route to bound password guessing per client address.
//! Client keys come from request headers, so the table is capped: a new client
//! arriving at capacity first drops idle entries, then the least recently seen.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

pub const DEFAULT_MAX_CLIENTS: usize = 10_000;

type Hits = HashMap<String, VecDeque<Instant>>;

pub struct RateLimiter {
    hits: Mutex<Hits>,
    limit: usize,
    window: Duration,
    max_clients: usize,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self::with_max_clients(limit, window, DEFAULT_MAX_CLIENTS)
    }

    pub fn with_max_clients(limit: usize, window: Duration, max_clients: usize) -> Self {
        Self {
            hits: Mutex::new(HashMap::new()),
            limit,
            window,
            max_clients: max_clients.max(1),
        }
    }

    fn expire(&self, queue: &mut VecDeque<Instant>, now: Instant) {
        while queue.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            queue.pop_front();
        }
    }

    /// Record an attempt for `client`; false when its window is already full.
    pub async fn try_acquire(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut hits = self.hits.lock().await;
        if !hits.contains_key(client) && hits.len() >= self.max_clients {
            self.make_room(&mut hits, now);
        }
        let queue = hits.entry(client.to_string()).or_default();
        self.expire(queue, now);

        if queue.len() >= self.limit {
            return false;
        }
        queue.push_back(now);
        true
    }

    /// Attempts by `client` still inside the window.
    pub async fn attempts(&self, client: &str) -> usize {
        let now = Instant::now();
        let hits = self.hits.lock().await;
        hits.get(client)
            .map_or(0, |q| q.iter().filter(|t| now.duration_since(**t) < self.window).count())
    }

    /// Forget clients whose attempts have all expired.
    pub async fn prune(&self) {
        let now = Instant::now();
        let mut hits = self.hits.lock().await;
        self.drop_idle(&mut hits, now);
    }

    fn drop_idle(&self, hits: &mut Hits, now: Instant) {
        hits.retain(|_, queue| {
            self.expire(queue, now);
            !queue.is_empty()
        });
    }

    fn make_room(&self, hits: &mut Hits, now: Instant) {
        self.drop_idle(hits, now);
        while hits.len() >= self.max_clients {
            let stalest = hits
                .iter()
                .min_by_key(|(_, queue)| queue.back().copied())
                .map(|(client, _)| client.clone());
            match stalest {
                Some(client) => hits.remove(&client),
                None => break,
            };
        }
    }

    pub async fn tracked_clients(&self) -> usize {
        self.hits.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn blocks_after_limit_until_window_passes() {
        let limiter = RateLimiter::new(3, Duration::from_millis(300));

        for _ in 0..3 {
            assert!(limiter.try_acquire("10.0.0.1").await);
        }
        assert!(!limiter.try_acquire("10.0.0.1").await);
        assert_eq!(limiter.attempts("10.0.0.1").await, 3);

        sleep(Duration::from_millis(350)).await;
        assert!(limiter.try_acquire("10.0.0.1").await);
    }

    #[tokio::test]
    async fn clients_are_independent() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));

        assert!(limiter.try_acquire("a").await);
        assert!(!limiter.try_acquire("a").await);
        assert!(limiter.try_acquire("b").await);
    }

    #[tokio::test]
    async fn client_table_stays_bounded() {
        let limiter = RateLimiter::with_max_clients(5, Duration::from_secs(60), 3);
        for i in 0..50 {
            assert!(limiter.try_acquire(&format!("198.51.100.{i}")).await);
            assert!(limiter.tracked_clients().await <= 3);
        }
        assert_eq!(limiter.attempts("198.51.100.49").await, 1);
    }

    #[tokio::test]
    async fn idle_clients_are_dropped_before_active_ones() {
        let limiter = RateLimiter::with_max_clients(5, Duration::from_millis(60), 2);
        assert!(limiter.try_acquire("idle").await);
        sleep(Duration::from_millis(80)).await;
        assert!(limiter.try_acquire("active").await);
        assert!(limiter.try_acquire("newcomer").await);

        assert_eq!(limiter.tracked_clients().await, 2);
        assert_eq!(limiter.attempts("active").await, 1);
        assert_eq!(limiter.attempts("newcomer").await, 1);
    }

    #[tokio::test]
    async fn prune_forgets_idle_clients() {
        let limiter = RateLimiter::new(1, Duration::from_millis(50));
        assert!(limiter.try_acquire("a").await);

        sleep(Duration::from_millis(80)).await;
        limiter.prune().await;
        assert_eq!(limiter.tracked_clients().await, 0);
    }
}
