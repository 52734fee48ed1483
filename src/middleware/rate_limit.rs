use crate::cache::RateLimitStore;
use crate::http::{Request, Response};
use crate::middleware::{Middleware, MiddlewareResult, Next};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32, reset_at: u64 },
    Limited { retry_after: u64 },
}

/// Sliding-window request log for one client. Times are unix seconds.
#[derive(Debug, Clone, Default)]
pub struct ClientWindow {
    hits: VecDeque<u64>,
    blocked_until: u64,
}

impl ClientWindow {
    /// Records a request at `now`. Exceeding the limit blocks the client
    /// for a full window.
    pub fn record(&mut self, now: u64, policy: RateLimitPolicy) -> Decision {
        if self.blocked_until > now {
            return Decision::Limited {
                retry_after: self.blocked_until - now,
            };
        }

        while self
            .hits
            .front()
            .is_some_and(|&hit| hit + policy.window_secs <= now)
        {
            self.hits.pop_front();
        }
        self.hits.push_back(now);

        let count = self.hits.len() as u32;
        if count > policy.max_requests {
            self.blocked_until = now + policy.window_secs;
            return Decision::Limited {
                retry_after: policy.window_secs,
            };
        }

        Decision::Allowed {
            remaining: policy.max_requests - count,
            reset_at: now + policy.window_secs,
        }
    }

    /// True when the window holds nothing that could affect a future decision.
    pub fn is_idle(&self, now: u64, window_secs: u64) -> bool {
        self.blocked_until <= now
            && self
                .hits
                .back()
                .map_or(true, |&hit| hit + window_secs <= now)
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

/// Authenticated users are keyed by id; everyone else by a hash of
/// address and user agent.
///
/// `auth_user` only exists once `auth` has run, so the user key applies
/// when `rate-limit` is attached to a route after `auth`. The global
/// limiter runs before any route middleware and always sees the hash.
pub(crate) fn fingerprint(req: &Request) -> String {
    if let Some(id) = req.get_data("auth_user").and_then(|user| user.get("id")) {
        return format!("user:{id}");
    }
    let mut hasher = Sha256::new();
    hasher.update(req.ip().as_bytes());
    hasher.update(b":");
    hasher.update(req.user_agent().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, store: Arc<dyn RateLimitStore>) -> Self {
        Self { policy, store }
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }
}

impl Middleware for RateLimiter {
    fn handle(&self, req: Request, next: Next) -> MiddlewareResult {
        let limiter = self.clone();
        Box::pin(async move {
            let key = fingerprint(&req);
            let decision = limiter.store.record(key.clone(), unix_now(), limiter.policy).await;

            match decision {
                Decision::Limited { retry_after } => {
                    tracing::warn!(client = %key, ip = req.ip(), retry_after, "rate limit exceeded");
                    let mut response = Response::error("Rate limit exceeded", 429);
                    response.header("Retry-After", retry_after.to_string());
                    Ok(response)
                }
                Decision::Allowed { remaining, reset_at } => {
                    let mut response = next.handle(req).await?;
                    response
                        .header("X-RateLimit-Limit", limiter.policy.max_requests.to_string())
                        .header("X-RateLimit-Remaining", remaining.to_string())
                        .header("X-RateLimit-Reset", reset_at.to_string());
                    Ok(response)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::container::Container;
    use crate::http::{RawRequest, RequestOptions};

    const POLICY: RateLimitPolicy = RateLimitPolicy {
        max_requests: 3,
        window_secs: 60,
    };

    #[test]
    fn allows_up_to_limit_then_blocks() {
        let mut window = ClientWindow::default();
        assert_eq!(
            window.record(1000, POLICY),
            Decision::Allowed { remaining: 2, reset_at: 1060 }
        );
        window.record(1001, POLICY);
        assert_eq!(
            window.record(1002, POLICY),
            Decision::Allowed { remaining: 0, reset_at: 1062 }
        );
        assert_eq!(window.record(1003, POLICY), Decision::Limited { retry_after: 60 });
        assert_eq!(window.record(1033, POLICY), Decision::Limited { retry_after: 30 });
    }

    #[test]
    fn block_lifts_after_a_window() {
        let mut window = ClientWindow::default();
        for t in 0..4 {
            window.record(1000 + t, POLICY);
        }
        assert!(matches!(window.record(1063, POLICY), Decision::Allowed { .. }));
    }

    #[test]
    fn old_hits_slide_out() {
        let mut window = ClientWindow::default();
        window.record(1000, POLICY);
        window.record(1001, POLICY);
        window.record(1002, POLICY);
        assert_eq!(
            window.record(1060, POLICY),
            Decision::Allowed { remaining: 0, reset_at: 1120 }
        );
        assert!(!window.is_idle(1100, 60));
        assert!(window.is_idle(1120, 60));
    }

    fn request(ua: &str) -> Request {
        Request::from_raw(
            RawRequest::new("GET", "/").header("User-Agent", ua).header("X-Forwarded-For", "1.2.3.4"),
            &RequestOptions::default(),
            Container::new(),
        )
    }

    #[test]
    fn fingerprint_uses_user_when_authenticated() {
        let anonymous = fingerprint(&request("curl"));
        assert_eq!(anonymous.len(), 64);
        assert_ne!(anonymous, fingerprint(&request("firefox")));

        let mut authed = request("curl");
        authed.set_data("auth_user", serde_json::json!({"id": 7}));
        assert_eq!(fingerprint(&authed), "user:7");
    }

    #[tokio::test]
    async fn middleware_sets_headers_and_limits() {
        let limiter = RateLimiter::new(
            RateLimitPolicy { max_requests: 2, window_secs: 60 },
            Arc::new(MemoryStore::new()),
        );
        let next = Next::new(|_req| Box::pin(async { Ok(Response::new(200)) }));

        let first = limiter.handle(request("curl"), next.clone()).await.unwrap();
        assert_eq!(first.get_header("X-RateLimit-Limit"), Some("2"));
        assert_eq!(first.get_header("X-RateLimit-Remaining"), Some("1"));

        limiter.handle(request("curl"), next.clone()).await.unwrap();
        let third = limiter.handle(request("curl"), next).await.unwrap();
        assert_eq!(third.status_code(), 429);
        assert_eq!(third.get_header("Retry-After"), Some("60"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_share_one_window() {
        let limiter = RateLimiter::new(
            RateLimitPolicy { max_requests: 5, window_secs: 60 },
            Arc::new(MemoryStore::new()),
        );
        let next = Next::new(|_req| Box::pin(async { Ok(Response::new(200)) }));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                let next = next.clone();
                tokio::spawn(async move { limiter.handle(request("curl"), next).await })
            })
            .collect();

        let mut allowed = 0;
        let mut limited = 0;
        for task in tasks {
            let response = task.await.unwrap().unwrap();
            match response.status_code() {
                200 => allowed += 1,
                429 => {
                    assert!(response.get_header("Retry-After").is_some());
                    limited += 1;
                }
                other => panic!("unexpected status {other}"),
            }
        }
        assert_eq!((allowed, limited), (5, 3));
    }
}
