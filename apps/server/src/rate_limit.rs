use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::models::ApiResponse;

/// Per-IP sliding-window counter for one route group.
#[derive(Debug)]
pub struct SlidingWindow {
    max_requests: u32,
    window: Duration,
    hits: DashMap<IpAddr, Vec<Instant>>,
}

impl SlidingWindow {
    pub fn new(max_requests: u32, window: Duration) -> Arc<Self> {
        Arc::new(Self {
            max_requests,
            window,
            hits: DashMap::new(),
        })
    }

    /// Returns `Err(retry_after_secs)` when `ip` has exhausted the window.
    pub fn check(&self, ip: IpAddr) -> Result<(), u64> {
        let now = Instant::now();
        let window_start = now - self.window;

        let mut entry = self.hits.entry(ip).or_default();
        entry.retain(|t| *t > window_start);

        if entry.len() >= self.max_requests as usize {
            let oldest = entry[0];
            let retry_after = (oldest + self.window)
                .saturating_duration_since(now)
                .as_secs()
                .max(1);
            return Err(retry_after);
        }

        entry.push(now);
        Ok(())
    }

    /// Drop IPs with no recent hits. Called from the background cleanup task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        let cutoff = self.window * 2;
        self.hits.retain(|_ip, timestamps| {
            timestamps.retain(|t| now.duration_since(*t) < cutoff);
            !timestamps.is_empty()
        });
    }
}

/// The server's rate-limit tiers. Hold creation is the strictest: a burst of
/// holds is the cheapest way to lock out a whole day.
#[derive(Clone)]
pub struct RateLimits {
    pub public: Arc<SlidingWindow>,
    pub hold: Arc<SlidingWindow>,
    pub customer: Arc<SlidingWindow>,
    pub admin: Arc<SlidingWindow>,
}

impl RateLimits {
    pub fn new() -> Self {
        Self {
            public: SlidingWindow::new(60, Duration::from_secs(60)),
            hold: SlidingWindow::new(5, Duration::from_secs(300)),
            customer: SlidingWindow::new(30, Duration::from_secs(60)),
            admin: SlidingWindow::new(120, Duration::from_secs(60)),
        }
    }

    pub fn cleanup(&self) {
        self.public.cleanup();
        self.hold.cleanup();
        self.customer.cleanup();
        self.admin.cleanup();
    }
}

/// Extract the client IP: X-Forwarded-For (reverse proxy) first, then the
/// socket address.
fn client_ip(req: &Request) -> IpAddr {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return ip;
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or_else(|| IpAddr::from([127, 0, 0, 1]))
}

fn too_many_requests(retry_after: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ApiResponse::<()>::error("Too many requests")),
    )
        .into_response();
    if let Ok(value) = retry_after.to_string().parse() {
        response.headers_mut().insert("Retry-After", value);
    }
    response
}

/// Middleware applied per route group with the group's window as state.
pub async fn rate_limit(
    State(window): State<Arc<SlidingWindow>>,
    req: Request,
    next: Next,
) -> Response {
    match window.check(client_ip(&req)) {
        Ok(()) => next.run(req).await,
        Err(retry_after) => too_many_requests(retry_after),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 0, 0, last])
    }

    #[test]
    fn test_allows_up_to_limit() {
        let window = SlidingWindow::new(3, Duration::from_secs(60));
        assert!(window.check(ip(1)).is_ok());
        assert!(window.check(ip(1)).is_ok());
        assert!(window.check(ip(1)).is_ok());
        assert!(window.check(ip(1)).is_err());
    }

    #[test]
    fn test_ips_tracked_independently() {
        let window = SlidingWindow::new(1, Duration::from_secs(60));
        assert!(window.check(ip(1)).is_ok());
        assert!(window.check(ip(2)).is_ok());
        assert!(window.check(ip(1)).is_err());
    }

    #[test]
    fn test_retry_after_at_least_one_second() {
        let window = SlidingWindow::new(1, Duration::from_secs(60));
        window.check(ip(1)).unwrap();
        let retry_after = window.check(ip(1)).unwrap_err();
        assert!(retry_after >= 1);
    }

    #[test]
    fn test_cleanup_drops_idle_ips() {
        let window = SlidingWindow::new(1, Duration::from_millis(1));
        window.check(ip(1)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        window.cleanup();
        assert!(window.hits.is_empty());
    }
}
