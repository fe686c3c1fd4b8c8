//! Fixed-window request limiting per client.

use crate::error::{AppError, Result};
use crate::server::AppState;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Counts requests per client key in fixed windows.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    /// Allow `max_requests` per `window`. Zero requests disables limiting.
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Whether limiting is active.
    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0 && !self.window.is_zero()
    }

    /// Count a request. On rejection returns the seconds until the window resets.
    pub fn check(&self, key: &str) -> std::result::Result<(), u64> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> std::result::Result<(), u64> {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut clients = self.clients.lock();
        let entry = clients.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            let remaining = self.window.saturating_sub(now.duration_since(entry.started));
            // round up so clients never retry a moment too early
            return Err(remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0));
        }

        entry.count += 1;
        Ok(())
    }

    /// Drop windows that have expired. Returns the number removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    fn prune_at(&self, now: Instant) -> usize {
        let mut clients = self.clients.lock();
        let before = clients.len();
        clients.retain(|_, w| now.duration_since(w.started) < self.window);
        before - clients.len()
    }
}

/// Key a request by authenticated user, else by client address.
///
/// `X-Forwarded-For` is only read when the deployment trusts its proxy.
fn client_key(
    user_id: Option<&str>,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> String {
    if let Some(id) = user_id {
        return format!("user:{}", id);
    }

    if trust_forwarded_for {
        if let Some(ip) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .and_then(|ip| ip.parse::<IpAddr>().ok())
        {
            return format!("ip:{}", ip);
        }
    }

    match peer {
        Some(addr) => format!("ip:{}", addr.ip()),
        None => "anonymous".to_string(),
    }
}

/// Middleware rejecting clients over their budget with 429.
pub async fn rate_limit(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response> {
    if !state.rate_limiter.is_enabled() {
        return Ok(next.run(req).await);
    }

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    // only a live session earns its own budget
    let user_id = match req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        Some(token) => state.auth.validate_token(token)?.map(|user| user.id),
        None => None,
    };

    let key = client_key(
        user_id.as_deref(),
        req.headers(),
        peer,
        state.config.rate_limit.trust_forwarded_for,
    );

    if let Err(retry_after) = state.rate_limiter.check(&key) {
        tracing::warn!(client = %key, retry_after, "Rate limit exceeded");
        return Err(AppError::TooManyRequests { retry_after });
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_limits_and_resets() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(limiter.check_at("a", t0).is_ok());
        assert!(limiter.check_at("a", t0 + Duration::from_secs(1)).is_ok());
        assert_eq!(limiter.check_at("a", t0 + Duration::from_secs(10)), Err(50));

        // other clients have their own budget
        assert!(limiter.check_at("b", t0 + Duration::from_secs(10)).is_ok());

        // a fresh window after expiry
        assert!(limiter.check_at("a", t0 + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let limiter = RateLimiter::new(1, Duration::from_secs(10));
        let t0 = Instant::now();
        limiter.check_at("a", t0).unwrap();
        assert_eq!(limiter.check_at("a", t0 + Duration::from_millis(500)), Err(10));
    }

    #[test]
    fn test_disabled_limiter() {
        let limiter = RateLimiter::new(0, Duration::from_secs(60));
        let t0 = Instant::now();
        for _ in 0..1000 {
            assert!(limiter.check_at("a", t0).is_ok());
        }
    }

    #[test]
    fn test_prune() {
        let limiter = RateLimiter::new(5, Duration::from_secs(60));
        let t0 = Instant::now();
        limiter.check_at("a", t0).unwrap();
        limiter.check_at("b", t0 + Duration::from_secs(30)).unwrap();
        assert_eq!(limiter.prune_at(t0 + Duration::from_secs(61)), 1);
        assert_eq!(limiter.prune_at(t0 + Duration::from_secs(91)), 1);
    }

    #[test]
    fn test_client_key() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();
        assert_eq!(client_key(None, &headers, Some(peer), false), "ip:10.0.0.1");
        assert_eq!(client_key(None, &headers, None, false), "anonymous");
        assert_eq!(client_key(Some("u1"), &headers, Some(peer), false), "user:u1");

        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        assert_eq!(client_key(None, &headers, Some(peer), false), "ip:10.0.0.1");
        assert_eq!(client_key(None, &headers, Some(peer), true), "ip:203.0.113.7");

        headers.insert("x-forwarded-for", "not-an-ip".parse().unwrap());
        assert_eq!(client_key(None, &headers, Some(peer), true), "ip:10.0.0.1");
    }

    #[test]
    fn test_unverified_bearers_share_the_peer_budget() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        let peer: SocketAddr = "10.0.0.9:4000".parse().unwrap();
        let t0 = Instant::now();

        let admitted = (0..50)
            .filter(|i| {
                let mut headers = HeaderMap::new();
                headers.insert(
                    header::AUTHORIZATION,
                    format!("Bearer forged{}", i).parse().unwrap(),
                );
                // forged tokens never resolve to a user
                let key = client_key(None, &headers, Some(peer), false);
                limiter.check_at(&key, t0).is_ok()
            })
            .count();

        assert_eq!(admitted, 1);
        assert_eq!(limiter.clients.lock().len(), 1);
    }
}
