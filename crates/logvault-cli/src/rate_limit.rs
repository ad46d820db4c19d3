//! Fixed-window request limits per client address.
//!
//! Each route group gets its own [`RateLimiter`]. A client's window opens
//! on its first request and resets once `window` has elapsed.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use dashmap::DashMap;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// Expired windows are dropped once this many clients are tracked.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Counts requests per client in fixed windows.
pub struct RateLimiter {
    name: &'static str,
    max_requests: u32,
    window: Duration,
    message: &'static str,
    clients: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(
        name: &'static str,
        max_requests: u32,
        window: Duration,
        message: &'static str,
    ) -> Self {
        Self {
            name,
            max_requests,
            window,
            message,
            clients: DashMap::new(),
        }
    }

    /// Count one request. `Err` carries the time until the window resets.
    pub fn check(&self, client: &str) -> Result<(), Duration> {
        let now = Instant::now();
        if self.clients.len() > PRUNE_THRESHOLD {
            let window = self.window;
            self.clients
                .retain(|_, w| now.duration_since(w.started) < window);
        }

        let mut entry = self.clients.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        let elapsed = now.duration_since(entry.started);
        if elapsed >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        if entry.count >= self.max_requests {
            return Err(self.window.saturating_sub(now.duration_since(entry.started)));
        }
        entry.count += 1;
        Ok(())
    }

    /// Clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

/// Client identity: the peer IP when the server records it.
fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Middleware rejecting requests over the limiter's budget with 429.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request);
    match limiter.check(&client) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            warn!(
                limiter = limiter.name,
                client = %client,
                path = %request.uri().path(),
                "Rate limit exceeded"
            );
            let seconds = retry_after.as_secs().max(1).to_string();
            (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, seconds)],
                Json(json!({ "error": limiter.message })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32) -> RateLimiter {
        RateLimiter::new("test", max, Duration::from_secs(60), "slow down")
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_limits_and_resets() {
        let limiter = limiter(2);
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_ok());

        let retry = limiter.check("10.0.0.1").unwrap_err();
        assert_eq!(retry, Duration::from_secs(60));

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(
            limiter.check("10.0.0.1").unwrap_err(),
            Duration::from_secs(15)
        );

        tokio::time::advance(Duration::from_secs(15)).await;
        assert!(limiter.check("10.0.0.1").is_ok());
    }

    #[tokio::test]
    async fn test_clients_counted_separately() {
        let limiter = limiter(1);
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_err());
        assert!(limiter.check("10.0.0.2").is_ok());
        assert_eq!(limiter.tracked_clients(), 2);
    }
}
