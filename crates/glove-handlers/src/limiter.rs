use std::sync::Mutex;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use glove_proxy::{Context, Handler, Response};
use glove_routes::RouteTrie;

/// Token-bucket rate limiter.
///
/// Each request charges a cost against the bucket: 1 by default, or the cost
/// of the best-matching template when a route table is configured. A request
/// whose cost exceeds the burst is rejected with `429 Too Many Requests`
/// without reaching the rest of the chain; otherwise the handler waits until
/// the tokens are available and forwards.
pub struct RateLimitHandler {
    rate: f64,
    burst: f64,
    routes: Option<RouteTrie>,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    updated_at: Instant,
}

enum Reservation {
    Rejected,
    After(Duration),
}

impl RateLimitHandler {
    /// `rate` is tokens replenished per second, `burst` the bucket capacity.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst: f64::from(burst),
            routes: None,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(burst),
                updated_at: Instant::now(),
            }),
        }
    }

    /// Charges requests the cost of their matching route template instead of
    /// a flat 1. Paths without a matching template still cost 1.
    pub fn with_routes(mut self, routes: RouteTrie) -> Self {
        self.routes = Some(routes);
        self
    }

    fn request_cost(&self, method: &str, path: &str) -> u32 {
        let Some(routes) = &self.routes else {
            return 1;
        };
        routes.cost(method, path).max(1)
    }

    fn reserve(&self, cost: u32, now: Instant) -> Reservation {
        let cost = f64::from(cost);
        if cost > self.burst {
            // the bucket can never hold enough tokens for this request
            return Reservation::Rejected;
        }

        let mut bucket = self.bucket.lock().expect("rate limit bucket poisoned");
        let elapsed = now.saturating_duration_since(bucket.updated_at);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        bucket.updated_at = now;

        let missing = cost - bucket.tokens;
        bucket.tokens -= cost;
        if missing <= 0.0 {
            return Reservation::After(Duration::ZERO);
        }
        Reservation::After(Duration::from_secs_f64(missing / self.rate))
    }
}

impl Handler for RateLimitHandler {
    fn handle<'a>(&'a self, context: &'a mut Context<'_>) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let cost =
                self.request_cost(&context.request.method, request_path(&context.request.target));

            match self.reserve(cost, Instant::now()) {
                Reservation::Rejected => {
                    context.response = Some(Response::status(429));
                }
                Reservation::After(delay) => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    context.next().await;
                }
            }
        })
    }
}

// Path component of the request target: absolute-form targets lose their
// scheme and authority, every shape loses the query.
fn request_path(target: &str) -> &str {
    let path = match target
        .strip_prefix("http://")
        .or_else(|| target.strip_prefix("https://"))
    {
        Some(rest) => match rest.find('/') {
            Some(position) => &rest[position..],
            None => "/",
        },
        None => target,
    };
    path.split('?').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::{request_path, RateLimitHandler, Reservation};
    use glove_routes::RouteTrie;
    use std::time::{Duration, Instant};

    #[test]
    fn zero_burst_rejects_the_first_request() {
        let limiter = RateLimitHandler::new(1.0, 0);
        assert!(matches!(
            limiter.reserve(1, Instant::now()),
            Reservation::Rejected
        ));
    }

    #[test]
    fn burst_allows_immediate_requests() {
        let limiter = RateLimitHandler::new(1.0, 2);
        let now = Instant::now();

        for _ in 0..2 {
            match limiter.reserve(1, now) {
                Reservation::After(delay) => assert!(delay.is_zero()),
                Reservation::Rejected => panic!("burst capacity must admit the request"),
            }
        }

        // the bucket is empty now, the next reservation waits a full second
        match limiter.reserve(1, now) {
            Reservation::After(delay) => {
                assert!(delay >= Duration::from_millis(900));
            }
            Reservation::Rejected => panic!("request within burst must be reservable"),
        }
    }

    #[test]
    fn tokens_replenish_over_time() {
        let limiter = RateLimitHandler::new(10.0, 1);
        let start = Instant::now();

        match limiter.reserve(1, start) {
            Reservation::After(delay) => assert!(delay.is_zero()),
            Reservation::Rejected => panic!("first request must pass"),
        }

        match limiter.reserve(1, start + Duration::from_millis(200)) {
            Reservation::After(delay) => assert!(delay.is_zero()),
            Reservation::Rejected => panic!("replenished bucket must admit the request"),
        }
    }

    #[test]
    fn route_costs_charge_the_bucket() {
        let mut routes = RouteTrie::new();
        routes
            .insert("GET", "/api/v5/account/balance", 3)
            .expect("insert route");

        let limiter = RateLimitHandler::new(1.0, 2).with_routes(routes);
        assert_eq!(limiter.request_cost("GET", "/api/v5/account/balance"), 3);
        assert_eq!(limiter.request_cost("GET", "/unknown"), 1);

        // cost above burst can never be satisfied
        assert!(matches!(
            limiter.reserve(3, Instant::now()),
            Reservation::Rejected
        ));
    }

    #[test]
    fn extracts_the_path_from_request_targets() {
        assert_eq!(request_path("http://origin:8080/echo?x=1"), "/echo");
        assert_eq!(request_path("/echo?x=1"), "/echo");
        assert_eq!(request_path("https://origin"), "/");
    }
}
