//! Core request-proxying logic, free of I/O concerns beyond its ports.
pub mod authenticator;
pub mod circuit_breaker;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod health;
pub mod load_balancer;
pub mod matcher;
pub mod model;
pub mod rate_limiter;
pub mod retry;
pub mod transform;
pub mod upstream;

pub use authenticator::{AuthOutcome, TenantAuthenticator};
pub use circuit_breaker::{BreakerStatus, CircuitBreakers, CircuitState};
pub use error::GatewayError;
pub use gateway::{GatewayService, InboundRequest, ProxyReply};
pub use health::HealthCheckManager;
pub use load_balancer::LoadBalancer;
pub use matcher::RouteMatcher;
pub use rate_limiter::{RateLimitDecision, SlidingWindowLimiter};
pub use upstream::{InvalidUpstreamUrl, UpstreamUrl};
