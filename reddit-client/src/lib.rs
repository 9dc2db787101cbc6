pub mod api;
pub mod auth;
pub mod metrics;
pub mod rate_limiter;
pub mod retry;
pub mod transport;

#[cfg(test)]
mod tests;

pub use api::{
    parse_listing, parse_quota, LinkData, ListingClient, ListingRequest, RedditListing,
    RedditListingChild, RedditListingData,
};
pub use auth::{CredentialProvider, EnvCredential, StaticCredential};
pub use metrics::{ApiMetrics, EndpointMetrics, MetricsCollector, RequestMetrics};
pub use rate_limiter::{RateLimitConfig, RateLimitPermit, RateLimiter};
pub use retry::RetryPolicy;
pub use transport::{RawResponse, ReqwestTransport, Transport, TransportError};
