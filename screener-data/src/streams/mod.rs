/// Exponential reconnect backoff used by long-running market data loops.
pub mod backoff;

/// Idle timeout wrapper that ends silently stalled streams.
pub mod timeout;

pub use backoff::ExponentialBackoff;
pub use timeout::TimeoutStream;
