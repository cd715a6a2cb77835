//! Host-level cancellation of orchestration instances.

mod token;

pub use token::CancellationToken;
