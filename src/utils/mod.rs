//! # Utility Modules
//!
//! Supporting utilities for cryptography, logging, metrics, and timing.
//!
//! ## Components
//! - **Crypto**: AES-256-CBC body cipher and the hourly ChaCha20 header cipher
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Per-endpoint observability counters
//! - **Timeout**: Async timeout wrappers
//!
//! ## Security
//! - Key material from the thread-local CSPRNG (rand)
//! - Memory zeroing for body keys (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;
