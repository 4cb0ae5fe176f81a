//! # hcproxy
//!
//! An HTTP forward proxy that caches origin responses in Redis (or memory)
//! and replays them byte for byte. `GET` requests are always cacheable;
//! SOAP `POST` requests are cacheable when their `Soapaction` is on an
//! allow-list.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hcproxy::cache::{CachePolicy, CachingInterceptor, MemoryStore};
//! use hcproxy::proxy::{ProxyOptions, ProxyServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let interceptor = CachingInterceptor::new(CachePolicy::default(), MemoryStore::new());
//!     let proxy = ProxyServer::bind("127.0.0.1:48080", ProxyOptions::default()).await?;
//!     println!("Proxying on http://127.0.0.1:48080");
//!     proxy.run(interceptor).await?;
//!     Ok(())
//! }
//! ```

// ── Core ─────────────────────────────────────────────────────────────────────
pub mod cache;
pub mod http;
pub mod proxy;

// ── Binary support ───────────────────────────────────────────────────────────
pub mod config;
pub mod telemetry;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use cache::{CachePolicy, CacheStore, CachingInterceptor, MemoryStore, RedisStore};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use proxy::{Interceptor, ProxyError, ProxyOptions, ProxyServer};
