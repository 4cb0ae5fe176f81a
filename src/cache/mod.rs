//! Response caching for the proxy.
//!
//! A request is first classified ([`Classifier`]); cacheable requests are
//! fingerprinted ([`Fingerprinter`]) into a composite key that is looked up
//! in a [`CacheStore`]. On a miss the key travels with the forwarded request
//! in the [`REQUEST_ID_HEADER`] header so the response hook can store the
//! origin's answer under it. [`CachingInterceptor`] ties the pieces together.
//!
//! Two stores are provided: [`MemoryStore`] for a single process and
//! [`RedisStore`] for a shared Redis server.

pub mod classifier;
pub mod fingerprint;
pub mod interceptor;
pub mod memory;
pub mod policy;
pub mod propagate;
pub mod redis;
pub mod store;

pub use classifier::Classifier;
pub use fingerprint::{Fingerprint, FingerprintError, Fingerprinter, RequestKey};
pub use interceptor::{CachingInterceptor, ResponseOutcome};
pub use memory::MemoryStore;
pub use policy::{CachePolicy, PolicyError};
pub use propagate::REQUEST_ID_HEADER;
pub use self::redis::{RedisSettings, RedisStore};
pub use store::{CacheStore, ENTRY_TTL, StoreError};
