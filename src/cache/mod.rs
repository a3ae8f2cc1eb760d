//! Time-to-live caches and the registry that resets them in bulk.

pub mod clock;
pub mod container;
pub mod registry;

pub use clock::{Clock, ManualClock, SystemClock};
pub use container::{
    CacheConfig, CacheContainer, ClearListener, ClearVetoed, DEFAULT_EXPIRE_MINUTES,
};
pub use registry::{CacheRegistry, ManagedCache};
