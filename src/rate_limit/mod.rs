pub mod counter;
pub mod event;
pub mod manager;
pub mod store;

pub use counter::{Clock, FixedClock, RateLimitCounter, SystemClock};
pub use event::{EventScope, RateLimitEvent, UNLIMITED};
pub use manager::{RateLimitManager, RateLimitStatus};
pub use store::{MemoryRateLimitStore, PgRateLimitStore, RateLimitStore};
