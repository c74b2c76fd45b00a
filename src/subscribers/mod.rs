//! # Event subscribers.
//!
//! ```text
//! Bus ──► runner listener ──► SubscriberSet::emit(&Event)
//!                                  ├──► LogWriter (tracing)
//!                                  └──► user subscribers
//! ```

mod log;
mod set;
mod subscribe;

pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
