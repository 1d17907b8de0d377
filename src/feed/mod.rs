//! Real-time quote feed.
//!
//! - `resolver`: instrument <-> broker name mapping, option chain expansion
//! - `subscriptions`: desired set with debounced rebuild signal
//! - `quotes`: per-symbol snapshot merge of sparse delta frames
//! - `emitter`: frame to tick conversion and the consumer's tick stream
//! - `session`: the reader task's connection state machine
//! - `handler`: the entry point a trading framework talks to

mod debounce;
pub mod emitter;
pub mod error;
pub mod handler;
pub mod quotes;
pub mod resolver;
pub mod session;
pub mod subscriptions;

pub use emitter::{Suppressed, TickEmitter, TickStream};
pub use error::{AuthorizationError, FrameParseError, ResolutionError, StreamConnectError};
pub use handler::{DataQueueHandler, JobContext};
pub use quotes::{QuoteMergeCache, QuoteSnapshot};
pub use resolver::SymbolResolver;
pub use session::{
    decode_frame, RetryDecision, RetryPolicy, SessionControl, SessionManager, SessionState,
    StatsSnapshot, StreamStats,
};
pub use subscriptions::{RebuildSignal, SubscriptionRegistry};
