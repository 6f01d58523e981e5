//! Recording coordinator and the producer-facing pieces around it

mod coordinator;
mod correlation;
mod sink;
mod subscribers;

pub use coordinator::{Coordinator, RecordingState, StateChange};
pub use correlation::{CorrelationContext, CorrelationScope};
pub use sink::{CaptureSink, InteractionFilter};
pub use subscribers::{Subscribers, Subscription};
