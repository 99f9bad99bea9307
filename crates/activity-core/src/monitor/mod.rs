pub mod engine;
pub mod event;
pub mod session;

pub use engine::{FetchRequest, MonitorOutput, PlayerMonitor};
pub use event::{ActivityEvent, ActivityEventKind, EventBus, EventRing, Subscription, SubscriptionId};
pub use session::{FetchState, PlaybackSample, SampleWindow, Session, SessionState};
