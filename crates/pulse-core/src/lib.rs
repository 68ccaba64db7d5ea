pub mod event;
pub mod ids;
pub mod normalize;

pub use event::{Event, WireFormat, UNKNOWN_SUBJECT};
pub use ids::SessionId;
pub use normalize::{normalize, normalize_at};
