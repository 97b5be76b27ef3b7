pub mod queue;
pub mod track;

pub use queue::{Playing, PlaybackQueue, QueueMode};
pub use track::{PlayHandle, Track};
