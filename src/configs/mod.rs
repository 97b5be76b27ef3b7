pub mod base;
pub mod lavalink;
pub mod logging;
pub mod punishment;
pub mod voice;

pub use base::*;
pub use lavalink::*;
pub use logging::*;
pub use punishment::*;
pub use voice::*;
