//! Voice sessions and playback orchestration for a chat bot, bridging the chat
//! platform's voice gateway and a Lavalink audio node.
//!
//! The host bot forwards raw voice dispatches to [`VoiceGatewayAdapter`], calls
//! the command methods on [`VoiceService`] and renders the [`Reply`] and
//! [`Notification`] values it gets back.

pub mod common;
pub mod configs;
pub mod gateway;
pub mod playback;
pub mod player;
pub mod protocol;
pub mod punishment;
pub mod service;
pub mod session;

pub use common::{VoiceError, types::*};
pub use configs::Config;
pub use gateway::{GatewayClient, GatewayEvent, VoiceGatewayAdapter};
pub use punishment::{PunishmentMode, PunishmentStore, StaticPunishmentStore};
pub use service::{Notification, Reply, VoiceService};
pub use session::{CloseReason, Phase, SessionRegistry, VoiceSession};
