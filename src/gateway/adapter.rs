use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::{
    common::{VoiceError, types::GuildId},
    gateway::{GatewayEvent, VoiceEventListener, VoiceServerUpdate, VoiceStateUpdate},
    session::SessionRegistry,
};

type Listeners = Arc<RwLock<Vec<Arc<dyn VoiceEventListener>>>>;

/// Entry point for raw voice signals. Routes by guild and never blocks on a session.
///
/// Listeners run on one lane per guild: a guild's events reach them in arrival
/// order, while a slow listener in one guild never holds up another.
pub struct VoiceGatewayAdapter {
    registry: Arc<SessionRegistry>,
    listeners: Listeners,
    lanes: DashMap<GuildId, flume::Sender<GatewayEvent>>,
}

impl VoiceGatewayAdapter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            listeners: Arc::new(RwLock::new(Vec::new())),
            lanes: DashMap::new(),
        }
    }

    pub fn register(&self, listener: Arc<dyn VoiceEventListener>) {
        debug!("Registered voice event listener: {}", listener.name());
        self.listeners.write().push(listener);
    }

    pub fn handle_voice_state(&self, update: VoiceStateUpdate) {
        match update.into_event() {
            Some(event) => self.dispatch(event),
            None => trace!("Ignoring voice state outside a guild"),
        }
    }

    pub fn handle_voice_server(&self, update: VoiceServerUpdate) {
        let guild_id = update.guild_id;
        match update.into_event() {
            Some(event) => self.dispatch(event),
            None => debug!("[{}] Voice server pending reallocation; waiting", guild_id),
        }
    }

    /// Accepts a gateway dispatch by name. Anything but the two voice events is ignored.
    pub fn handle_dispatch(&self, name: &str, data: serde_json::Value) {
        let result = match name {
            "VOICE_STATE_UPDATE" => {
                serde_json::from_value::<VoiceStateUpdate>(data).map(|u| self.handle_voice_state(u))
            }
            "VOICE_SERVER_UPDATE" => serde_json::from_value::<VoiceServerUpdate>(data)
                .map(|u| self.handle_voice_server(u)),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("Malformed {} payload: {}", name, e);
        }
    }

    /// Hands the event to the guild's session inbox, then queues it on the
    /// guild's listener lane.
    pub fn dispatch(&self, event: GatewayEvent) {
        self.registry.route(&event);
        if self.listeners.read().is_empty() {
            return;
        }

        let guild_id = event.guild_id();
        let lane = self
            .lanes
            .entry(guild_id)
            .or_insert_with(|| spawn_lane(guild_id, self.listeners.clone()))
            .clone();
        if let Err(e) = lane.send(event) {
            trace!("[{}] Listener lane closed; dropping {:?}", guild_id, e.into_inner());
        }
    }
}

fn spawn_lane(guild_id: GuildId, listeners: Listeners) -> flume::Sender<GatewayEvent> {
    let (tx, rx) = flume::unbounded::<GatewayEvent>();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv_async().await {
            let current = listeners.read().clone();
            for listener in current {
                run_listener(listener, &event).await;
            }
        }
        trace!("[{}] Listener lane finished", guild_id);
    });
    tx
}

async fn run_listener(listener: Arc<dyn VoiceEventListener>, event: &GatewayEvent) {
    let guild_id = event.guild_id();
    match listener.on_voice_event(event).await {
        Ok(()) => {}
        Err(VoiceError::Transport(e)) if e.is_teardown_noise() => {
            debug!("[{}] {} hit teardown noise: {}", guild_id, listener.name(), e);
        }
        Err(e) if e.is_user_correctable() => {
            debug!("[{}] {} gave up: {}", guild_id, listener.name(), e);
        }
        Err(e) => warn!("[{}] {} failed: {}", guild_id, listener.name(), e),
    }
}
