use dashmap::DashMap;

use crate::common::types::{GuildId, UserId, now_secs};

/// A user banished to the punishment channel until `expires_at` (epoch seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PunishmentAssignment {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub expires_at: u64,
}

impl PunishmentAssignment {
    pub fn remaining_secs(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// Live punishments. Expired entries are dropped when next looked at.
#[derive(Debug, Default)]
pub struct PunishmentAssignments {
    entries: DashMap<(GuildId, UserId), u64>,
}

impl PunishmentAssignments {
    pub fn assign(&self, guild_id: GuildId, user_id: UserId, seconds: u64) -> PunishmentAssignment {
        let expires_at = now_secs() + seconds;
        self.entries.insert((guild_id, user_id), expires_at);
        PunishmentAssignment {
            guild_id,
            user_id,
            expires_at,
        }
    }

    /// The user's punishment if it has not run out yet.
    pub fn active(&self, guild_id: GuildId, user_id: UserId) -> Option<PunishmentAssignment> {
        let key = (guild_id, user_id);
        let expires_at = *self.entries.get(&key)?;
        let assignment = PunishmentAssignment {
            guild_id,
            user_id,
            expires_at,
        };
        if assignment.is_expired(now_secs()) {
            self.entries.remove_if(&key, |_, e| *e == expires_at);
            return None;
        }
        Some(assignment)
    }

    pub fn remove(&self, guild_id: GuildId, user_id: UserId) -> bool {
        self.entries.remove(&(guild_id, user_id)).is_some()
    }

    pub fn clear_guild(&self, guild_id: GuildId) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(g, _), _| *g != guild_id);
        before - self.entries.len()
    }

    /// Unexpired punishments in a guild, soonest to end first.
    pub fn list(&self, guild_id: GuildId) -> Vec<PunishmentAssignment> {
        let now = now_secs();
        self.entries.retain(|_, expires_at| *expires_at > now);
        let mut active: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.key().0 == guild_id)
            .map(|e| PunishmentAssignment {
                guild_id,
                user_id: e.key().1,
                expires_at: *e.value(),
            })
            .collect();
        active.sort_by_key(|a| a.expires_at);
        active
    }
}
