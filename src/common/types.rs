macro_rules! snowflake_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
            pub struct $name(pub u64);

            impl From<u64> for $name {
                fn from(id: u64) -> Self {
                    Self(id)
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl std::str::FromStr for $name {
                type Err = std::num::ParseIntError;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    s.parse::<u64>().map(Self)
                }
            }

            // Snowflakes travel as strings on both the chat gateway and the engine.
            impl serde::Serialize for $name {
                fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                    serializer.collect_str(&self.0)
                }
            }

            impl<'de> serde::Deserialize<'de> for $name {
                fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                    #[derive(serde::Deserialize)]
                    #[serde(untagged)]
                    enum Raw {
                        Str(String),
                        Num(u64),
                    }

                    match Raw::deserialize(deserializer)? {
                        Raw::Num(n) => Ok(Self(n)),
                        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
                    }
                }
            }
        )*
    };
}

snowflake_id! {
    /// A guild (server) on the chat platform; the unit of voice-session scoping.
    GuildId,
    /// A voice or text channel.
    ChannelId,
    /// A user, including the bot itself.
    UserId,
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub fn now_secs() -> u64 {
    now_ms() / 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snowflake_accepts_string_and_number() {
        let a: GuildId = serde_json::from_str("\"81384788765712384\"").unwrap();
        let b: GuildId = serde_json::from_str("81384788765712384").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"81384788765712384\"");
    }

    #[test]
    fn test_snowflake_rejects_garbage() {
        assert!(serde_json::from_str::<UserId>("\"abc\"").is_err());
    }
}
