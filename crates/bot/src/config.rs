//! Bot configuration.
//!
//! Loaded once at startup from a YAML document and immutable afterwards.
//! The `autoadd` mapping is decoded in document order because enrollment
//! processes teams in that order.

use std::fmt;
use std::path::Path;

use pillar_channel_adapter::MattermostConfig;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Default configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}")]
    MissingRequired { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("IO error reading config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Configuration parsing error: {message}")]
    Parse { message: String },
}

/// Which channels of a target team a joining user is added to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSelection {
    /// Exactly these channels, in order.
    Static(Vec<String>),
    /// Every public channel of the team except the listed ones.
    AllPublicExcept(Vec<String>),
}

impl ChannelSelection {
    /// The configured names: the channel list or the exclusion list.
    pub fn names(&self) -> &[String] {
        match self {
            ChannelSelection::Static(names) | ChannelSelection::AllPublicExcept(names) => names,
        }
    }
}

/// One `autoadd` entry: a target team and its channel selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRule {
    pub team: String,
    pub selection: ChannelSelection,
}

impl EnrollmentRule {
    pub fn fixed(team: impl Into<String>, channels: &[&str]) -> Self {
        Self {
            team: team.into(),
            selection: ChannelSelection::Static(channels.iter().map(|c| c.to_string()).collect()),
        }
    }

    pub fn all_public_except(team: impl Into<String>, excluded: &[&str]) -> Self {
        Self {
            team: team.into(),
            selection: ChannelSelection::AllPublicExcept(
                excluded.iter().map(|c| c.to_string()).collect(),
            ),
        }
    }
}

/// YAML shape of a rule value: a plain list or `{all_public_except: [...]}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum RawSelection {
    List(Vec<String>),
    Expand { all_public_except: Vec<String> },
}

impl From<RawSelection> for ChannelSelection {
    fn from(raw: RawSelection) -> Self {
        match raw {
            RawSelection::List(names) => ChannelSelection::Static(names),
            RawSelection::Expand { all_public_except } => {
                ChannelSelection::AllPublicExcept(all_public_except)
            }
        }
    }
}

impl From<&ChannelSelection> for RawSelection {
    fn from(selection: &ChannelSelection) -> Self {
        match selection {
            ChannelSelection::Static(names) => RawSelection::List(names.clone()),
            ChannelSelection::AllPublicExcept(names) => RawSelection::Expand {
                all_public_except: names.clone(),
            },
        }
    }
}

fn deserialize_rules<'de, D>(deserializer: D) -> Result<Vec<EnrollmentRule>, D::Error>
where
    D: Deserializer<'de>,
{
    struct RulesVisitor;

    impl<'de> Visitor<'de> for RulesVisitor {
        type Value = Vec<EnrollmentRule>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a mapping from team name to a channel list")
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut rules: Vec<EnrollmentRule> = Vec::new();
            // A team with no value means team membership only.
            while let Some((team, raw)) = map.next_entry::<String, Option<RawSelection>>()? {
                if rules.iter().any(|r| r.team == team) {
                    return Err(de::Error::custom(format!(
                        "duplicate enrollment team '{}'",
                        team
                    )));
                }
                let selection = match raw {
                    Some(raw) => raw.into(),
                    None => ChannelSelection::Static(Vec::new()),
                };
                rules.push(EnrollmentRule { team, selection });
            }
            Ok(rules)
        }
    }

    deserializer.deserialize_map(RulesVisitor)
}

fn serialize_rules<S>(rules: &[EnrollmentRule], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut map = serializer.serialize_map(Some(rules.len()))?;
    for rule in rules {
        map.serialize_entry(&rule.team, &RawSelection::from(&rule.selection))?;
    }
    map.end()
}

/// Top-level bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Login email of the bot account.
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub username: String,
    #[serde(default, alias = "firstname")]
    pub first_name: String,
    #[serde(default, alias = "lastname")]
    pub last_name: String,
    /// Server address: `host[:port]` for plain HTTP, or a full URL.
    pub server: String,
    /// Channel used for operator-visible status messages.
    #[serde(alias = "debugchannel")]
    pub debug_channel: String,
    /// Channel whose events are acted upon. Defaults to the debug channel.
    #[serde(default)]
    pub channel: Option<String>,
    /// Home team the bot is a member of.
    pub team: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Name used in lifecycle notices.
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    #[serde(
        default,
        deserialize_with = "deserialize_rules",
        serialize_with = "serialize_rules"
    )]
    pub autoadd: Vec<EnrollmentRule>,
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_bot_name() -> String {
    "Pillar Bot".to_string()
}

impl BotConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Load and validate in one step.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("email", &self.email),
            ("password", &self.password),
            ("username", &self.username),
            ("server", &self.server),
            ("team", &self.team),
            ("debug_channel", &self.debug_channel),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    key: key.to_string(),
                });
            }
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "request_timeout_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if let Err(e) = self.mattermost().api_base_url() {
            return Err(ConfigError::InvalidValue {
                key: "server".to_string(),
                reason: e.to_string(),
            });
        }

        for rule in &self.autoadd {
            if rule.team.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "autoadd".to_string(),
                    reason: "team names cannot be empty".to_string(),
                });
            }
            if rule.selection.names().iter().any(|c| c.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    key: format!("autoadd.{}", rule.team),
                    reason: "channel names cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Connection settings for the platform adapter.
    pub fn mattermost(&self) -> MattermostConfig {
        MattermostConfig {
            server: self.server.clone(),
            request_timeout_secs: self.request_timeout_secs,
        }
    }

    pub fn monitored_channel_name(&self) -> &str {
        self.channel
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.debug_channel)
    }
}
