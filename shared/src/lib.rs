//! Wire and domain types shared by the sync client and the relay server.
//!
//! Everything that crosses a process boundary lives here: the `{id, x, y}`
//! socket frame, the remote table record shapes, and the closed catalog of
//! game events that travels over the local event bus and the durable event
//! table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const DEFAULT_THROTTLE_MS: u64 = 50;
pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8080/ws";
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 3000;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RICK_ROLL_TARGETS: usize = 3;

/// Stand-in for coordinates the backend left null.
pub const MISSING_COORDINATE: f32 = -1.0;

pub type PlayerId = String;
pub type RecordId = String;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn get_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Position) -> f32 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// One movement tick on the low-latency socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionMessage {
    pub id: PlayerId,
    pub x: f32,
    pub y: f32,
}

impl PositionMessage {
    pub fn new(id: impl Into<PlayerId>, position: Position) -> Self {
        Self {
            id: id.into(),
            x: position.x,
            y: position.y,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Row of the remote `player_positions` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub id: RecordId,
    pub user: PlayerId,
    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
}

impl PositionRecord {
    pub fn position(&self) -> Position {
        Position::new(
            self.x.unwrap_or(MISSING_COORDINATE),
            self.y.unwrap_or(MISSING_COORDINATE),
        )
    }
}

/// Row of the remote append-only `game_events` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEventRecord {
    pub id: RecordId,
    pub event_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub created: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordAction {
    Create,
    Update,
    Delete,
}

/// A realtime feed notification: `{action, record}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordChange<R> {
    pub action: RecordAction,
    pub record: R,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerupType {
    Test,
    RickRoll,
    Jump,
}

/// Who a powerup's effect lands on once it is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectScope {
    /// Only the player who used it.
    User,
    /// The `n` other players closest to the user.
    Nearest(usize),
    /// Every other player.
    Everyone,
}

impl PowerupType {
    pub fn scope(&self) -> EffectScope {
        match self {
            PowerupType::Jump => EffectScope::User,
            PowerupType::RickRoll => EffectScope::Nearest(RICK_ROLL_TARGETS),
            PowerupType::Test => EffectScope::Everyone,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PowerupType::Test => "test",
            PowerupType::RickRoll => "rick_roll",
            PowerupType::Jump => "jump",
        }
    }
}

impl fmt::Display for PowerupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminant of [`GameEvent`], used as the event bus key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlayerSpawned,
    PlayerMoved,
    PlayerQuit,
    GameEnded,
    PowerupCollected,
    PowerupUsed,
}

impl EventKind {
    pub const ALL: [EventKind; 6] = [
        EventKind::PlayerSpawned,
        EventKind::PlayerMoved,
        EventKind::PlayerQuit,
        EventKind::GameEnded,
        EventKind::PowerupCollected,
        EventKind::PowerupUsed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PlayerSpawned => "player_spawned",
            EventKind::PlayerMoved => "player_moved",
            EventKind::PlayerQuit => "player_quit",
            EventKind::GameEnded => "game_ended",
            EventKind::PowerupCollected => "powerup_collected",
            EventKind::PowerupUsed => "powerup_used",
        }
    }

    /// Durable kinds are persisted in the event table and replayable;
    /// the rest are transient bus traffic.
    pub fn is_durable(&self) -> bool {
        matches!(
            self,
            EventKind::GameEnded | EventKind::PowerupCollected | EventKind::PowerupUsed
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed catalog of events produced and consumed by the sync core.
///
/// Serialized adjacently tagged so a durable event maps directly onto the
/// `{event_type, data}` columns of the event table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum GameEvent {
    PlayerSpawned {
        id: PlayerId,
        position: Position,
    },
    PlayerMoved {
        player_id: PlayerId,
        position: Position,
    },
    PlayerQuit {
        id: PlayerId,
    },
    GameEnded {
        emit_by: PlayerId,
    },
    PowerupCollected {
        emit_by: PlayerId,
        #[serde(rename = "type")]
        kind: PowerupType,
    },
    PowerupUsed {
        emit_by: PlayerId,
        #[serde(rename = "type")]
        kind: PowerupType,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<Vec<PlayerId>>,
    },
}

impl GameEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GameEvent::PlayerSpawned { .. } => EventKind::PlayerSpawned,
            GameEvent::PlayerMoved { .. } => EventKind::PlayerMoved,
            GameEvent::PlayerQuit { .. } => EventKind::PlayerQuit,
            GameEvent::GameEnded { .. } => EventKind::GameEnded,
            GameEvent::PowerupCollected { .. } => EventKind::PowerupCollected,
            GameEvent::PowerupUsed { .. } => EventKind::PowerupUsed,
        }
    }

    pub fn is_durable(&self) -> bool {
        self.kind().is_durable()
    }

    /// The player that originated a durable event.
    pub fn emitted_by(&self) -> Option<&str> {
        match self {
            GameEvent::GameEnded { emit_by }
            | GameEvent::PowerupCollected { emit_by, .. }
            | GameEvent::PowerupUsed { emit_by, .. } => Some(emit_by),
            _ => None,
        }
    }

    /// Splits the event into the `(event_type, data)` column pair.
    pub fn to_record_parts(&self) -> Result<(String, serde_json::Value), serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        let data = value
            .get_mut("data")
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null);
        Ok((self.kind().as_str().to_string(), data))
    }

    pub fn from_record_parts(
        event_type: &str,
        data: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "event_type": event_type,
            "data": data,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_position_distance() {
        let a = Position::new(0.0, 0.0);
        let b = Position::new(3.0, 4.0);
        assert_approx_eq!(a.distance(&b), 5.0, 0.0001);
        assert_approx_eq!(b.distance(&a), 5.0, 0.0001);
    }

    #[test]
    fn test_position_message_wire_format() {
        let message = PositionMessage::new("abc", Position::new(1.5, -2.0));
        let encoded = message.encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&encoded).unwrap();

        assert_eq!(value["id"], "abc");
        assert_eq!(value["x"], 1.5);
        assert_eq!(value["y"], -2.0);
    }

    #[test]
    fn test_position_message_rejects_malformed() {
        assert!(PositionMessage::decode("not json").is_err());
        assert!(PositionMessage::decode(r#"{"id": "a", "x": 1}"#).is_err());
        assert!(PositionMessage::decode(r#"{"id": 5, "x": 1, "y": 2}"#).is_err());
    }

    #[test]
    fn test_position_record_missing_coordinates() {
        let record: PositionRecord =
            serde_json::from_str(r#"{"id": "r1", "user": "p1", "x": 12.0}"#).unwrap();
        assert_eq!(record.position(), Position::new(12.0, MISSING_COORDINATE));
    }

    #[test]
    fn test_record_action_names() {
        let change: RecordChange<PositionRecord> = serde_json::from_str(
            r#"{"action": "delete", "record": {"id": "r1", "user": "p1", "x": 1, "y": 2}}"#,
        )
        .unwrap();
        assert_eq!(change.action, RecordAction::Delete);
        assert_eq!(change.record.user, "p1");
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::PlayerSpawned.as_str(), "player_spawned");
        assert_eq!(EventKind::PlayerQuit.as_str(), "player_quit");
        assert_eq!(EventKind::PowerupUsed.to_string(), "powerup_used");
    }

    #[test]
    fn test_durable_kinds() {
        let durable: Vec<EventKind> = EventKind::ALL
            .iter()
            .copied()
            .filter(EventKind::is_durable)
            .collect();
        assert_eq!(
            durable,
            vec![
                EventKind::GameEnded,
                EventKind::PowerupCollected,
                EventKind::PowerupUsed
            ]
        );
    }

    #[test]
    fn test_powerup_used_record_parts() {
        let event = GameEvent::PowerupUsed {
            emit_by: "p1".to_string(),
            kind: PowerupType::RickRoll,
            target: Some(vec!["p2".to_string(), "p3".to_string()]),
        };

        let (event_type, data) = event.to_record_parts().unwrap();
        assert_eq!(event_type, "powerup_used");
        assert_eq!(data["type"], "rick_roll");
        assert_eq!(data["emit_by"], "p1");
        assert_eq!(data["target"][1], "p3");

        let parsed = GameEvent::from_record_parts(&event_type, data).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_untargeted_powerup_omits_target() {
        let event = GameEvent::PowerupUsed {
            emit_by: "p1".to_string(),
            kind: PowerupType::Jump,
            target: None,
        };
        let (_, data) = event.to_record_parts().unwrap();
        assert!(data.get("target").is_none());
    }

    #[test]
    fn test_unknown_event_type_is_rejected() {
        let result = GameEvent::from_record_parts("leaderboard_update", serde_json::json!({}));
        assert!(result.is_err());
    }

    #[test]
    fn test_emitted_by() {
        let ended = GameEvent::GameEnded {
            emit_by: "p9".to_string(),
        };
        assert_eq!(ended.emitted_by(), Some("p9"));

        let quit = GameEvent::PlayerQuit {
            id: "p9".to_string(),
        };
        assert_eq!(quit.emitted_by(), None);
        assert!(!quit.is_durable());
    }

    #[test]
    fn test_powerup_scopes() {
        assert_eq!(PowerupType::Jump.scope(), EffectScope::User);
        assert_eq!(
            PowerupType::RickRoll.scope(),
            EffectScope::Nearest(RICK_ROLL_TARGETS)
        );
        assert_eq!(PowerupType::Test.scope(), EffectScope::Everyone);
    }
}
