//! Room registry: per-(contest, time slot) room records and joined-player sets

use crate::contest::lifecycle::RoomState;
use crate::error::{ContestError, Result};
use crate::store::{keys, StoreGateway};
use crate::types::{ContestDefinition, ContestId, TimeSlot, UserId};
use crate::utils::{generate_room_id, room_tag};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Shared room record for one contest time slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub room_id: String,
    pub contest_id: ContestId,
    /// When joining opened (contest start)
    pub join_time_ms: i64,
    /// Game start instant; doubles as the room's time slot
    pub game_start_ms: TimeSlot,
    pub state: RoomState,
    pub capacity: u32,
    pub no_of_rounds: u32,
    pub round_duration_ms: i64,
    pub current_round: u32,
    pub next_round_ms: i64,
    pub max_users: u32,
}

impl RoomRecord {
    /// Fresh record for the next time slot of `contest`
    pub fn for_contest(contest: &ContestDefinition, inter_round_buffer_ms: i64) -> Self {
        Self {
            room_id: generate_room_id(),
            contest_id: contest.id.clone(),
            join_time_ms: contest.contest_start_ms,
            game_start_ms: contest.game_start_ms,
            state: RoomState::AcceptJoining,
            capacity: contest.capacity,
            no_of_rounds: contest.no_of_rounds.max(1),
            round_duration_ms: contest.round_duration_ms(),
            current_round: 1,
            next_round_ms: contest.game_start_ms
                + contest.round_duration_ms()
                + inter_round_buffer_ms,
            max_users: contest.max_users,
        }
    }

    pub fn time_slot(&self) -> TimeSlot {
        self.game_start_ms
    }

    /// Log prefix for this room
    pub fn tag(&self) -> String {
        room_tag(&self.contest_id, self.game_start_ms)
    }

    /// Flatten into hash fields
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("roomId".to_string(), self.room_id.clone()),
            ("contestId".to_string(), self.contest_id.clone()),
            ("joinTime".to_string(), self.join_time_ms.to_string()),
            ("gameStartTime".to_string(), self.game_start_ms.to_string()),
            ("state".to_string(), self.state.code().to_string()),
            ("capacity".to_string(), self.capacity.to_string()),
            ("noOfRounds".to_string(), self.no_of_rounds.to_string()),
            ("gameTimeInMs".to_string(), self.round_duration_ms.to_string()),
            ("currentRound".to_string(), self.current_round.to_string()),
            ("nextRoundTime".to_string(), self.next_round_ms.to_string()),
            ("maxUser".to_string(), self.max_users.to_string()),
        ]
    }

    /// Rebuild from hash fields. An empty hash means no room.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Option<Self>> {
        let room_id = match fields.get("roomId") {
            Some(id) if !id.is_empty() => id.clone(),
            _ => return Ok(None),
        };

        let state_code: u8 = parse_field(fields, "state")?;
        let state = RoomState::from_code(state_code).ok_or_else(|| ContestError::StoreError {
            message: format!("Unknown room state {} for room {}", state_code, room_id),
        })?;

        Ok(Some(Self {
            room_id,
            contest_id: fields.get("contestId").cloned().unwrap_or_default(),
            join_time_ms: parse_field(fields, "joinTime")?,
            game_start_ms: parse_field(fields, "gameStartTime")?,
            state,
            capacity: parse_field(fields, "capacity")?,
            no_of_rounds: parse_field(fields, "noOfRounds")?,
            round_duration_ms: parse_field(fields, "gameTimeInMs")?,
            current_round: parse_field(fields, "currentRound")?,
            next_round_ms: parse_field(fields, "nextRoundTime")?,
            max_users: parse_field(fields, "maxUser")?,
        }))
    }
}

fn parse_field<T: std::str::FromStr>(fields: &HashMap<String, String>, name: &str) -> Result<T> {
    fields
        .get(name)
        .and_then(|raw| raw.parse::<T>().ok())
        .ok_or_else(|| {
            ContestError::StoreError {
                message: format!("Room field '{}' missing or malformed", name),
            }
            .into()
        })
}

/// Partial room update; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct RoomUpdate {
    pub state: Option<RoomState>,
    pub current_round: Option<u32>,
    pub next_round_ms: Option<i64>,
}

impl RoomUpdate {
    fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        if let Some(state) = self.state {
            fields.push(("state".to_string(), state.code().to_string()));
        }
        if let Some(round) = self.current_round {
            fields.push(("currentRound".to_string(), round.to_string()));
        }
        if let Some(next) = self.next_round_ms {
            fields.push(("nextRoundTime".to_string(), next.to_string()));
        }
        fields
    }

    fn apply(&self, room: &mut RoomRecord) {
        if let Some(state) = self.state {
            room.state = state;
        }
        if let Some(round) = self.current_round {
            room.current_round = round;
        }
        if let Some(next) = self.next_round_ms {
            room.next_round_ms = next;
        }
    }
}

/// Outcome of a find-or-create
#[derive(Debug, Clone, PartialEq)]
pub enum RoomCreation {
    /// This caller created the room and owns arming its pre-start
    Created(RoomRecord),
    /// Another caller got there first
    Existing(RoomRecord),
}

impl RoomCreation {
    pub fn room(&self) -> &RoomRecord {
        match self {
            RoomCreation::Created(room) | RoomCreation::Existing(room) => room,
        }
    }

    pub fn into_room(self) -> RoomRecord {
        match self {
            RoomCreation::Created(room) | RoomCreation::Existing(room) => room,
        }
    }
}

/// CRUD over room records in the shared store
pub struct RoomRegistry {
    store: Arc<dyn StoreGateway>,
    room_ttl: Duration,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn StoreGateway>, room_ttl: Duration) -> Self {
        Self { store, room_ttl }
    }

    pub async fn find_room(&self, contest_id: &str, time_slot: TimeSlot) -> Result<Option<RoomRecord>> {
        let fields = self
            .store
            .hash_get_all(&keys::room(contest_id, time_slot))
            .await?;
        RoomRecord::from_fields(&fields)
    }

    /// Create `record` unless a room for its slot already exists.
    ///
    /// Fails with `WindowExpired` and writes nothing when the game start is not
    /// in the future.
    pub async fn create_room(&self, record: RoomRecord, now_ms: i64) -> Result<RoomCreation> {
        if record.game_start_ms - now_ms <= 0 {
            return Err(ContestError::WindowExpired {
                contest_id: record.contest_id.clone(),
                game_start_ms: record.game_start_ms,
            }
            .into());
        }

        let key = keys::room(&record.contest_id, record.game_start_ms);
        let created = self
            .store
            .hash_create(&key, &record.to_fields(), Some(self.room_ttl))
            .await?;

        if created {
            info!(
                "[{}] Created room {} (capacity: {}, max users: {}, rounds: {})",
                record.tag(),
                record.room_id,
                record.capacity,
                record.max_users,
                record.no_of_rounds
            );
            return Ok(RoomCreation::Created(record));
        }

        debug!("[{}] Room already exists, reusing", record.tag());
        match self.find_room(&record.contest_id, record.game_start_ms).await? {
            Some(existing) => Ok(RoomCreation::Existing(existing)),
            None => Err(ContestError::StoreError {
                message: format!("Room {} vanished after create race", record.tag()),
            }
            .into()),
        }
    }

    /// Apply a partial update, returning the updated record
    pub async fn update_room(&self, room: &RoomRecord, update: RoomUpdate) -> Result<RoomRecord> {
        let fields = update.to_fields();
        self.store
            .hash_set(&keys::room(&room.contest_id, room.game_start_ms), &fields)
            .await?;

        let mut updated = room.clone();
        update.apply(&mut updated);
        Ok(updated)
    }

    /// Move a room to `to`, rejecting edges the lifecycle does not allow
    pub async fn transition(&self, room: &RoomRecord, to: RoomState) -> Result<RoomRecord> {
        room.state.transition(to)?;
        info!("[{}] State {} -> {}", room.tag(), room.state, to);
        self.update_room(
            room,
            RoomUpdate {
                state: Some(to),
                ..Default::default()
            },
        )
        .await
    }

    /// Add a player to the joined set. True only for the first add.
    pub async fn add_joined_player(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        user_id: &str,
    ) -> Result<bool> {
        let key = keys::joined_players(contest_id, time_slot);
        let added = self.store.set_add(&key, user_id).await?;
        if added {
            self.store.expire(&key, self.room_ttl).await?;
        }
        Ok(added)
    }

    /// Undo a join whose payment failed
    pub async fn remove_joined_player(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        user_id: &str,
    ) -> Result<bool> {
        self.store
            .set_remove(&keys::joined_players(contest_id, time_slot), user_id)
            .await
    }

    pub async fn has_joined_player(
        &self,
        contest_id: &str,
        time_slot: TimeSlot,
        user_id: &str,
    ) -> Result<bool> {
        self.store
            .set_is_member(&keys::joined_players(contest_id, time_slot), user_id)
            .await
    }

    pub async fn joined_players(&self, contest_id: &str, time_slot: TimeSlot) -> Result<Vec<UserId>> {
        self.store
            .set_members(&keys::joined_players(contest_id, time_slot))
            .await
    }

    /// Players advancing out of `round`
    pub async fn round_winners(
        &self,
        round: u32,
        contest_id: &str,
        time_slot: TimeSlot,
    ) -> Result<Vec<UserId>> {
        self.store
            .set_members(&keys::round_winners(round, contest_id, time_slot))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn test_contest(game_start_ms: i64) -> ContestDefinition {
        serde_json::from_value(serde_json::json!({
            "cid": "c1",
            "contestStart": game_start_ms - 60_000,
            "GameStartTime": game_start_ms,
            "tt": 4,
            "MaxUsers": 100,
            "NoOfRound": 3,
            "Duration": 120
        }))
        .unwrap()
    }

    fn registry() -> RoomRegistry {
        RoomRegistry::new(Arc::new(InMemoryStore::new()), Duration::from_secs(3600))
    }

    #[test]
    fn test_fields_roundtrip() {
        let record = RoomRecord::for_contest(&test_contest(1_000_000), 30_000);
        let fields: HashMap<String, String> = record.to_fields().into_iter().collect();
        assert_eq!(RoomRecord::from_fields(&fields).unwrap(), Some(record));
        assert_eq!(RoomRecord::from_fields(&HashMap::new()).unwrap(), None);
    }

    #[test]
    fn test_new_record_defaults() {
        let record = RoomRecord::for_contest(&test_contest(1_000_000), 30_000);
        assert_eq!(record.state, RoomState::AcceptJoining);
        assert_eq!(record.current_round, 1);
        assert_eq!(record.round_duration_ms, 120_000);
        assert_eq!(record.next_round_ms, 1_000_000 + 120_000 + 30_000);
    }

    #[tokio::test]
    async fn test_create_rejects_past_start_without_writing() {
        let registry = registry();
        let record = RoomRecord::for_contest(&test_contest(1_000), 30_000);

        let err = registry.create_room(record, 1_000).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ContestError>(),
            Some(ContestError::WindowExpired { .. })
        ));
        assert!(registry.find_room("c1", 1_000).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_racing_creators_share_one_room() {
        let registry = registry();
        let first = RoomRecord::for_contest(&test_contest(10_000), 30_000);
        let second = RoomRecord::for_contest(&test_contest(10_000), 30_000);

        let a = registry.create_room(first.clone(), 0).await.unwrap();
        let b = registry.create_room(second, 0).await.unwrap();

        assert!(matches!(a, RoomCreation::Created(_)));
        assert_eq!(b, RoomCreation::Existing(first));
    }

    #[tokio::test]
    async fn test_transition_validates_edges() {
        let registry = registry();
        let room = registry
            .create_room(RoomRecord::for_contest(&test_contest(10_000), 30_000), 0)
            .await
            .unwrap()
            .into_room();

        assert!(registry.transition(&room, RoomState::GameStart).await.is_err());

        let room = registry
            .transition(&room, RoomState::PreStartingConfig)
            .await
            .unwrap();
        let stored = registry.find_room("c1", 10_000).await.unwrap().unwrap();
        assert_eq!(stored.state, RoomState::PreStartingConfig);
        assert_eq!(room, stored);
    }

    #[tokio::test]
    async fn test_joined_players() {
        let registry = registry();
        assert!(registry.add_joined_player("c1", 10, "u1").await.unwrap());
        assert!(!registry.add_joined_player("c1", 10, "u1").await.unwrap());
        assert!(registry.has_joined_player("c1", 10, "u1").await.unwrap());
        assert_eq!(registry.joined_players("c1", 10).await.unwrap(), vec!["u1"]);

        assert!(registry.remove_joined_player("c1", 10, "u1").await.unwrap());
        assert!(registry.joined_players("c1", 10).await.unwrap().is_empty());
    }
}
