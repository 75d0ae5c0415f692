//! Records exchanged with the persistence layer and with clients
//!
//! Both directions use `bincode`; framing and transport are somebody else's
//! problem.

use crate::change::EntityChange;
use crate::context::{ScheduledChange, ScheduledMutation};
use crate::cuboid::CuboidData;
use crate::entity::{CreatureEntity, Entity, PassiveEntity};
use crate::error::CodecError;
use crate::mutation::Mutation;
use crate::types::CuboidAddress;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cuboid with the mutations that were still waiting when it was unloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendedCuboid {
    pub cuboid: CuboidData,
    pub pending_mutations: Vec<ScheduledMutation>,
}

impl SuspendedCuboid {
    pub fn new(cuboid: CuboidData) -> Self {
        Self {
            cuboid,
            pending_mutations: Vec::new(),
        }
    }

    /// Drops queued mutations that are not worth persisting.
    pub fn retain_saveable(&mut self) {
        self.pending_mutations
            .retain(|scheduled| scheduled.mutation.can_save_to_disk());
    }
}

/// A player with the changes that were still waiting when it left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendedEntity {
    pub entity: Entity,
    pub pending_changes: Vec<ScheduledChange>,
}

impl SuspendedEntity {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            pending_changes: Vec::new(),
        }
    }

    /// The key the persistence layer files this entity under.
    pub fn storage_key(&self) -> i32 {
        assert!(
            self.entity.id > 0,
            "entity id {} cannot be used as a storage key",
            self.entity.id
        );
        self.entity.id
    }

    pub fn retain_saveable(&mut self) {
        self.pending_changes
            .retain(|scheduled| scheduled.change.can_save_to_disk());
    }
}

/// Whether a two-phase activity the client started has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityOutcome {
    pub activity_id: i64,
    pub success: bool,
}

/// Everything a client needs to replay one authoritative tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerTickUpdate {
    pub tick_number: u64,
    /// The lists below describe the whole world after this tick rather than
    /// what changed during it; nothing is replayed.
    pub full_state: bool,
    pub loaded_cuboids: Vec<CuboidData>,
    pub unloaded_cuboids: Vec<CuboidAddress>,
    pub joined_entities: Vec<Entity>,
    pub left_entities: Vec<i32>,
    /// Changes applied this tick, per entity, in application order.
    pub entity_changes: BTreeMap<i32, Vec<EntityChange>>,
    /// Mutations applied this tick, per cuboid, in application order.
    pub cuboid_mutations: BTreeMap<CuboidAddress, Vec<Mutation>>,
    pub spawned_creatures: Vec<CreatureEntity>,
    pub spawned_passives: Vec<PassiveEntity>,
    pub completed_activities: Vec<ActivityOutcome>,
    /// Highest commit level of this client's own changes the server has processed.
    pub latest_local_commit: i64,
}

pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(record).map_err(CodecError::Encode)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(CodecError::Decode)
}

/// Checks a key handed back by the persistence layer before it is trusted.
pub fn validate_storage_key(key: i32) -> Result<i32, CodecError> {
    if key > 0 {
        Ok(key)
    } else {
        Err(CodecError::InvalidStorageKey { key })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockType;
    use crate::types::{AbsoluteLocation, BlockAddress, EntityLocation};

    #[test]
    fn test_suspended_cuboid_survives_codec() {
        let address = CuboidAddress::new(1, -2, 3);
        let mut cuboid = CuboidData::filled(address, BlockType::STONE);
        cuboid.set_block_type(BlockAddress::new(4, 5, 6), BlockType::LAMP);
        let mut suspended = SuspendedCuboid::new(cuboid);
        suspended.pending_mutations.push(ScheduledMutation::delayed(
            Mutation::ReplaceBlock {
                location: address.base(),
                expected: BlockType::STONE,
                replacement: BlockType::AIR,
            },
            150,
        ));
        let bytes = encode(&suspended).unwrap();
        let decoded: SuspendedCuboid = decode(&bytes).unwrap();
        assert_eq!(decoded, suspended);
    }

    #[test]
    fn test_truncated_bytes_fail_to_decode() {
        let update = ServerTickUpdate {
            tick_number: 9,
            latest_local_commit: 4,
            ..ServerTickUpdate::default()
        };
        let bytes = encode(&update).unwrap();
        let result: Result<ServerTickUpdate, CodecError> = decode(&bytes[..bytes.len() / 2]);
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[test]
    fn test_retain_saveable_drops_transient_work() {
        let mut suspended = SuspendedEntity::new(Entity::new(3, EntityLocation::default()));
        suspended.pending_changes.push(ScheduledChange::plain(
            EntityChange::Move {
                delta: EntityLocation::new(0.1, 0.0, 0.0),
                millis: 10,
            },
            0,
        ));
        suspended
            .pending_changes
            .push(ScheduledChange::plain(EntityChange::TakeDamage { amount: 3 }, 0));
        suspended.retain_saveable();
        assert_eq!(suspended.pending_changes.len(), 1);
        assert_eq!(suspended.storage_key(), 3);

        let mut cuboid = SuspendedCuboid::new(CuboidData::filled(CuboidAddress::new(0, 0, 0), BlockType::AIR));
        cuboid.pending_mutations.push(ScheduledMutation::now(Mutation::BlockUpdate {
            location: AbsoluteLocation::new(0, 0, 0),
        }));
        cuboid.retain_saveable();
        assert!(cuboid.pending_mutations.is_empty());
    }

    #[test]
    fn test_storage_keys_must_be_positive() {
        assert_eq!(validate_storage_key(5).unwrap(), 5);
        assert!(matches!(
            validate_storage_key(0),
            Err(CodecError::InvalidStorageKey { key: 0 })
        ));
    }
}
