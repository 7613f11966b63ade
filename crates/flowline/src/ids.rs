//! Newtype identifiers so id spaces cannot be mixed up at call boundaries.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

newtype_id!(DatasetId);
newtype_id!(SchemaVersionId);
newtype_id!(ManifestId);
newtype_id!(PartitionId);
newtype_id!(StorageTargetId);
newtype_id!(WorkflowDefinitionId);
newtype_id!(WorkflowRunId);
newtype_id!(WorkflowRunStepId);
newtype_id!(EventId);
newtype_id!(TriggerId);
newtype_id!(DeliveryId);
newtype_id!(ScheduleId);
newtype_id!(CompactionCheckpointId);
