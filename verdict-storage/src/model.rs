//! Stored model contract
//!
//! Every inventory entity kept by the store implements [`Model`]. The store
//! persists models in their serialized form; filter expressions are evaluated
//! against that form.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use verdict_core::{
    Cluster, Disk, DiskProfile, EntityKind, Host, NicProfile, Revision, StorageError, Vm,
    VerdictResult,
};

/// An entity the store can persist, version and watch.
pub trait Model: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table the model lives in.
    const KIND: EntityKind;

    /// Primary key.
    fn pk(&self) -> &str;

    /// Store-assigned revision.
    fn revision(&self) -> Revision;

    /// Only the store (and the harvester's compensation step) sets this.
    fn set_revision(&mut self, revision: Revision);
}

macro_rules! impl_model {
    ($type:ty, $kind:expr) => {
        impl Model for $type {
            const KIND: EntityKind = $kind;

            fn pk(&self) -> &str {
                &self.id
            }

            fn revision(&self) -> Revision {
                self.revision
            }

            fn set_revision(&mut self, revision: Revision) {
                self.revision = revision;
            }
        }
    };
}

impl_model!(Vm, EntityKind::Vm);
impl_model!(Host, EntityKind::Host);
impl_model!(Cluster, EntityKind::Cluster);
impl_model!(Disk, EntityKind::Disk);
impl_model!(NicProfile, EntityKind::NicProfile);
impl_model!(DiskProfile, EntityKind::DiskProfile);

/// Encode a model into its stored form.
pub fn encode<M: Model>(model: &M) -> VerdictResult<serde_json::Value> {
    serde_json::to_value(model).map_err(|e| {
        StorageError::Decode {
            kind: M::KIND,
            reason: e.to_string(),
        }
        .into()
    })
}

/// Decode a model from its stored form.
pub fn decode<M: Model>(value: serde_json::Value) -> VerdictResult<M> {
    serde_json::from_value(value).map_err(|e| {
        StorageError::Decode {
            kind: M::KIND,
            reason: e.to_string(),
        }
        .into()
    })
}
