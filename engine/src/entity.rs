//! The record contract stores and the reconciler work against.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;

/// A persisted record type.
///
/// `Id` is the store identity (the primary key). It is distinct from the key
/// a reconciliation matches on, which the caller supplies per call. The
/// default `Id` value marks a record whose identity the store assigns on
/// insert.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: Clone
        + Default
        + Eq
        + Ord
        + Hash
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// The record's identity.
    fn id(&self) -> Self::Id;

    /// Overwrite the record's identity.
    fn set_id(&mut self, id: Self::Id);

    /// Whether a store with an identity generator should assign this
    /// record's identity on insert. Defaults to "still the default `Id`".
    fn needs_identity(&self) -> bool {
        self.id() == Self::Id::default()
    }

    /// Overwrite every non-identity field with `source`'s values.
    ///
    /// The default clones `source` wholesale and then restores this record's
    /// identity. Override when some fields must survive an update (audit
    /// columns, row versions).
    fn copy_fields_from(&mut self, source: &Self) {
        let id = self.id();
        *self = source.clone();
        self.set_id(id);
    }

    /// Read a top-level field as JSON.
    ///
    /// Declarative filters evaluated in-process read fields through this,
    /// once per referenced field. Returns `None` when the record does not
    /// serialize to an object or lacks the field. Override to expose
    /// computed fields or to skip the serialization.
    fn field(&self, name: &str) -> Option<serde_json::Value> {
        match serde_json::to_value(self).ok()? {
            serde_json::Value::Object(mut map) => map.remove(name),
            _ => None,
        }
    }
}
