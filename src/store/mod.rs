//! Named-store payloads: single entities and normalized collections.

mod collection;
mod entity;
mod record;

pub use collection::{CollectionMeta, CollectionStore, IdFn};
pub use entity::{EntityState, EntityStore};
pub use record::{field_id, RecordId};
