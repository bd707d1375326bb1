//! redb table definitions for the profile store.
//!
//! Keys are `&str`, values are JSON-serialized `&[u8]`.

use redb::TableDefinition;

/// Execution profiles keyed by `{worker}/{core}:{implementation}`.
pub const PROFILES: TableDefinition<&str, &[u8]> = TableDefinition::new("profiles");
