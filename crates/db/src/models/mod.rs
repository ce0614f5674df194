//! Domain model structs and DTOs.
//!
//! Each submodule contains:
//! - A `FromRow` + `Serialize` entity struct matching the database row
//! - Plain-struct write DTOs consumed by the sync engine
//! - A `Deserialize` query struct for list endpoints

pub mod license;
