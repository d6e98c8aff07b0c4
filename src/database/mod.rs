//! Database module

pub mod schema;

// Re-export for convenience
pub use schema::initialize_database;
