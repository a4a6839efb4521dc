//! Vagon DB Library
//!
//! Persistence for vagoneta records. The store is append-only: records are
//! inserted once and only ever read afterwards.

pub mod memory;
pub mod postgres;
pub mod repository;

pub use memory::InMemoryVagonetaRepository;
pub use postgres::PostgresVagonetaRepository;
pub use repository::VagonetaRepository;
