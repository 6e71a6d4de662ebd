//! Postgres repositories backing the delivery collaborators.
//!
//! All queries are runtime-checked (`sqlx::query`) so the crate builds
//! without a live database.

pub mod events;
pub mod notifications;

pub use events::PgEventDirectory;
pub use notifications::PgNotificationStore;
