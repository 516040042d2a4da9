//! SQLite-backed local store.

mod db;
mod ops;

pub use db::{Database, OFFLINE_MODE_KEY};
pub use ops::LocalEffect;
