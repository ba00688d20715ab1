pub mod directory;
pub mod health;
pub mod runtime;

pub use directory::{list_bin, remove, upsert};
pub use health::health_check;
pub use runtime::runtime_rooms;
