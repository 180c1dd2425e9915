pub mod persistence;

pub use persistence::{Destination, JsonPersistence};
