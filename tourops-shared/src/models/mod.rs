pub mod events;
pub mod manifest;
