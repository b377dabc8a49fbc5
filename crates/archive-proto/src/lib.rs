pub mod config;
pub mod deeplink;
pub mod model;
pub mod platform;
pub mod protocol;
pub mod state;
