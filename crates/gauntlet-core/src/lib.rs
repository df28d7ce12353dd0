pub mod config;
pub mod db;
pub mod errors;
pub mod fingerprint;
pub mod paths;
pub mod sandbox;
pub mod store;
pub mod watch;
