pub mod codec;
pub mod handler;
pub mod heartbeat;
