pub mod document;
pub mod engine;
pub mod handlers;
pub mod notification;
pub mod round;
pub mod scheduler;
pub mod sequencer;
pub mod store;
