pub mod config;
pub mod gait;
pub mod leg;
pub mod messages;
pub mod motor;
pub mod runtime;
