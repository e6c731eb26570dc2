pub mod chat;
pub mod cooldown;
pub mod events;
pub mod handle;
pub mod proximity;
pub mod rate_limiter;
pub mod safety;
pub mod session;
pub mod signal;
pub mod validation;
