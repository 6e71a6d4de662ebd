//! Redis integration: the durable delayed-job broker.

pub mod lua_scripts;
pub mod queue;

pub use queue::RedisJobQueue;
