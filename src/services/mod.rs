pub mod dispatch;
pub mod processor;
pub mod recipients;
pub mod redis_store;
pub mod registry;
pub mod store;
