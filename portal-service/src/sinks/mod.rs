pub mod alert_rules;
pub mod store;

pub use store::StoreSink;
