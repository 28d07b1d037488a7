pub mod alert_store;
pub mod memory_store;
pub mod quotes;
pub mod notifier;
pub mod db_init;

pub mod alerts_service;
