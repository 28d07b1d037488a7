pub mod alert;
pub mod user;

pub use alert::{Alert, AlertCondition, AlertEdit};
pub use user::User;
