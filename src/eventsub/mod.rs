pub mod dispatch;
pub mod subscriber;
pub mod types;
pub mod verify;
