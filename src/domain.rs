pub mod error;
pub mod event;
pub mod id;
pub mod money;
pub mod notification;
pub mod outcome;
pub mod payment;
pub mod store;
pub mod subscription;
pub mod user;
