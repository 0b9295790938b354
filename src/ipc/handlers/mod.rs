pub mod backup;
pub mod catalog;
pub mod core;
pub mod dashboard;
pub mod rooms;
pub mod schedules;
pub mod session;
pub mod setup;
pub mod users;
