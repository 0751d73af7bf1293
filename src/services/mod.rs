pub mod catalog;
pub mod heygen;
pub mod poller;
pub mod session;
pub mod workflow;
