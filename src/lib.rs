pub mod api;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod history;
pub mod poller;
pub mod registry;
pub mod schedules;
pub mod shelly;
