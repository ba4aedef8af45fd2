pub mod attendance;
pub mod clock;
pub mod config;
pub mod counters;
pub mod error;
pub mod history;
pub mod lifecycle;
pub mod model;
pub mod scheduling;
pub mod service;
pub mod storage;
pub mod sweeper;
