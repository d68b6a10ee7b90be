// Library for the binary and tests to access modules

pub mod actions;
pub mod config;
pub mod controller;
pub mod events;
pub mod limits;
pub mod models;
pub mod observers;
pub mod refresh;
pub mod runtime;
pub mod sampler;
pub mod scaler;
pub mod tasks;
pub mod worker;
