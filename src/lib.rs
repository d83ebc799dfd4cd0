pub mod constants;
pub mod math_utils;
pub mod time_utils;
pub mod config;
pub mod logging;
pub mod source;
pub mod run_descriptor;
pub mod control_files;
pub mod weather;
pub mod cache;
pub mod scheduler;
pub mod pardump;
pub mod pack;
pub mod convert;
pub mod plume;
