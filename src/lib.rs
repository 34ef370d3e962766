pub mod config;
pub mod genie;
pub mod util;
