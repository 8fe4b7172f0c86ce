// Allow dead code during development phase
#![allow(dead_code)]

pub mod logging;
pub mod plugin;
