pub mod action_file;
pub mod calibrator;
pub mod config;
pub mod devices;
pub mod glove;
pub mod hand;
pub mod kalman_filter;
pub mod range_map;
pub mod simulated;
pub mod translator;
pub mod types;
pub mod user;
