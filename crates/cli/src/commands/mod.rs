pub mod check_config;
pub mod hash;
pub mod simulate;
