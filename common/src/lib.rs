pub mod constants;
pub mod error;
pub mod schemas;
pub mod telemetry;
pub mod time_utils;
pub mod url_utils;
