pub mod diag;
pub mod serve;
