pub mod diag;
pub mod migrate;
pub mod mount;
pub mod mount_store;
pub mod node;
pub mod ops;
pub mod proxy;
pub mod refresh;
pub mod registry;
pub mod routes;
pub mod state;
pub mod store;
