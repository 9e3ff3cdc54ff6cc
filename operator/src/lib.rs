pub mod client;
pub mod config;
pub mod context;
pub mod controller;
pub mod crd;
pub mod error;
pub mod event;
pub mod finalizer;
pub mod install;
pub mod labels;
pub mod multierr;
pub mod olm;
pub mod operand;
pub mod reconcile;
pub mod router;
pub mod status;
pub mod teardown;

#[cfg(test)]
mod testing;
