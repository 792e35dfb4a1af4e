pub mod provider;
pub mod reconcile;
