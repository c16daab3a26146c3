pub mod base;
pub mod migration;
pub mod partition;
pub mod pool;
