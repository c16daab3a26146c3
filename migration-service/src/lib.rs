pub mod config;
pub mod control;
pub mod core;
pub mod migrations;
pub mod restarter;
pub mod routes;
pub mod startup;
