//! `opsledger-infra`: persistent datastore implementations.

pub mod postgres;

pub use postgres::PgStore;
