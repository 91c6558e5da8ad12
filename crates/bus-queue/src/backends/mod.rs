#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mongo")]
pub mod mongo;

#[cfg(feature = "broker")]
pub mod broker;
