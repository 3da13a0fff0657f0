//! Tablero: loads report files from an object store for a multi-tab
//! dashboard. Each module (tab) declares the files it needs; files are
//! decoded into tables by suffix, and every failure is reported as a
//! diagnostic instead of aborting the session.

pub mod config;
pub mod dashboard;
pub mod data;
pub mod store;
