//! Visitor Beacon: resolves who is visiting (IP geolocation across several
//! free providers), counts visits and downloads, and reports them to a backend.

pub mod config;
pub mod logging;
pub mod notify;
pub mod report;
pub mod stats;
pub mod visitor;
