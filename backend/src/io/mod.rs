//! # IO Module
//!
//! Adapter layer between HTTP clients and the domain services.
//!
//! Handlers translate JSON requests into domain commands, call the services
//! and map results and errors back to the DTOs in the `shared` crate. No
//! business rules live here.

pub mod rest;
