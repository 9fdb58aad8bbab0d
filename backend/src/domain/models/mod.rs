//! Domain entities. These are never serialized over the API directly; the
//! REST layer maps them to the DTOs in the `shared` crate.

pub mod ledger;
pub mod order;
pub mod settlement;
pub mod wallet;
