pub mod ledger_mapper;
pub mod order_mapper;
