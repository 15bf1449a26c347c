//! Field mapping from CMS source fields to normalized archive fields.

pub mod coerce;
pub mod field_mapper;

pub use field_mapper::FieldMapper;
