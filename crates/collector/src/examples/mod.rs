//! Illustrative collectors. These demonstrate the collector interface; they
//! are not part of the pipeline's core contract and a real deployment would
//! replace them with collectors reading `/proc`, polling SNMP, or probing
//! HTTP endpoints.

pub mod fake;
pub mod procstat;
