//! Pure annotation logic for the Clio client.
//!
//! Record and table types, schema validation, the conflict-aware merge of
//! new field values against existing annotations, and upload chunk
//! planning. Nothing in this crate touches the network.

pub mod chunking;
pub mod error;
pub mod merge;
pub mod schema;
pub mod table;
pub mod types;
