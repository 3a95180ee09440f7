//! Record shapes, the schema registry collaborator and the payload codec
//!
//! Payloads are JSON on the wire. In `SerializationMode::Schema` outbound
//! values are checked against the publisher's record schemas and inbound
//! values against the registry's `{topic}-value` subject.

pub mod codec;
pub mod record;
pub mod registry;

pub use codec::PayloadCodec;
pub use record::{FieldSchema, FieldType, RecordSchema};
pub use registry::{
    key_subject, value_subject, HttpSchemaRegistry, SchemaRegistry, StaticSchemaRegistry,
};
