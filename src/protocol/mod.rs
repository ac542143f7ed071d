//! Wire protocol: the envelope every managed topic carries, the registry
//! mapping symbolic keys to topic patterns, and the concrete payload shapes.

pub mod envelope;
pub mod payloads;
pub mod registry;

pub use envelope::{Envelope, EnvelopeError, MessageType, Priority, ServiceDescriptor};
pub use payloads::*;
pub use registry::{RegistryError, TopicDefinition, TopicRegistry, MANDATORY_TOPICS, SUPPLEMENTAL_TOPICS};
