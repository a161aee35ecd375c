//! Document, signature, and module indexes shared by all providers.

pub mod document_index;
pub mod module_index;
pub mod pipeline;
pub mod poi;
pub mod priority;
pub mod signature_index;

pub use document_index::{Document, DocumentIndex, Ingested, UpdateOutcome};
pub use module_index::ModuleIndex;
pub use pipeline::IndexPipeline;
pub use poi::{Mfa, Poi, PoiId, PoiKind, PoiPosition, PoiRange};
pub use priority::KindPriority;
pub use signature_index::SignatureIndex;
