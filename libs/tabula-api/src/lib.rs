//! Storage-independent model for scheme-described message streams: the
//! message-type catalog, canonical values, the multiplexed frame type, open
//! options and the error taxonomy shared by storage adapters.

pub mod error;
pub mod frame;
pub mod options;
pub mod scheme;
pub mod value;

pub use error::StoreError;
pub use frame::{DataFrame, Directive, Frame};
pub use options::{Direction, OpenOptions, QuerySpec, SeqIndex};
pub use scheme::{FieldDescriptor, FieldKind, IndexMode, MessageDescriptor, Scheme};
pub use value::Value;
