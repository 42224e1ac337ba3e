//! Resource model: typed resource definitions, attribute policies,
//! table-driven validation, and the tree's type-compatibility invariants.
//!
//! The attribute policy tables are the single source of truth for what a
//! resource of a given type may carry; validation, announcement derivation,
//! and discovery all read them. No per-field hand-written validators.

pub mod attribute;
pub mod filter;
pub mod policies;
pub mod resource;
pub mod types;
pub mod validation;

pub use attribute::{attr, Announce, AttrType, AttributePolicy, EnumRange, Optionality};
pub use filter::matches_filter;
pub use policies::PolicyRegistry;
pub use resource::Resource;
pub use types::ResourceType;
pub use validation::{validate_create, validate_update};
