//! Runtime support for code generated by `#[derive(Persistable)]`.
//! Do not use directly.

use std::sync::Arc;

pub use crate::element::Field;
pub use crate::handler::{LayoutBuilder, Reflective};

use crate::error::{Result, SwizzleError};
use crate::handler::TypeHandler;
use crate::handler::reflective::reflective_handler;

/// Handler factory behind the derived `Persistable::create_handler`.
pub fn derived_handler<T: Reflective>() -> Result<Arc<dyn TypeHandler>> {
    reflective_handler::<T>()
}

/// Default persistent name of a derived type: its module path and identifier.
pub fn qualified_name(module_path: &str, ident: &str) -> String {
    format!("{module_path}::{ident}")
}

/// Blank state of a field, spelled so generated code needs no trait imports.
pub fn blank_field<E: Field>() -> E {
    E::blank()
}

/// Error for a stored variant index the enum does not have.
pub fn unknown_variant(type_name: &str, ordinal: u32) -> SwizzleError {
    SwizzleError::Format(format!("{type_name} has no variant with index {ordinal}"))
}
