//! A DWARF debugging-information core: parses the `.debug_info`/`.debug_types`
//! DIE tree, evaluates location expressions and location lists, constructs a
//! process-wide type model, materializes objects out of a location plus a
//! type, and walks `.debug_frame`/`.eh_frame` call frame information.
//!
//! This crate never loads an ELF file and never reads live process memory or
//! registers itself. It consumes those as the `Module`, `Index`,
//! `MemoryReader` and `RegisterState` traits ([`module`]) and is driven by an
//! embedder that implements them — see [`session::Session`] for the small set
//! of entry points ([`session::Session::find_type`],
//! [`session::Session::find_object`], [`session::Session::object_from_dwarf`],
//! [`session::find_dwarf_cfi`], [`session::Session::find_dwarf_scopes`],
//! [`session::Session::find_die_ancestors`]) this core exposes.
//!
//! ```ignore
//! let dwarf = dwarf_core::die::Dwarf::from_module(&module)?;
//! let session = dwarf_core::session::Session::new(&dwarf, &module, &index, 0);
//! let ty = session.find_type(dwarf_core::session::TypeSearchKind::Enum, "Color", None)?;
//! ```

mod buffer;
pub mod cfi;
mod cfi_expr;
pub mod consts;
pub mod die;
pub mod error;
mod expr;
mod loclist;
pub mod module;
pub mod object;
pub mod session;
pub mod types;

pub use error::{BufferError, Error, Result, SectionError};
pub use session::{cfi_engine, find_dwarf_cfi, ObjectFlags, Session, TypeSearchKind};
