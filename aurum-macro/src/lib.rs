//! # Aurum Procedural Macros
//!
//! This crate provides the procedural macro that powers `aurum`'s entity mapping: the
//! `#[derive(Entity)]` macro that implements the `aurum::Entity` trait for a struct
//! representing a database table.
//!
//! ## Overview
//!
//! The macro analyzes struct definitions and their `#[aurum(...)]` attributes to generate the
//! boilerplate an ORM needs but Rust has no reflection to synthesize at run time: table/column
//! metadata, field accessors keyed by name, and association/inheritance wiring.
//!
//! ## Architecture
//!
//! - **`lib.rs`** (this file): entry point and the macro definition
//! - **`derive_entity.rs`**: `#[derive(Entity)]` expansion
//! - **`types.rs`**: Rust type → `aurum::LogicalType` inference
//!
//! ## Usage
//!
//! This crate is not meant to be used directly; it's re-exported by `aurum`:
//!
//! ```rust,ignore
//! use aurum::Entity;
//!
//! #[derive(Entity, Debug, Clone)]
//! #[aurum(table = "users")]
//! struct User {
//!     #[aurum(primary_key)]
//!     id: i64,
//!     #[aurum(size = 50, unique)]
//!     username: String,
//! }
//! ```
//!
//! ## Supported Attributes
//!
//! ### Struct-level
//! - `table = "name"` — physical table name (default: the struct name, snake_cased)
//! - `strategy = "single_table" | "joined"`, `discriminator_column = "..."` — declares this
//!   entity as part of an inheritance hierarchy
//! - `discriminator_value = "..."` — this concrete entity's own discriminator value (omit on
//!   the abstract root)
//! - `discriminator_values = "a,b,c"` — on the root only, every concrete discriminator value in
//!   the hierarchy, for root-level `disc IN (...)` queries
//! - `parent_table = "..."` — the joined-table strategy's parent table name
//!
//! ### Field-level
//! - `primary_key`, `unique`, `size = N`, `column = "physical_name"`
//! - `multi_column = "base:suffix"` — this field is one physical column of a composite value
//!   (see `aurum::MultiColumnFieldDescriptor`); every field sharing a `base` joins one
//!   descriptor
//! - `many_to_one`, `one_to_many`, `one_to_one`, `many_to_many` — marks the field as a
//!   navigable association, read from a `Vec<Target>`/`Option<Target>` field type
//! - `foreign_key = "column"`, `mapped_by = "field"`, `join_table = "name"`,
//!   `owner_column = "col"`, `target_column = "col"` — association wiring
//! - `cascade = "persist,remove"`, `fetch_lazy`, `orphan_removal` — association behavior
//!
//! ## Generated Implementation
//!
//! `#[derive(Entity)]` implements `aurum::Entity` (`table_name`/`descriptor`/`get_field`/
//! `set_field`/`as_any`/`as_any_mut`, plus `cascaded_children` where an association cascades)
//! and a `Default` impl, so the struct must not separately derive `Default`.

#![warn(missing_docs)]

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

/// Rust type → `aurum::LogicalType` inference, including the `String` field-name length
/// heuristics.
mod types;

/// `#[derive(Entity)]` expansion: attribute parsing and code generation.
mod derive_entity;

/// Derives the `aurum::Entity` trait for a struct.
///
/// See the crate-level documentation for the full list of supported `#[aurum(...)]` attributes.
///
/// # Requirements
///
/// The struct must have named fields and exactly one `#[aurum(primary_key)]` field. Tuple
/// structs and unit structs are not supported.
///
/// # Panics
///
/// Panics at macro-expansion time if the input is not a struct with named fields, if an
/// `#[aurum(...)]` attribute is malformed, or if an association field's type doesn't match its
/// declared kind (e.g. `one_to_many` on a field that isn't `Vec<T>`).
#[proc_macro_derive(Entity, attributes(aurum))]
pub fn entity_derive(input: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(input as DeriveInput);
    let expanded = derive_entity::expand(ast);
    TokenStream::from(expanded)
}
