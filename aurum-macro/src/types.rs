//! # Type Inference Module
//!
//! Maps a struct field's Rust type (and, for `String` fields, its name) to the token stream for
//! an `aurum::LogicalType` variant, the way the teacher's `rust_type_to_sql` mapped Rust types
//! directly to SQL type strings. Here the target is the engine's own driver-independent logical
//! type — `sql_type(driver)` on the result is what finally picks between SQLite and MySQL
//! spellings, at run time rather than at macro-expansion time.
//!
//! ## Supported Type Mappings
//!
//! - `i32`, `i16`, `i8`, `u16`, `u8` → `Integer`; `i64`, `u32`, `u64` → `BigInt`
//! - `String` → `Text`, unless an explicit `#[aurum(size = N)]` or a field-name heuristic
//!   applies, in which case `VarChar(N)`
//! - `bool` → `Boolean`
//! - `f32`, `f64` → `Double`, unless a field-name heuristic applies (`price`/`amount` →
//!   `Decimal(10,2)`, names containing `rate` → `Decimal(5,4)`)
//! - `Uuid` → `Uuid`
//! - `DateTime<Utc>` → `TimestampTz`, `NaiveDateTime` → `Timestamp`, `NaiveDate` → `Date`,
//!   `NaiveTime` → `Time`
//! - `Option<T>` → the logical type of `T`, marked nullable
//!
//! ## Field-Name Length Heuristics
//!
//! When a `String` field carries no explicit `#[aurum(size = N)]`, its name decides the column
//! width: names ending in `email` get `VARCHAR(255)`, names containing `url` get `VARCHAR(500)`,
//! names ending in `code` get `VARCHAR(50)`. Everything else, including names containing
//! `description`, is left as unbounded `TEXT`.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{GenericArgument, PathArguments, Type};

/// Extracts the inner type `T` from `Option<T>`, if `ty` is one.
fn option_inner(ty: &Type) -> Option<&Type> {
    let Type::Path(type_path) = ty else { return None };
    let segment = type_path.path.segments.last()?;
    if segment.ident != "Option" {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else { return None };
    match args.args.first() {
        Some(GenericArgument::Type(inner)) => Some(inner),
        _ => None,
    }
}

/// Field-name length heuristics applied to `String` columns with no explicit `size`.
fn inferred_varchar_len(field_name: &str) -> Option<usize> {
    let lower = field_name.to_lowercase();
    if lower.ends_with("email") {
        Some(255)
    } else if lower.contains("url") {
        Some(500)
    } else if lower.ends_with("code") {
        Some(50)
    } else {
        None
    }
}

/// Field-name heuristics that promote an `f32`/`f64` column from `Double` to a fixed-point
/// `Decimal`: monetary amounts want exact cent precision, rates want more fractional digits.
fn inferred_decimal_precision_scale(field_name: &str) -> Option<(u32, u32)> {
    let lower = field_name.to_lowercase();
    if lower.ends_with("price") || lower.contains("price_") || lower == "amount" || lower.ends_with("amount") {
        Some((10, 2))
    } else if lower.contains("rate") {
        Some((5, 4))
    } else {
        None
    }
}

/// Maps a struct field's Rust type to `(logical_type_tokens, is_nullable)`.
///
/// `field_name` feeds the `String` length heuristics; `explicit_size` is the field's
/// `#[aurum(size = N)]` attribute, which always wins over the heuristic.
pub fn rust_type_to_logical(ty: &Type, field_name: &str, explicit_size: Option<usize>) -> (TokenStream, bool) {
    if let Some(inner) = option_inner(ty) {
        let (tokens, _) = rust_type_to_logical(inner, field_name, explicit_size);
        return (tokens, true);
    }

    let Type::Path(type_path) = ty else {
        return (quote! { aurum::LogicalType::Text }, false);
    };
    let Some(segment) = type_path.path.segments.last() else {
        return (quote! { aurum::LogicalType::Text }, false);
    };

    let tokens = match segment.ident.to_string().as_str() {
        "i32" | "i16" | "i8" | "u16" | "u8" => quote! { aurum::LogicalType::Integer },
        "i64" | "u32" | "u64" | "usize" | "isize" => quote! { aurum::LogicalType::BigInt },
        "String" => match explicit_size.or_else(|| inferred_varchar_len(field_name)) {
            Some(n) => quote! { aurum::LogicalType::VarChar(#n) },
            None => quote! { aurum::LogicalType::Text },
        },
        "bool" => quote! { aurum::LogicalType::Boolean },
        "f32" | "f64" => match inferred_decimal_precision_scale(field_name) {
            Some((p, s)) => quote! { aurum::LogicalType::Decimal { precision: #p, scale: #s } },
            None => quote! { aurum::LogicalType::Double },
        },
        "Uuid" => quote! { aurum::LogicalType::Uuid },
        "DateTime" => quote! { aurum::LogicalType::TimestampTz },
        "NaiveDateTime" => quote! { aurum::LogicalType::Timestamp },
        "NaiveDate" => quote! { aurum::LogicalType::Date },
        "NaiveTime" => quote! { aurum::LogicalType::Time },
        _ => quote! { aurum::LogicalType::Text },
    };
    (tokens, false)
}
