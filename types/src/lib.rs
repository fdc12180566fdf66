//! Core domain types for Sonar.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

// Pedantic lint configuration - these are intentional design choices
#![allow(clippy::missing_errors_doc)] // Result-returning functions are self-explanatory
#![allow(clippy::missing_panics_doc)] // Panics are documented in assertions

mod diagnostic;
mod language;

pub use diagnostic::{
    Diagnostic, DiagnosticSeverity, Position, Range, SeverityFilter, SeverityFilterParseError,
};
pub use language::{Language, ServerIdentity, UnknownIdentityError};
