//! Identifier sanitisation.
//!
//! Some services report table or column names that are not legal
//! identifiers in the query grammar (reserved words, embedded
//! punctuation, leading digits). Names stored in the metadata hierarchy
//! must be safely insertable into a query unescaped, so readers pass
//! everything they acquire through a [`NameFixer`], which repairs
//! non-conformant names by quoting and remembers the original form for
//! communication back to the service.

mod fixer;
pub mod syntax;

pub use fixer::{IdentityFixer, NameFixer, QuotingFixer};
