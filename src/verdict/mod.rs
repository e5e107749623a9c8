//! Outcome classification
//!
//! Derives the success flag and error text as a pure function over what a
//! run produced.

pub mod verdict;
