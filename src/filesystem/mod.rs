// src/filesystem/mod.rs

//! Filesystem primitives for the package store and delta engine
//!
//! This module provides:
//! - Atomic promotion of finished files (rename with cross-device fallback)
//! - Fast content equality using memory-mapped chunk comparison
//! - Hard deletion that tolerates transiently locked files
//! - Sorted, separator-normalized enumeration of directory trees
//!
//! Paths inside package archives are always relative and use `/` as the
//! separator; [`walk`] converts between that form and native paths.

mod atomic;
mod compare;
mod delete;
pub mod walk;

pub use atomic::{move_file_atomic, write_file_atomic};
pub use compare::files_equal;
pub use delete::{DELETE_RETRY, OLD_SUFFIX, delete_hard, old_path};
pub use walk::{native_path, relative_files};
