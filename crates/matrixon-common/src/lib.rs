//! Matrixon Common Library
//!
//! Author: arkSong <arksong2018@gmail.com>
//! Version: 0.11.0-alpha
//!
//! Error types shared by every crate taking part in SSO identity mapping.

pub mod error;

pub use error::{MappingError, MatrixonError, Result};
