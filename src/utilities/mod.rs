//! Shared utilities: error types, placeholder interpolation and rate limiting.

pub mod errors;
pub mod rpm_controller;
pub mod string_utils;
