//! Thin wrappers around the kernel's memory-protection primitives.
//!
//! All `unsafe` syscall code is concentrated here with explicit SAFETY comments.

pub mod pages;
