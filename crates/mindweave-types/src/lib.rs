//! Core types for the Mindweave agent memory substrate.
//!
//! This crate defines the shared data structures used by the knowledge graph,
//! the consolidation engine and the semantic index. It contains no business
//! logic.

pub mod agent;
pub mod config;
pub mod consolidation;
pub mod error;
pub mod event;
pub mod index;
pub mod memory;
