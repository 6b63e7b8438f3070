//! Source transforms that split a Waku application along its React Server
//! Components boundaries.
//!
//! Modules marked with `"use client"` are replaced by client references when
//! imported from the server graph, `"use server"` modules have their exports
//! registered as server references, and inline `"use server"` closures are
//! hoisted into standalone exports with their captured variables bound at
//! the original call site.

use std::hash::BuildHasherDefault;

use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHasher;

pub mod ast;
pub mod exports;
pub mod plugin;
pub mod transforms;

pub type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;
pub type FxIndexSet<K> = IndexSet<K, BuildHasherDefault<FxHasher>>;
