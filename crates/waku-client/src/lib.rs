//! The client half of a Waku application: fetches RSC payloads, keeps the
//! live element tree up to date, and renders named slots out of it.
//!
//! [`FetchRscStore`] owns the fetch, prefetch and call-server paths. [`Root`]
//! mounts a store and exposes the live elements that [`Slot`] reads from.

use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use rustc_hash::FxHasher;

pub mod codec;
pub mod config;
pub mod elements;
pub mod error;
pub mod fetch;
pub mod root;
pub mod rsc_path;
pub mod store;

pub use crate::{
    codec::TemporaryReferenceSet,
    config::ClientConfig,
    elements::{Element, Elements, ElementsPromise},
    error::RscError,
    fetch::{FetchFn, ReqwestFetch, RscParams, RscRequest, RscResponse},
    root::{ElementsContext, Root, ServerRoot, Slot, SlotOutput},
    store::{FetchInput, FetchRscStore, Unregister},
};

pub type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;
