//! The fetch store: the single piece of mutable state shared by a mounted
//! [`Root`](crate::Root), its refetches and server function calls.
//!
//! A store holds at most one live entry, the most recent `(rscPath,
//! rscParams)` request and its elements. Fetching the same pair again returns
//! that entry; any other pair supersedes it. Superseded requests are not
//! cancelled, their results are just never linked back into the store.
//!
//! Patches from concurrent server function calls are merged over whatever the
//! live tree resolves to when they arrive, so their relative order is not
//! preserved.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;

use crate::{
    FxIndexMap,
    codec::{TemporaryReferenceSet, decode_elements, encode_reply},
    config::ClientConfig,
    elements::{
        Elements, ElementsPromise, elements_promise, merge_elements_promise, ready_elements,
    },
    error::RscError,
    fetch::{FetchFn, RscParams, RscRequest, RscResponse, check_status},
    rsc_path::{encode_func_id, encode_rsc_path},
};

type ResponsePromise = Shared<BoxFuture<'static, Result<RscResponse, RscError>>>;

/// Input of a fetch, as seen and rewritten by input transformers.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchInput {
    pub rsc_path: String,
    pub rsc_params: Option<RscParams>,
    pub prefetch_only: bool,
}

type InputTransformer = Arc<dyn Fn(FetchInput) -> FetchInput + Send + Sync>;
type ElementsListener = Arc<dyn Fn(&Elements) + Send + Sync>;

/// Removes what a `register_*` call added. Dropping it without calling keeps
/// the registration.
pub type Unregister = Box<dyn FnOnce() + Send + Sync>;

struct Entry {
    rsc_path: String,
    rsc_params: Option<RscParams>,
    elements: ElementsPromise,
}

enum PrefetchedEntry {
    /// Embedded in the HTML document for hydration. Adopted regardless of
    /// params.
    Html(ResponsePromise),
    Prefetch {
        response: ResponsePromise,
        rsc_params: Option<RscParams>,
        temporary_references: TemporaryReferenceSet,
    },
}

#[derive(Clone)]
struct ReloadTarget {
    rsc_path: String,
    rsc_params: Option<RscParams>,
    fetch_fn: Arc<dyn FetchFn>,
}

struct StoreState {
    config: ClientConfig,
    entry: Mutex<Option<Entry>>,
    prefetched: Mutex<FxIndexMap<String, PrefetchedEntry>>,
    input_transformers: Mutex<FxIndexMap<u64, InputTransformer>>,
    elements_listeners: Mutex<FxIndexMap<u64, ElementsListener>>,
    next_registration: AtomicU64,
    /// The live element tree of the mounted root.
    elements: watch::Sender<Option<ElementsPromise>>,
    reload: Mutex<Option<ReloadTarget>>,
}

/// Shared fetch state plus the fetch function of this view.
///
/// Clones and views derived with [`FetchRscStore::enhance_fetch_fn`] share
/// the same entry, prefetch cache, registrations and live tree.
#[derive(Clone)]
pub struct FetchRscStore {
    state: Arc<StoreState>,
    fetch_fn: Arc<dyn FetchFn>,
}

impl FetchRscStore {
    pub fn new(config: ClientConfig, fetch_fn: impl FetchFn + 'static) -> Self {
        Self::with_fetch_fn(config, Arc::new(fetch_fn))
    }

    pub fn with_fetch_fn(config: ClientConfig, fetch_fn: Arc<dyn FetchFn>) -> Self {
        let (elements, _) = watch::channel(None);
        Self {
            state: Arc::new(StoreState {
                config,
                entry: Default::default(),
                prefetched: Default::default(),
                input_transformers: Default::default(),
                elements_listeners: Default::default(),
                next_registration: AtomicU64::new(0),
                elements,
                reload: Default::default(),
            }),
            fetch_fn,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.state.config
    }

    pub fn fetch_fn(&self) -> &Arc<dyn FetchFn> {
        &self.fetch_fn
    }

    /// A view of this store whose requests go through
    /// `enhance(current fetch function)`.
    pub fn enhance_fetch_fn<E>(&self, enhance: E) -> FetchRscStore
    where
        E: FnOnce(Arc<dyn FetchFn>) -> Arc<dyn FetchFn>,
    {
        FetchRscStore {
            state: self.state.clone(),
            fetch_fn: enhance(self.fetch_fn.clone()),
        }
    }

    fn next_registration(&self) -> u64 {
        self.state.next_registration.fetch_add(1, Ordering::Relaxed)
    }

    /// Transformers run in registration order on every fetch and prefetch.
    pub fn register_fetch_rsc_input_transformer<T>(&self, transformer: T) -> Unregister
    where
        T: Fn(FetchInput) -> FetchInput + Send + Sync + 'static,
    {
        let id = self.next_registration();
        self.state
            .input_transformers
            .lock()
            .insert(id, Arc::new(transformer));
        let state = self.state.clone();
        Box::new(move || {
            state.input_transformers.lock().shift_remove(&id);
        })
    }

    /// Listeners see every non-empty elements patch returned by a server
    /// function call, before it is merged into the live tree.
    pub fn register_call_server_elements_listener<L>(&self, listener: L) -> Unregister
    where
        L: Fn(&Elements) + Send + Sync + 'static,
    {
        let id = self.next_registration();
        self.state
            .elements_listeners
            .lock()
            .insert(id, Arc::new(listener));
        let state = self.state.clone();
        Box::new(move || {
            state.elements_listeners.lock().shift_remove(&id);
        })
    }

    /// Makes an already started response for `rsc_path` available to the next
    /// fetch, as done for payloads inlined in the HTML document.
    pub fn seed_prefetched<F>(&self, rsc_path: impl Into<String>, response: F)
    where
        F: Future<Output = Result<RscResponse, RscError>> + Send + 'static,
    {
        self.state
            .prefetched
            .lock()
            .insert(rsc_path.into(), PrefetchedEntry::Html(response.boxed().shared()));
    }

    pub fn has_prefetched(&self, rsc_path: &str) -> bool {
        self.state.prefetched.lock().contains_key(rsc_path)
    }

    /// Drops the live entry so the next fetch issues a new request.
    pub fn clear_entry(&self) {
        self.state.entry.lock().take();
    }

    /// The live element tree, if a root is mounted.
    pub fn elements(&self) -> Option<ElementsPromise> {
        self.state.elements.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ElementsPromise>> {
        self.state.elements.subscribe()
    }

    /// Replaces the live tree with `update(current)`.
    pub fn set_elements<U>(&self, update: U)
    where
        U: FnOnce(Option<ElementsPromise>) -> ElementsPromise,
    {
        self.state.elements.send_modify(|current| {
            *current = Some(update(current.take()));
        });
    }

    fn apply_input_transformers(&self, mut input: FetchInput) -> FetchInput {
        let transformers: Vec<InputTransformer> = self
            .state
            .input_transformers
            .lock()
            .values()
            .cloned()
            .collect();
        for transformer in transformers {
            input = transformer(input);
        }
        input
    }

    fn spawn_response(response: &ResponsePromise) {
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(response.clone().map(|_| ()));
        }
    }

    fn request(
        &self,
        rsc_path: &str,
        rsc_params: Option<&RscParams>,
        temporary_references: &TemporaryReferenceSet,
    ) -> ResponsePromise {
        let request = encode_rsc_path(rsc_path).and_then(|encoded| {
            let url = self.state.config.rsc_url(&encoded);
            Ok(match rsc_params {
                None => RscRequest::get(url),
                Some(RscParams::Query(query)) => RscRequest::get(format!("{url}?{query}")),
                Some(RscParams::Value(value)) => {
                    RscRequest::post(url, encode_reply(value, temporary_references)?)
                }
            })
        });
        match request {
            Ok(request) => {
                tracing::debug!(
                    url = %request.url,
                    method = ?request.method,
                    "issuing RSC request"
                );
                self.fetch_fn.fetch(request).shared()
            }
            Err(err) => futures::future::ready(Err(err)).boxed().shared(),
        }
    }

    /// Request construction shared by fetch, prefetch and call-server.
    /// Prefetch responses are parked in the prefetch cache; the returned
    /// elements are only decoded if polled.
    fn fetch_internal(
        &self,
        rsc_path: &str,
        rsc_params: Option<RscParams>,
        prefetch_only: bool,
    ) -> ElementsPromise {
        let FetchInput {
            rsc_path,
            rsc_params,
            prefetch_only,
        } = self.apply_input_transformers(FetchInput {
            rsc_path: rsc_path.to_string(),
            rsc_params,
            prefetch_only,
        });

        let prefetched = self.state.prefetched.lock().shift_remove(&rsc_path);
        let adopted = match prefetched {
            _ if prefetch_only => None,
            Some(PrefetchedEntry::Html(response)) => {
                tracing::debug!(%rsc_path, "adopting response from html");
                Some((response, TemporaryReferenceSet::default()))
            }
            Some(PrefetchedEntry::Prefetch {
                response,
                rsc_params: prefetched_params,
                temporary_references,
            }) => {
                if prefetched_params == rsc_params {
                    tracing::debug!(%rsc_path, "adopting prefetched response");
                    Some((response, temporary_references))
                } else {
                    tracing::debug!(%rsc_path, "discarding prefetched response with other params");
                    None
                }
            }
            None => None,
        };
        let (response, temporary_references) = match adopted {
            Some(adopted) => adopted,
            None => {
                let temporary_references = TemporaryReferenceSet::default();
                let response =
                    self.request(&rsc_path, rsc_params.as_ref(), &temporary_references);
                (response, temporary_references)
            }
        };

        if prefetch_only {
            Self::spawn_response(&response);
            self.state.prefetched.lock().insert(
                rsc_path,
                PrefetchedEntry::Prefetch {
                    response: response.clone(),
                    rsc_params,
                    temporary_references: temporary_references.clone(),
                },
            );
        }
        elements_promise(async move {
            let response = check_status(response.await?)?;
            decode_elements(&response.body, &temporary_references)
        })
    }

    /// Elements for `(rsc_path, rsc_params)`. Returns the live entry when both
    /// match it, otherwise issues a request (or adopts a prefetched one) and
    /// makes it the live entry.
    pub fn fetch_rsc(&self, rsc_path: &str, rsc_params: Option<RscParams>) -> ElementsPromise {
        if self.state.config.hot {
            *self.state.reload.lock() = Some(ReloadTarget {
                rsc_path: rsc_path.to_string(),
                rsc_params: rsc_params.clone(),
                fetch_fn: self.fetch_fn.clone(),
            });
        }

        if let Some(entry) = &*self.state.entry.lock() {
            if entry.rsc_path == rsc_path && entry.rsc_params == rsc_params {
                return entry.elements.clone();
            }
            tracing::debug!(superseded = %entry.rsc_path, "superseding entry");
        }
        let elements = self.fetch_internal(rsc_path, rsc_params.clone(), false);
        *self.state.entry.lock() = Some(Entry {
            rsc_path: rsc_path.to_string(),
            rsc_params,
            elements: elements.clone(),
        });
        elements
    }

    /// Starts a request for a later [`fetch_rsc`](Self::fetch_rsc) to adopt.
    /// A no-op while a prefetch with the same params is pending.
    pub fn prefetch_rsc(&self, rsc_path: &str, rsc_params: Option<RscParams>) {
        if let Some(PrefetchedEntry::Prefetch {
            rsc_params: prefetched_params,
            ..
        }) = self.state.prefetched.lock().get(rsc_path)
            && *prefetched_params == rsc_params
        {
            return;
        }
        let _ = self.fetch_internal(rsc_path, rsc_params, true);
    }

    /// Calls a server function and returns its value. A non-empty elements
    /// patch in the response is handed to the listeners and merged into the
    /// live tree.
    ///
    /// A single query argument is sent as query params, anything else as the
    /// encoded argument list.
    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self, args))]
    pub async fn call_server_rsc(
        &self,
        func_id: &str,
        args: Vec<RscParams>,
    ) -> Result<Option<Value>, RscError> {
        let rsc_path = encode_func_id(func_id)?;
        let rsc_params = match <[RscParams; 1]>::try_from(args) {
            Ok([RscParams::Query(query)]) => RscParams::Query(query),
            Ok([arg]) => RscParams::Value(Value::Array(vec![arg_value(arg)])),
            Err(args) => RscParams::Value(Value::Array(args.into_iter().map(arg_value).collect())),
        };
        let elements = self
            .fetch_internal(&rsc_path, Some(rsc_params), false)
            .await?;
        let (value, patch) = Elements::clone(&elements).split_value();
        if !patch.is_empty() {
            let listeners: Vec<ElementsListener> = self
                .state
                .elements_listeners
                .lock()
                .values()
                .cloned()
                .collect();
            for listener in listeners {
                listener(&patch);
            }
            let patch = ready_elements(patch);
            self.set_elements(|current| match current {
                Some(current) => merge_elements_promise(current, patch),
                None => patch,
            });
        }
        Ok(value)
    }

    /// Refetches the last hot fetch and replaces the live tree with the
    /// result. `None` when hot reloading is off or nothing was fetched yet.
    pub fn reload(&self) -> Option<ElementsPromise> {
        let target = self.state.reload.lock().clone()?;
        tracing::debug!(rsc_path = %target.rsc_path, "reloading");
        self.clear_entry();
        let store = FetchRscStore {
            state: self.state.clone(),
            fetch_fn: target.fetch_fn,
        };
        let elements = store.fetch_rsc(&target.rsc_path, target.rsc_params);
        let live = elements.clone();
        self.set_elements(move |_| live);
        Some(elements)
    }
}

fn arg_value(arg: RscParams) -> Value {
    match arg {
        RscParams::Query(query) => Value::String(query),
        RscParams::Value(value) => value,
    }
}
