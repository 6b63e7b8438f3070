use std::{future::Future, sync::Arc};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared, try_join},
};
use serde_json::Value;

use crate::{FxIndexMap, error::RscError};

/// Reserved key carrying the return value of a server function call.
pub const VALUE_KEY: &str = "_value";

/// A renderable value produced by the server.
pub type Element = Value;

/// Elements by slot id. A `None` value is present but undefined, which is an
/// authoring error on the server side.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Elements(FxIndexMap<String, Option<Element>>);

/// Elements that may still be in flight. Cloning shares the underlying
/// request.
pub type ElementsPromise = Shared<BoxFuture<'static, Result<Arc<Elements>, RscError>>>;

impl Elements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Option<Element>> {
        self.0.get(id)
    }

    pub fn contains_key(&self, id: &str) -> bool {
        self.0.contains_key(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, element: Option<Element>) {
        self.0.insert(id.into(), element);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Option<Element>)> {
        self.0.iter()
    }

    /// Shallow merge: ids in `patch` override ids in `self`. The reserved
    /// `_value` id never survives a merge.
    pub fn merge(&self, patch: &Elements) -> Elements {
        let mut merged = self.0.clone();
        for (id, element) in &patch.0 {
            merged.insert(id.clone(), element.clone());
        }
        merged.shift_remove(VALUE_KEY);
        Elements(merged)
    }

    /// Separates the server function return value from the elements patch.
    pub fn split_value(mut self) -> (Option<Value>, Elements) {
        let value = self.0.shift_remove(VALUE_KEY).flatten();
        (value, self)
    }
}

impl FromIterator<(String, Option<Element>)> for Elements {
    fn from_iter<T: IntoIterator<Item = (String, Option<Element>)>>(iter: T) -> Self {
        Elements(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[(&str, Element); N]> for Elements {
    fn from(elements: [(&str, Element); N]) -> Self {
        elements
            .into_iter()
            .map(|(id, element)| (id.to_string(), Some(element)))
            .collect()
    }
}

pub fn elements_promise<F>(future: F) -> ElementsPromise
where
    F: Future<Output = Result<Elements, RscError>> + Send + 'static,
{
    future.map(|result| result.map(Arc::new)).boxed().shared()
}

pub fn ready_elements(elements: Elements) -> ElementsPromise {
    futures::future::ready(Ok(Arc::new(elements)))
        .boxed()
        .shared()
}

/// Resolves to `a` merged with `b`, failing if either fails.
pub fn merge_elements_promise(a: ElementsPromise, b: ElementsPromise) -> ElementsPromise {
    try_join(a, b)
        .map(|result| result.map(|(a, b)| Arc::new(a.merge(&b))))
        .boxed()
        .shared()
}
