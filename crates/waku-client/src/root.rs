use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;

use crate::{
    elements::{
        Element, Elements, ElementsPromise, elements_promise, merge_elements_promise,
    },
    error::RscError,
    fetch::{FetchFn, RscParams},
    store::FetchRscStore,
};

/// Gives [`Slot`]s access to the live elements.
pub trait ElementsContext: Send + Sync {
    fn elements_promise(&self) -> Result<ElementsPromise, RscError>;
}

/// Mounts a store: fetches the initial elements and owns the refetch entry
/// point.
#[derive(Clone)]
pub struct Root {
    store: FetchRscStore,
}

impl Root {
    pub fn new(
        store: FetchRscStore,
        initial_rsc_path: Option<&str>,
        initial_rsc_params: Option<RscParams>,
    ) -> Self {
        let elements = store.fetch_rsc(initial_rsc_path.unwrap_or_default(), initial_rsc_params);
        store.set_elements(move |_| elements);
        Self { store }
    }

    pub fn store(&self) -> &FetchRscStore {
        &self.store
    }

    pub fn elements(&self) -> Option<ElementsPromise> {
        self.store.elements()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ElementsPromise>> {
        self.store.subscribe()
    }

    /// Fetches `rsc_path` bypassing the live entry and merges the result into
    /// the live tree. A failed refetch leaves the tree untouched and is
    /// reported to the caller only.
    pub async fn refetch(
        &self,
        rsc_path: &str,
        rsc_params: Option<RscParams>,
    ) -> Result<Arc<Elements>, RscError> {
        self.refetch_with(rsc_path, rsc_params, |fetch_fn| fetch_fn)
            .await
    }

    /// [`refetch`](Self::refetch) through a store view whose fetch function
    /// is `enhance(current)`.
    #[tracing::instrument(level = tracing::Level::DEBUG, skip(self, rsc_params, enhance))]
    pub async fn refetch_with<E>(
        &self,
        rsc_path: &str,
        rsc_params: Option<RscParams>,
        enhance: E,
    ) -> Result<Arc<Elements>, RscError>
    where
        E: FnOnce(Arc<dyn FetchFn>) -> Arc<dyn FetchFn>,
    {
        let store = self.store.enhance_fetch_fn(enhance);
        store.clear_entry();
        let data = store.fetch_rsc(rsc_path, rsc_params);
        let without_errors = elements_promise(data.clone().map(|result| {
            Ok(result
                .map(Arc::unwrap_or_clone)
                .unwrap_or_default())
        }));
        store.set_elements(|current| match current {
            Some(current) => merge_elements_promise(current, without_errors),
            None => without_errors,
        });
        data.await
    }
}

impl ElementsContext for Root {
    fn elements_promise(&self) -> Result<ElementsPromise, RscError> {
        self.store.elements().ok_or(RscError::MissingRoot)
    }
}

/// Root for server rendering. Serves elements that were already produced on
/// the server and never fetches.
#[derive(Clone)]
pub struct ServerRoot {
    elements: ElementsPromise,
}

impl ServerRoot {
    pub fn new(elements: ElementsPromise) -> Self {
        Self { elements }
    }
}

impl ElementsContext for ServerRoot {
    fn elements_promise(&self) -> Result<ElementsPromise, RscError> {
        Ok(self.elements.clone())
    }
}

/// Renders one element of the live tree by id.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Slot {
    pub id: String,
    /// Passed through to the element, which may render them as its own
    /// children.
    pub children: Option<Element>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SlotOutput {
    pub element: Element,
    pub children: Option<Element>,
}

impl Slot {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_children(mut self, children: Element) -> Self {
        self.children = Some(children);
        self
    }

    /// Waits for the elements of `context` and picks this slot's element.
    /// Rendering outside of a root fails with [`RscError::MissingRoot`].
    pub async fn render(
        &self,
        context: Option<&dyn ElementsContext>,
    ) -> Result<SlotOutput, RscError> {
        let elements = context.ok_or(RscError::MissingRoot)?.elements_promise()?.await?;
        let element = match elements.get(&self.id) {
            Some(Some(element)) => element.clone(),
            Some(None) => return Err(RscError::UndefinedElement(self.id.clone())),
            None => return Err(RscError::InvalidElement(self.id.clone())),
        };
        Ok(SlotOutput {
            element,
            children: self.children.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::elements::ready_elements;

    fn server_root() -> ServerRoot {
        let mut elements = Elements::from([("a", json!("A")), ("empty", json!(null))]);
        elements.insert("undefined", None);
        ServerRoot::new(ready_elements(elements))
    }

    #[tokio::test]
    async fn test_slot_renders_element() {
        let root = server_root();
        let output = Slot::new("a")
            .with_children(json!("child"))
            .render(Some(&root))
            .await
            .unwrap();
        assert_eq!(output.element, json!("A"));
        assert_eq!(output.children, Some(json!("child")));

        let output = Slot::new("empty").render(Some(&root)).await.unwrap();
        assert_eq!(output.element, json!(null));
    }

    #[tokio::test]
    async fn test_slot_errors() {
        let root = server_root();
        let err = Slot::new("missing").render(Some(&root)).await.unwrap_err();
        assert_eq!(err.to_string(), "Invalid element: missing");

        let err = Slot::new("undefined").render(Some(&root)).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Element cannot be undefined, use null instead: undefined"
        );

        let err = Slot::new("a").render(None).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing Root component");
    }
}
