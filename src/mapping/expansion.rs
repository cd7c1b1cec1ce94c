//! Element expansion: data element → category combo → option combos → names.

use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::error::MigratorResult;
use crate::models::is_qualified;
use crate::remote::RemoteApi;

/// One `(element, categoryOptionCombo)` pair with the combo's display name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComboCandidate {
    pub element: String,
    pub combo: String,
    pub name: String,
}

impl ComboCandidate {
    pub fn new(element: impl Into<String>, combo: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            combo: combo.into(),
            name: name.into(),
        }
    }

    /// `element.combo`
    pub fn qualified_id(&self) -> String {
        format!("{}.{}", self.element, self.combo)
    }
}

fn fields(selector: &str) -> Vec<(String, String)> {
    vec![("fields".to_string(), selector.to_string())]
}

fn nested_id<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key)?.get("id")?.as_str()
}

async fn combo_name(
    api: &dyn RemoteApi,
    combo: &str,
    timeout: Duration,
) -> MigratorResult<String> {
    let record = api
        .get_json(
            &format!("api/categoryOptionCombos/{combo}"),
            &fields("id,name"),
            Some(timeout),
        )
        .await?;
    Ok(record
        .as_ref()
        .and_then(|r| r.get("name"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string())
}

/// Expand `id` into its option-combo candidates on `api`
///
/// A qualified id yields exactly one candidate. An element that does not
/// exist, or has no category combo, yields none.
pub async fn expand_element(
    api: &dyn RemoteApi,
    id: &str,
    timeout: Duration,
    concurrency: usize,
) -> MigratorResult<Vec<ComboCandidate>> {
    if is_qualified(id) {
        let (element, combo) = id.split_once('.').unwrap_or((id, ""));
        let name = combo_name(api, combo, timeout).await?;
        return Ok(vec![ComboCandidate::new(element, combo, name)]);
    }

    let Some(element) = api
        .get_json(
            &format!("api/dataElements/{id}"),
            &fields("categoryCombo[id]"),
            Some(timeout),
        )
        .await?
    else {
        debug!(element = %id, instance = %api.base_url(), "Element not found, left bare");
        return Ok(Vec::new());
    };
    let Some(category_combo) = nested_id(&element, "categoryCombo") else {
        return Ok(Vec::new());
    };

    let Some(combo) = api
        .get_json(
            &format!("api/categoryCombos/{category_combo}"),
            &fields("categoryOptionCombos[id]"),
            Some(timeout),
        )
        .await?
    else {
        return Ok(Vec::new());
    };
    let option_combos: Vec<String> = combo
        .get("categoryOptionCombos")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|c| c.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let names: Vec<_> = stream::iter(&option_combos)
        .map(|combo| combo_name(api, combo, timeout))
        .buffered(concurrency.max(1))
        .collect()
        .await;

    option_combos
        .into_iter()
        .zip(names)
        .map(|(combo, name)| Ok(ComboCandidate::new(id, combo, name?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{QueryParams, RemoteResult};
    use crate::test_helpers::FakeRemoteApi;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Delays every read and remembers the most reads in flight at once
    #[derive(Debug)]
    struct SlowApi {
        inner: Arc<FakeRemoteApi>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl RemoteApi for SlowApi {
        fn base_url(&self) -> &str {
            self.inner.base_url()
        }

        async fn get_json(
            &self,
            path: &str,
            query: &QueryParams,
            timeout: Option<Duration>,
        ) -> RemoteResult<Option<Value>> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            let result = self.inner.get_json(path, query, timeout).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn post_json(&self, path: &str, query: &QueryParams, body: &Value) -> RemoteResult<Value> {
            self.inner.post_json(path, query, body).await
        }

        async fn put_json(&self, path: &str, body: &Value) -> RemoteResult<Value> {
            self.inner.put_json(path, body).await
        }

        async fn delete(&self, path: &str) -> RemoteResult<()> {
            self.inner.delete(path).await
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_expands_through_category_combo() {
        let api = FakeRemoteApi::new("https://src");
        api.set_resource("api/dataElements/de1", json!({"categoryCombo": {"id": "cc1"}}));
        api.set_resource(
            "api/categoryCombos/cc1",
            json!({"categoryOptionCombos": [{"id": "m"}, {"id": "f"}]}),
        );
        api.set_resource("api/categoryOptionCombos/m", json!({"id": "m", "name": "Male"}));
        api.set_resource("api/categoryOptionCombos/f", json!({"id": "f", "name": "Female"}));

        let candidates = expand_element(api.as_ref(), "de1", TIMEOUT, 5).await.unwrap();
        assert_eq!(
            candidates,
            vec![
                ComboCandidate::new("de1", "m", "Male"),
                ComboCandidate::new("de1", "f", "Female"),
            ]
        );
        assert_eq!(candidates[0].qualified_id(), "de1.m");
    }

    #[tokio::test]
    async fn test_option_combo_lookups_are_bounded() {
        let inner = FakeRemoteApi::new("https://src");
        inner.set_resource("api/dataElements/de1", json!({"categoryCombo": {"id": "cc1"}}));
        let combos: Vec<String> = (0..12).map(|i| format!("c{i}")).collect();
        inner.set_resource(
            "api/categoryCombos/cc1",
            json!({"categoryOptionCombos": combos.iter().map(|id| json!({"id": id})).collect::<Vec<_>>()}),
        );
        for id in &combos {
            inner.set_resource(
                &format!("api/categoryOptionCombos/{id}"),
                json!({"id": id, "name": format!("Name {id}")}),
            );
        }
        let api = SlowApi {
            inner,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        };

        let candidates = expand_element(&api, "de1", TIMEOUT, 3).await.unwrap();

        assert_eq!(candidates.len(), 12);
        assert_eq!(candidates[11], ComboCandidate::new("de1", "c11", "Name c11"));
        assert!(api.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_missing_element_expands_to_nothing() {
        let api = FakeRemoteApi::new("https://src");
        assert!(expand_element(api.as_ref(), "ind1", TIMEOUT, 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_qualified_id_is_single_candidate() {
        let api = FakeRemoteApi::new("https://src");
        api.set_resource("api/categoryOptionCombos/coc", json!({"name": "Under 5"}));
        let candidates = expand_element(api.as_ref(), "de.coc", TIMEOUT, 5).await.unwrap();
        assert_eq!(candidates, vec![ComboCandidate::new("de", "coc", "Under 5")]);
    }
}
