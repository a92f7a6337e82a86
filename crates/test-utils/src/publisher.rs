//! Scriptable in-memory map server.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use geoserver_client::{AttributeHints, PublishBackend, ServiceKind};
use layer_common::{PublishError, PublishResult};

/// One call observed by [`FakePublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateWorkspace(String),
    PublishRaster { name: String, artifact: String },
    PublishVector { name: String, artifact: String },
    ListLayers,
    DeleteLayer(String),
}

#[derive(Default)]
struct State {
    layers: BTreeSet<String>,
    calls: Vec<Call>,
    workspace_script: VecDeque<PublishResult<()>>,
    publish_failures: HashMap<String, PublishError>,
    delete_failures: HashMap<String, PublishError>,
    list_failure: Option<PublishError>,
    in_flight: HashMap<String, usize>,
    max_in_flight_per_name: usize,
}

/// In-memory [`PublishBackend`] with scripted failures and a call log.
///
/// `create_workspace` pops results from a script and succeeds once the
/// script is exhausted. Publish and delete fail for names registered with
/// [`fail_publish`](Self::fail_publish) / [`fail_delete`](Self::fail_delete).
pub struct FakePublisher {
    workspace: String,
    public_url: String,
    publish_delay: Option<Duration>,
    state: Mutex<State>,
}

impl Default for FakePublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePublisher {
    pub fn new() -> Self {
        Self {
            workspace: "escap_climate".to_string(),
            public_url: "http://maps.test/geoserver".to_string(),
            publish_delay: None,
            state: Mutex::new(State::default()),
        }
    }

    /// Start with these layers already registered.
    pub fn with_layers<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state
            .lock()
            .unwrap()
            .layers
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// Hold every publish for `delay` before completing it.
    pub fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = Some(delay);
        self
    }

    /// Results returned by successive `create_workspace` calls.
    pub fn script_workspace<I>(&self, results: I)
    where
        I: IntoIterator<Item = PublishResult<()>>,
    {
        self.state.lock().unwrap().workspace_script.extend(results);
    }

    pub fn fail_publish(&self, name: &str, err: PublishError) {
        self.state
            .lock()
            .unwrap()
            .publish_failures
            .insert(name.to_string(), err);
    }

    pub fn fail_delete(&self, name: &str, err: PublishError) {
        self.state
            .lock()
            .unwrap()
            .delete_failures
            .insert(name.to_string(), err);
    }

    pub fn fail_list(&self, err: PublishError) {
        self.state.lock().unwrap().list_failure = Some(err);
    }

    /// Registered layer names, sorted.
    pub fn layer_names(&self) -> Vec<String> {
        self.state.lock().unwrap().layers.iter().cloned().collect()
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.state.lock().unwrap().layers.contains(name)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn create_workspace_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::CreateWorkspace(_)))
    }

    pub fn publish_calls(&self) -> usize {
        self.count(|c| matches!(c, Call::PublishRaster { .. } | Call::PublishVector { .. }))
    }

    /// Names passed to `delete_layer`, in call order.
    pub fn deleted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::DeleteLayer(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    /// Highest number of overlapping publish/delete calls seen on one name.
    pub fn max_in_flight_per_name(&self) -> usize {
        self.state.lock().unwrap().max_in_flight_per_name
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    fn enter(&self, name: &str, call: Call) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        let n = state.in_flight.entry(name.to_string()).or_insert(0);
        *n += 1;
        let n = *n;
        state.max_in_flight_per_name = state.max_in_flight_per_name.max(n);
    }

    fn leave(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(n) = state.in_flight.get_mut(name) {
            *n -= 1;
        }
    }

    async fn publish(&self, name: &str, call: Call) -> PublishResult<()> {
        self.enter(name, call);
        if let Some(delay) = self.publish_delay {
            tokio::time::sleep(delay).await;
        }

        let result = {
            let mut state = self.state.lock().unwrap();
            match state.publish_failures.get(name) {
                Some(err) => Err(err.clone()),
                None => {
                    state.layers.insert(name.to_string());
                    Ok(())
                }
            }
        };
        self.leave(name);
        result
    }
}

#[async_trait]
impl PublishBackend for FakePublisher {
    fn workspace(&self) -> &str {
        &self.workspace
    }

    async fn create_workspace(&self, name: &str) -> PublishResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::CreateWorkspace(name.to_string()));
        state.workspace_script.pop_front().unwrap_or(Ok(()))
    }

    async fn publish_raster(
        &self,
        external_name: &str,
        artifact_path: &str,
        _classification: Option<&serde_json::Value>,
    ) -> PublishResult<()> {
        let call = Call::PublishRaster {
            name: external_name.to_string(),
            artifact: artifact_path.to_string(),
        };
        self.publish(external_name, call).await
    }

    async fn publish_vector(
        &self,
        external_name: &str,
        artifact_path: &str,
        _hints: &AttributeHints,
    ) -> PublishResult<()> {
        let call = Call::PublishVector {
            name: external_name.to_string(),
            artifact: artifact_path.to_string(),
        };
        self.publish(external_name, call).await
    }

    async fn list_layer_names(&self) -> PublishResult<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::ListLayers);
        if let Some(err) = &state.list_failure {
            return Err(err.clone());
        }
        Ok(state.layers.iter().cloned().collect())
    }

    async fn delete_layer(&self, external_name: &str) -> PublishResult<()> {
        self.enter(external_name, Call::DeleteLayer(external_name.to_string()));
        let result = {
            let mut state = self.state.lock().unwrap();
            match state.delete_failures.get(external_name) {
                Some(err) if !err.is_not_found() => Err(err.clone()),
                _ => {
                    state.layers.remove(external_name);
                    Ok(())
                }
            }
        };
        self.leave(external_name);
        result
    }

    fn service_url(&self, kind: ServiceKind, external_name: &str) -> String {
        let service = match kind {
            ServiceKind::Wms => "wms",
            ServiceKind::Wfs => "wfs",
        };
        format!(
            "{}/{}/{}?layers={}:{}",
            self.public_url, self.workspace, service, self.workspace, external_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_workspace_script() {
        let fake = FakePublisher::new();
        fake.script_workspace([Err(PublishError::unreachable("down")), Ok(())]);
        assert!(fake.create_workspace("ws").await.is_err());
        assert!(fake.create_workspace("ws").await.is_ok());
        assert!(fake.create_workspace("ws").await.is_ok());
        assert_eq!(fake.create_workspace_calls(), 3);
    }

    #[tokio::test]
    async fn test_publish_and_delete() {
        let fake = FakePublisher::new().with_layers(["laos_boundary"]);
        fake.publish_raster("laos_temp_rcp45", "/cog.tif", None)
            .await
            .unwrap();
        assert!(fake.has_layer("laos_temp_rcp45"));

        fake.delete_layer("laos_boundary").await.unwrap();
        fake.delete_layer("laos_boundary").await.unwrap();
        assert_eq!(fake.layer_names(), vec!["laos_temp_rcp45".to_string()]);
        assert_eq!(fake.deleted().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let fake = FakePublisher::new().with_layers(["a"]);
        fake.fail_delete("a", PublishError::rejected("locked"));
        fake.fail_publish("b", PublishError::rejected("bad tiff"));
        assert!(fake.delete_layer("a").await.is_err());
        assert!(fake.has_layer("a"));
        assert!(fake.publish_raster("b", "/b.tif", None).await.is_err());
        assert!(!fake.has_layer("b"));
    }
}
