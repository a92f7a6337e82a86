//! GeoServer REST implementation of [`PublishBackend`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, info, instrument, warn};

use layer_common::{PublishError, PublishResult};

use crate::backend::{ArtifactSource, AttributeHints, PublishBackend, ServiceKind};
use crate::rest::{self, is_already_exists, status_error, transport_error};
use crate::style;

/// Connection settings for the GeoServer instance.
#[derive(Debug, Clone)]
pub struct GeoServerConfig {
    /// Base URL used for REST calls, e.g. `http://geoserver:8080/geoserver`
    pub base_url: String,
    /// Base URL handed to browsers in WMS/WFS links
    pub public_url: String,
    pub username: String,
    pub password: String,
    /// Workspace every layer is published into
    pub workspace: String,
    /// Shared PostGIS datastore for `postgis:` artifacts
    pub datastore: String,
    /// Timeout for publish and delete calls
    pub publish_timeout: Duration,
    /// Timeout for probes and listings
    pub probe_timeout: Duration,
}

impl Default for GeoServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/geoserver".to_string(),
            public_url: "http://localhost:8080/geoserver".to_string(),
            username: "admin".to_string(),
            password: "geoserver".to_string(),
            workspace: "escap_climate".to_string(),
            datastore: "postgis".to_string(),
            publish_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Proxied OWS response.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// GeoServer REST client.
///
/// Each call is a single HTTP exchange (or a short fixed sequence for
/// publishes); failures are classified and returned, never retried.
#[derive(Clone)]
pub struct GeoServerClient {
    client: Client,
    config: GeoServerConfig,
}

impl GeoServerClient {
    pub fn new(config: GeoServerConfig) -> PublishResult<Self> {
        let client = Client::builder()
            .connect_timeout(config.probe_timeout)
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| PublishError::rejected(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &GeoServerConfig {
        &self.config
    }

    fn rest_url(&self, path: &str) -> String {
        format!(
            "{}/rest/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str, timeout: Duration) -> RequestBuilder {
        self.client
            .request(method, self.rest_url(path))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(timeout)
    }

    /// Send a request and classify anything but 2xx as an error.
    async fn send(&self, operation: &str, request: RequestBuilder) -> PublishResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(operation, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(status_error(status, operation, &body))
    }

    /// Whether a REST resource exists. 404 means no; other failures propagate.
    async fn exists(&self, operation: &str, path: &str) -> PublishResult<bool> {
        let request = self.request(Method::GET, path, self.config.probe_timeout);
        match self.send(operation, request).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Upload an SLD for the layer and make it the default style.
    async fn apply_raster_style(
        &self,
        external_name: &str,
        classification: &serde_json::Value,
    ) -> PublishResult<()> {
        let Some(classes) = style::parse_classification(classification) else {
            debug!(layer = %external_name, "Classification has no usable classes, keeping default style");
            return Ok(());
        };

        let ws = &self.config.workspace;
        let style_name = style::style_name(external_name);
        let sld = style::build_raster_sld(&style_name, &classes);
        let timeout = self.config.publish_timeout;

        let create = self
            .request(
                Method::POST,
                &format!("workspaces/{}/styles?name={}", ws, style_name),
                timeout,
            )
            .header(reqwest::header::CONTENT_TYPE, "application/vnd.ogc.sld+xml")
            .body(sld.clone());

        match self.send("create style", create).await {
            Ok(_) => {}
            Err(e) if is_already_exists(&e) => {
                let update = self
                    .request(
                        Method::PUT,
                        &format!("workspaces/{}/styles/{}", ws, style_name),
                        timeout,
                    )
                    .header(reqwest::header::CONTENT_TYPE, "application/vnd.ogc.sld+xml")
                    .body(sld);
                self.send("update style", update).await?;
            }
            Err(e) => return Err(e),
        }

        let assign = self
            .request(
                Method::PUT,
                &format!("workspaces/{}/layers/{}", ws, external_name),
                timeout,
            )
            .json(&rest::default_style_body(ws, &style_name));
        self.send("assign style", assign).await?;

        debug!(layer = %external_name, style = %style_name, classes = classes.len(), "Applied raster style");
        Ok(())
    }

    /// Create or update the feature type for a vector layer.
    async fn upsert_feature_type(
        &self,
        store: &str,
        external_name: &str,
        native_name: &str,
        hints: &AttributeHints,
    ) -> PublishResult<()> {
        let ws = &self.config.workspace;
        let body = rest::feature_type_body(external_name, native_name, &hints.keywords());
        let timeout = self.config.publish_timeout;

        let existing = format!(
            "workspaces/{}/datastores/{}/featuretypes/{}",
            ws, store, external_name
        );
        if self
            .exists("lookup feature type", &format!("{}.json", existing))
            .await?
        {
            let update = self
                .request(Method::PUT, &format!("{}?recalculate=nativebbox,latlonbbox", existing), timeout)
                .json(&body);
            self.send("update feature type", update).await?;
        } else {
            let create = self
                .request(
                    Method::POST,
                    &format!("workspaces/{}/datastores/{}/featuretypes", ws, store),
                    timeout,
                )
                .json(&body);
            self.send("create feature type", create).await?;
        }
        Ok(())
    }

    /// Best-effort removal of the store a layer was backed by.
    async fn delete_store(&self, kind: &str, name: &str) {
        let path = format!(
            "workspaces/{}/{}/{}?recurse=true",
            self.config.workspace, kind, name
        );
        let request = self.request(Method::DELETE, &path, self.config.publish_timeout);
        match self.send("delete store", request).await {
            Ok(_) => debug!(store = %name, kind = %kind, "Deleted backing store"),
            Err(e) if e.is_not_found() => {}
            Err(e) => warn!(store = %name, kind = %kind, error = %e, "Failed to delete backing store"),
        }
    }

    /// Forward a GET to the public OWS endpoints of a workspace.
    pub async fn proxy_get(
        &self,
        workspace: &str,
        path: &str,
        query: Option<&str>,
    ) -> PublishResult<ProxyResponse> {
        let mut url = format!(
            "{}/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            workspace,
            path.trim_start_matches('/')
        );
        if let Some(q) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(q);
        }

        let response = self
            .client
            .get(&url)
            .timeout(self.config.publish_timeout)
            .send()
            .await
            .map_err(|e| transport_error("proxy", &e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| transport_error("proxy", &e))?
            .to_vec();

        Ok(ProxyResponse {
            status,
            content_type,
            body,
        })
    }
}

#[async_trait]
impl PublishBackend for GeoServerClient {
    fn workspace(&self) -> &str {
        &self.config.workspace
    }

    #[instrument(skip(self))]
    async fn create_workspace(&self, name: &str) -> PublishResult<()> {
        if self
            .exists("probe workspace", &format!("workspaces/{}.json", name))
            .await?
        {
            debug!(workspace = %name, "Workspace already exists");
            return Ok(());
        }

        let request = self
            .request(Method::POST, "workspaces", self.config.probe_timeout)
            .json(&rest::workspace_body(name));
        match self.send("create workspace", request).await {
            Ok(_) => {
                info!(workspace = %name, "Created workspace");
                Ok(())
            }
            Err(e) if is_already_exists(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, classification))]
    async fn publish_raster(
        &self,
        external_name: &str,
        artifact_path: &str,
        classification: Option<&serde_json::Value>,
    ) -> PublishResult<()> {
        let ws = &self.config.workspace;
        let path = format!(
            "workspaces/{}/coveragestores/{}/external.geotiff?configure=first&coverageName={}",
            ws, external_name, external_name
        );
        let request = self
            .request(Method::PUT, &path, self.config.publish_timeout)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .body(format!("file:{}", artifact_path));
        self.send("publish raster", request).await?;

        if let Some(classification) = classification {
            self.apply_raster_style(external_name, classification).await?;
        }

        info!(layer = %external_name, "Published raster layer");
        Ok(())
    }

    #[instrument(skip(self, hints))]
    async fn publish_vector(
        &self,
        external_name: &str,
        artifact_path: &str,
        hints: &AttributeHints,
    ) -> PublishResult<()> {
        let source = ArtifactSource::parse(artifact_path)?;
        let native_name = source.native_name();
        let ws = &self.config.workspace;
        let timeout = self.config.publish_timeout;

        let store = match &source {
            ArtifactSource::PostgisTable(_) => self.config.datastore.clone(),
            ArtifactSource::Shapefile(path) => {
                let request = self
                    .request(
                        Method::PUT,
                        &format!(
                            "workspaces/{}/datastores/{}/external.shp?configure=none",
                            ws, external_name
                        ),
                        timeout,
                    )
                    .header(reqwest::header::CONTENT_TYPE, "text/plain")
                    .body(format!("file://{}", path));
                self.send("create shapefile store", request).await?;
                external_name.to_string()
            }
            ArtifactSource::ZippedShapefile(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    PublishError::rejected(format!("cannot read artifact {}: {}", path, e))
                })?;
                let request = self
                    .request(
                        Method::PUT,
                        &format!(
                            "workspaces/{}/datastores/{}/file.shp?configure=none",
                            ws, external_name
                        ),
                        timeout,
                    )
                    .header(reqwest::header::CONTENT_TYPE, "application/zip")
                    .body(bytes);
                self.send("upload shapefile", request).await?;
                external_name.to_string()
            }
        };

        self.upsert_feature_type(&store, external_name, &native_name, hints)
            .await?;

        info!(layer = %external_name, store = %store, native = %native_name, "Published vector layer");
        Ok(())
    }

    async fn list_layer_names(&self) -> PublishResult<Vec<String>> {
        let path = format!("workspaces/{}/layers.json", self.config.workspace);
        let request = self.request(Method::GET, &path, self.config.probe_timeout);

        let response = match self.send("list layers", request).await {
            Ok(response) => response,
            // Workspace not created yet
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let body = response
            .text()
            .await
            .map_err(|e| transport_error("list layers", &e))?;
        rest::parse_layer_list(&body)
    }

    #[instrument(skip(self))]
    async fn delete_layer(&self, external_name: &str) -> PublishResult<()> {
        let path = format!(
            "workspaces/{}/layers/{}?recurse=true",
            self.config.workspace, external_name
        );
        let request = self.request(Method::DELETE, &path, self.config.publish_timeout);
        match self.send("delete layer", request).await {
            Ok(_) => info!(layer = %external_name, "Deleted layer"),
            Err(e) if e.is_not_found() => debug!(layer = %external_name, "Layer already absent"),
            Err(e) => return Err(e),
        }

        self.delete_store("coveragestores", external_name).await;
        if external_name != self.config.datastore {
            self.delete_store("datastores", external_name).await;
        }
        Ok(())
    }

    fn service_url(&self, kind: ServiceKind, external_name: &str) -> String {
        let base = self.config.public_url.trim_end_matches('/');
        let ws = &self.config.workspace;
        match kind {
            ServiceKind::Wms => format!(
                "{}/{}/wms?service=WMS&version=1.1.0&request=GetMap&layers={}:{}",
                base, ws, ws, external_name
            ),
            ServiceKind::Wfs => format!(
                "{}/{}/ows?service=WFS&version=1.0.0&request=GetFeature&typeName={}:{}&outputFormat=application/json",
                base, ws, ws, external_name
            ),
        }
    }
}
