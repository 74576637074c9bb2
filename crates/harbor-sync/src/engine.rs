use async_trait::async_trait;
use harbor_core::{EngineRecord, Workload};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine request failed: {0}")]
    Request(String),
    #[error("engine returned status {0}")]
    Status(u16),
    #[error("workload not found: {0}")]
    NotFound(String),
    #[error("engine response did not decode: {0}")]
    Decode(String),
    #[error("bad engine url: {0}")]
    Url(#[from] url::ParseError),
    #[error("engine url scheme {0} is not http or https")]
    Scheme(String),
}

/// HTTP and websocket addresses of the workload engine gateway, derived
/// from one base url. The websocket base carries the ws/wss scheme
/// matching the http one.
#[derive(Debug, Clone)]
pub struct EngineEndpoints {
    http_base: Url,
    ws_base: Url,
}

impl EngineEndpoints {
    pub fn new(base: &str) -> Result<Self, EngineError> {
        let mut http_base = Url::parse(base)?;
        if !http_base.path().ends_with('/') {
            let path = format!("{}/", http_base.path());
            http_base.set_path(&path);
        }
        let ws_scheme = match http_base.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => return Err(EngineError::Scheme(other.to_string())),
        };
        let mut ws_base = http_base.clone();
        ws_base
            .set_scheme(ws_scheme)
            .map_err(|_| EngineError::Scheme(http_base.scheme().to_string()))?;
        Ok(Self { http_base, ws_base })
    }

    pub fn list(&self) -> Result<Url, EngineError> {
        Ok(self.http_base.join("container")?)
    }

    pub fn workload(&self, id: &str) -> Result<Url, EngineError> {
        Ok(self.http_base.join(&format!("container/{id}"))?)
    }

    pub fn command(&self, id: &str, verb: &str) -> Result<Url, EngineError> {
        Ok(self.http_base.join(&format!("container/{id}/{verb}"))?)
    }

    pub fn events(&self) -> Result<Url, EngineError> {
        Ok(self.ws_base.join("ws/container/events")?)
    }

    pub fn logs(&self, id: &str) -> Result<Url, EngineError> {
        Ok(self.ws_base.join(&format!("ws/container/{id}/logs"))?)
    }

    pub fn stats(&self, id: &str) -> Result<Url, EngineError> {
        Ok(self.ws_base.join(&format!("ws/container/{id}/stats"))?)
    }

    pub fn terminal(&self, id: &str) -> Result<Url, EngineError> {
        Ok(self.ws_base.join(&format!("ws/container/{id}/terminal"))?)
    }
}

/// Request surface of the engine gateway. The reconciler and commander
/// depend on this trait so tests can substitute a scripted engine.
#[async_trait]
pub trait EngineApi: Send + Sync + 'static {
    async fn list_workloads(&self) -> Result<Vec<Workload>, EngineError>;
    async fn get_workload(&self, id: &str) -> Result<Workload, EngineError>;
    async fn start_workload(&self, id: &str) -> Result<(), EngineError>;
    async fn stop_workload(&self, id: &str) -> Result<(), EngineError>;
    async fn restart_workload(&self, id: &str) -> Result<(), EngineError>;
    async fn remove_workload(&self, id: &str) -> Result<(), EngineError>;
}

/// Production engine client over reqwest. Lifecycle commands are PUTs
/// with empty bodies; reads decode the engine's record shape and map it
/// into the client model.
pub struct HttpEngine {
    client: reqwest::Client,
    endpoints: EngineEndpoints,
}

impl HttpEngine {
    pub fn new(endpoints: EngineEndpoints) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &EngineEndpoints {
        &self.endpoints
    }

    async fn put_command(&self, id: &str, verb: &str) -> Result<(), EngineError> {
        let endpoint = self.endpoints.command(id, verb)?;
        debug!("engine_command: {verb} id={id}");
        let response = self
            .client
            .put(endpoint)
            .send()
            .await
            .map_err(|err| EngineError::Request(err.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(EngineError::Status(status.as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl EngineApi for HttpEngine {
    async fn list_workloads(&self) -> Result<Vec<Workload>, EngineError> {
        let response = self
            .client
            .get(self.endpoints.list()?)
            .send()
            .await
            .map_err(|err| EngineError::Request(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Status(status.as_u16()));
        }
        let records: Vec<EngineRecord> = response
            .json()
            .await
            .map_err(|err| EngineError::Decode(err.to_string()))?;
        Ok(records.into_iter().map(Workload::from).collect())
    }

    async fn get_workload(&self, id: &str) -> Result<Workload, EngineError> {
        let response = self
            .client
            .get(self.endpoints.workload(id)?)
            .send()
            .await
            .map_err(|err| EngineError::Request(err.to_string()))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(EngineError::NotFound(id.to_string()));
        }
        if !status.is_success() {
            return Err(EngineError::Status(status.as_u16()));
        }
        let record: EngineRecord = response
            .json()
            .await
            .map_err(|err| EngineError::Decode(err.to_string()))?;
        Ok(Workload::from(record))
    }

    async fn start_workload(&self, id: &str) -> Result<(), EngineError> {
        self.put_command(id, "start").await
    }

    async fn stop_workload(&self, id: &str) -> Result<(), EngineError> {
        self.put_command(id, "stop").await
    }

    async fn restart_workload(&self, id: &str) -> Result<(), EngineError> {
        self.put_command(id, "restart").await
    }

    async fn remove_workload(&self, id: &str) -> Result<(), EngineError> {
        self.put_command(id, "remove").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_join_paths_under_the_base() {
        let endpoints = EngineEndpoints::new("http://127.0.0.1:8080/api").expect("endpoints");
        assert_eq!(
            endpoints.list().expect("list").as_str(),
            "http://127.0.0.1:8080/api/container"
        );
        assert_eq!(
            endpoints.command("abc", "start").expect("command").as_str(),
            "http://127.0.0.1:8080/api/container/abc/start"
        );
        assert_eq!(
            endpoints.events().expect("events").as_str(),
            "ws://127.0.0.1:8080/api/ws/container/events"
        );
        assert_eq!(
            endpoints.logs("abc").expect("logs").as_str(),
            "ws://127.0.0.1:8080/api/ws/container/abc/logs"
        );
    }

    #[test]
    fn https_base_maps_to_wss_streams() {
        let endpoints = EngineEndpoints::new("https://engine.example.com").expect("endpoints");
        assert_eq!(
            endpoints.stats("abc").expect("stats").as_str(),
            "wss://engine.example.com/ws/container/abc/stats"
        );
        assert_eq!(
            endpoints.terminal("abc").expect("terminal").as_str(),
            "wss://engine.example.com/ws/container/abc/terminal"
        );
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        assert!(matches!(
            EngineEndpoints::new("ftp://engine.example.com"),
            Err(EngineError::Scheme(_))
        ));
    }
}
