//! Minimal Docker Engine API client over the unix socket.
//!
//! Only the exec surface the [`crate::container::ContainerBackend`]
//! needs: exec create, exec start (the response body is the raw
//! multiplexed stream), and exec inspect for the exit code.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    bytes::Bytes,
    drydock_common::{Error, Result},
    futures::StreamExt,
    http::{Method, Request, Uri},
    http_body_util::{BodyExt, BodyStream, Full},
    hyper_util::client::legacy::Client,
    hyperlocal::{UnixClientExt, UnixConnector, Uri as UnixUri},
    serde_json::{Value, json},
    tracing::debug,
};

use crate::container::{ContainerRuntime, ExecStream};

const DOCKER_API_VERSION: &str = "v1.41";

pub struct DockerRuntime {
    socket: PathBuf,
    container: String,
    client: Client<UnixConnector, Full<Bytes>>,
}

impl DockerRuntime {
    #[must_use]
    pub fn new(socket: PathBuf, container: String) -> Self {
        Self {
            socket,
            container,
            client: Client::unix(),
        }
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<http::Response<hyper::body::Incoming>> {
        let uri: Uri = UnixUri::new(&self.socket, &format!("/{DOCKER_API_VERSION}{path}")).into();
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(payload) => {
                builder = builder.header("content-type", "application/json");
                Full::new(Bytes::from(payload.to_string()))
            },
            None => Full::new(Bytes::new()),
        };
        let request = builder
            .body(body)
            .map_err(|e| Error::container(format!("build request for {path}: {e}")))?;
        self.client
            .request(request)
            .await
            .map_err(|e| Error::container(format!("engine api transport ({path}): {e}")))
    }

    async fn request_json(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let response = self.request(method, path, body).await?;
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::container(format!("read response for {path}: {e}")))?
            .to_bytes();
        if !status.is_success() {
            return Err(Error::container(format!(
                "{path}: {status}: {}",
                String::from_utf8_lossy(&bytes).trim()
            )));
        }
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::container(format!("decode response for {path}: {e}")))
    }

    async fn create_exec(&self, argv: &[String], workdir: Option<&Path>) -> Result<String> {
        let mut payload = json!({
            "AttachStdin": false,
            "AttachStdout": true,
            "AttachStderr": true,
            "Tty": false,
            "Cmd": argv,
        });
        if let Some(dir) = workdir {
            payload["WorkingDir"] = json!(dir.to_string_lossy());
        }
        let value = self
            .request_json(
                Method::POST,
                &format!("/containers/{}/exec", self.container),
                Some(payload),
            )
            .await?;
        let id = value
            .get("Id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::container("exec create response missing Id"))?;
        debug!(exec_id = id, ?argv, "exec created");
        Ok(id.to_owned())
    }

    /// Start the exec; the response body is the multiplexed output
    /// stream.
    async fn start_exec(&self, exec_id: &str) -> Result<hyper::body::Incoming> {
        let response = self
            .request(
                Method::POST,
                &format!("/exec/{exec_id}/start"),
                Some(json!({ "Detach": false, "Tty": false })),
            )
            .await?;
        let status = response.status();
        if !status.is_success() {
            let bytes = response
                .into_body()
                .collect()
                .await
                .map(|b| b.to_bytes())
                .unwrap_or_default();
            return Err(Error::container(format!(
                "exec start {exec_id}: {status}: {}",
                String::from_utf8_lossy(&bytes).trim()
            )));
        }
        Ok(response.into_body())
    }

    async fn exec_exit_code(&self, exec_id: &str) -> Result<i32> {
        let value = self
            .request_json(Method::GET, &format!("/exec/{exec_id}/json"), None)
            .await?;
        Ok(value.get("ExitCode").and_then(Value::as_i64).unwrap_or(-1) as i32)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn exec_collect(
        &self,
        argv: &[String],
        workdir: Option<&Path>,
    ) -> Result<(i32, Vec<u8>)> {
        let exec_id = self.create_exec(argv, workdir).await?;
        let body = self.start_exec(&exec_id).await?;
        let raw = body
            .collect()
            .await
            .map_err(|e| Error::container(format!("collect exec output: {e}")))?
            .to_bytes()
            .to_vec();
        let exit_code = self.exec_exit_code(&exec_id).await?;
        Ok((exit_code, raw))
    }

    async fn exec_stream(&self, argv: &[String], workdir: Option<&Path>) -> Result<ExecStream> {
        let exec_id = self.create_exec(argv, workdir).await?;
        let body = self.start_exec(&exec_id).await?;
        let stream = BodyStream::new(body)
            .filter_map(|frame| async move {
                match frame {
                    Ok(frame) => frame.into_data().ok().map(Ok),
                    Err(e) => Some(Err(std::io::Error::other(e))),
                }
            })
            .boxed();
        Ok(stream)
    }
}
