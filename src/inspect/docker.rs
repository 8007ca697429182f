use std::path::PathBuf;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::{Method, Request, StatusCode, header};
use hyper_util::rt::TokioIo;

use super::{ContainerInspector, ContainerMetadata, Error, Result};
use crate::container::ContainerID;

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectResponse {
    #[serde(default)]
    name: String,
    #[serde(default)]
    graph_driver: Option<GraphDriver>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GraphDriver {
    #[serde(default)]
    name: String,
    #[serde(default)]
    data: Option<GraphDriverData>,
}

#[derive(Debug, Default, serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GraphDriverData {
    lower_dir: Option<String>,
    upper_dir: Option<String>,
}

/// Looks up containers through the Docker Engine API on a unix socket.
#[derive(Debug, Clone)]
pub struct DockerInspector {
    socket_path: PathBuf,
    rootfs: PathBuf,
}

impl DockerInspector {
    /// # Arguments
    ///
    /// * `socket_path` - Path of the Docker daemon socket.
    /// * `rootfs` - Mount point of the host root, prepended to the layer directories.
    pub fn new(socket_path: impl Into<PathBuf>, rootfs: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            rootfs: rootfs.into(),
        }
    }

    async fn get(&self, uri: &str) -> Result<(StatusCode, Bytes)> {
        log::trace!("Connecting to {}...", self.socket_path.display());
        let stream = tokio::net::UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| Error::SocketConnect {
                path: self.socket_path.clone(),
                source,
            })?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(Error::Http)?;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                log::debug!("docker connection closed with error: {}", err);
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header(header::HOST, "docker")
            .body(Empty::<Bytes>::new())
            .map_err(Error::Request)?;
        let response = sender.send_request(request).await.map_err(Error::Http)?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(Error::Http)?
            .to_bytes();

        Ok((status, body))
    }
}

impl ContainerInspector for DockerInspector {
    async fn inspect(&self, id: &ContainerID) -> Result<ContainerMetadata> {
        let (status, body) = self.get(&format!("/containers/{id}/json")).await?;
        match status {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(Error::NotFound(id.clone())),
            status => {
                return Err(Error::UnexpectedStatus {
                    id: id.clone(),
                    status,
                });
            }
        }

        let response: InspectResponse =
            serde_json::from_slice(&body).map_err(|source| Error::Decode {
                id: id.clone(),
                source,
            })?;
        let data = match response.graph_driver {
            Some(driver) => {
                log::trace!("container `{}` uses storage driver `{}`", id, driver.name);
                driver.data.unwrap_or_default()
            }
            None => GraphDriverData::default(),
        };

        Ok(ContainerMetadata {
            name: response.name.trim_start_matches('/').to_owned(),
            layers: super::layers_from_graph_driver(
                data.lower_dir.as_deref(),
                data.upper_dir.as_deref(),
                &self.rootfs,
            ),
        })
    }
}
