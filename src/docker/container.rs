use bollard::models::{
    ContainerCreateBody, ContainerInspectResponse, ContainerStateStatusEnum, HostConfig,
    PortBinding,
};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, InspectNetworkOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::Docker;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

use crate::docker::{ContainerDetails, ContainerSpec, EngineError};

/// Port mapping: container port and the host port to publish it on.
/// `None` lets the engine pick a free host port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMap {
    pub container_port: u16,
    pub host_port: Option<u16>,
}

/// Build the engine's `port_bindings` map and exposed port list.
pub fn port_bindings(
    port_maps: &[PortMap],
) -> (HashMap<String, Option<Vec<PortBinding>>>, Vec<String>) {
    let mut bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
    let mut exposed_ports: Vec<String> = Vec::new();
    for pm in port_maps {
        let container_port_key = format!("{}/tcp", pm.container_port);
        bindings.insert(
            container_port_key.clone(),
            Some(vec![PortBinding {
                host_ip: None,
                // empty host port means "any free port"
                host_port: Some(pm.host_port.map(|p| p.to_string()).unwrap_or_default()),
            }]),
        );
        exposed_ports.push(container_port_key);
    }
    (bindings, exposed_ports)
}

/// Create a container from a spec and return its id.
pub async fn create_container(docker: &Docker, spec: &ContainerSpec) -> Result<String, EngineError> {
    let (bindings, exposed_ports) = port_bindings(&spec.ports);

    let host_config = HostConfig {
        port_bindings: Some(bindings),
        binds: Some(spec.binds.clone()),
        privileged: Some(spec.privileged),
        cap_add: (!spec.cap_add.is_empty()).then(|| spec.cap_add.clone()),
        ..Default::default()
    };

    let config = ContainerCreateBody {
        image: Some(spec.image.clone()),
        hostname: Some(spec.hostname.clone()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: Some(spec.name.clone()),
        ..Default::default()
    };

    let response = docker.create_container(Some(options), config).await?;

    tracing::debug!(
        container = %spec.name,
        id = %response.id,
        "container created"
    );

    Ok(response.id)
}

/// Start a container by ID. Starting an already running container is not an error.
pub async fn start_container(docker: &Docker, container_id: &str) -> Result<(), EngineError> {
    match docker
        .start_container(container_id, None::<StartContainerOptions>)
        .await
    {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 304, ..
        }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Force-remove a container by name or ID.
pub async fn remove_container(docker: &Docker, container_id: &str) -> Result<(), EngineError> {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    match docker.remove_container(container_id, Some(options)).await {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub async fn inspect_container(
    docker: &Docker,
    name_or_id: &str,
) -> Result<ContainerDetails, EngineError> {
    let response = docker
        .inspect_container(name_or_id, None::<InspectContainerOptions>)
        .await?;
    Ok(details_from_inspect(response))
}

/// Reduce a raw inspection to [`ContainerDetails`].
pub fn details_from_inspect(response: ContainerInspectResponse) -> ContainerDetails {
    let state = response.state.unwrap_or_default();
    let running = state.status == Some(ContainerStateStatusEnum::RUNNING);
    let status = state
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let started_at = state
        .started_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    let mut published = BTreeMap::new();
    let ports = response
        .network_settings
        .and_then(|n| n.ports)
        .unwrap_or_default();
    for (key, bindings) in ports {
        let Some(container_port) = key
            .strip_suffix("/tcp")
            .and_then(|p| p.parse::<u16>().ok())
        else {
            continue;
        };
        let host_port = bindings
            .unwrap_or_default()
            .into_iter()
            .find_map(|b| b.host_port.and_then(|p| p.parse::<u16>().ok()));
        if let Some(host_port) = host_port {
            published.insert(container_port, host_port);
        }
    }

    ContainerDetails {
        id: response.id.unwrap_or_default(),
        status,
        running,
        started_at,
        published,
    }
}

/// Gateway of the default `bridge` network.
pub async fn bridge_gateway(docker: &Docker) -> Result<Option<String>, EngineError> {
    let network = docker
        .inspect_network("bridge", None::<InspectNetworkOptions>)
        .await?;
    Ok(network
        .ipam
        .and_then(|ipam| ipam.config)
        .unwrap_or_default()
        .into_iter()
        .find_map(|c| c.gateway))
}
