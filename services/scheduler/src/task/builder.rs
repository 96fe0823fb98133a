//! Builds the task descriptor for one instance bound to one offer.

use std::collections::BTreeMap;

use fleet_events::{
    resource_names, CommandInfo, ContainerInfo, DockerInfo, DockerNetwork, Offer, Parameter,
    PortMapping, Resource, TaskInfo, ValueRange, Volume, VolumeMode,
};
use fleet_id::TaskId;

use super::TaskError;
use crate::app::AppVersion;

/// Describes instance `task_id` of `version` on `offer`.
///
/// Host ports are taken from the offer's `ports` ranges in order, one per
/// container port mapping.
pub fn build_task(version: &AppVersion, task_id: &TaskId, offer: &Offer) -> Result<TaskInfo, TaskError> {
    let host_ports = assign_ports(version, offer)?;

    Ok(TaskInfo {
        name: task_id.to_string(),
        task_id: task_id.clone(),
        agent_id: offer.agent_id.clone(),
        resources: resources(version, &host_ports),
        command: Some(command(version)),
        container: container(version, &host_ports),
        health_check: version.health_check.clone(),
        kill_policy: version.kill_policy,
        labels: version.labels.clone(),
    })
}

/// Host ports of a built task, in port-mapping order.
pub fn host_ports(task: &TaskInfo) -> Vec<u64> {
    task.resources
        .iter()
        .filter(|r| r.name == resource_names::PORTS)
        .flat_map(Resource::range_values)
        .collect()
}

fn assign_ports(version: &AppVersion, offer: &Offer) -> Result<Vec<u64>, TaskError> {
    let needed = version.port_mappings().len();
    if needed == 0 {
        return Ok(Vec::new());
    }

    let offered = offer.ports();
    if offered.len() < needed {
        return Err(TaskError::InsufficientPorts {
            needed,
            offered: offered.len(),
        });
    }
    Ok(offered.into_iter().take(needed).collect())
}

fn resources(version: &AppVersion, host_ports: &[u64]) -> Vec<Resource> {
    let mut out: Vec<Resource> = [
        (resource_names::CPUS, version.cpus),
        (resource_names::MEM, version.mem),
        (resource_names::DISK, version.disk),
    ]
    .into_iter()
    .filter(|(_, amount)| *amount > 0.0)
    .map(|(name, amount)| Resource::scalar(name, amount))
    .collect();

    out.extend(
        host_ports
            .iter()
            .map(|port| Resource::ranges(resource_names::PORTS, vec![ValueRange::single(*port)])),
    );
    out
}

fn command(version: &AppVersion) -> CommandInfo {
    let mut argv = version.command.split_whitespace().map(str::to_string);
    let environment: BTreeMap<String, String> = version.env.clone();

    CommandInfo {
        shell: false,
        value: argv.next(),
        arguments: argv.collect(),
        environment,
    }
}

fn container(version: &AppVersion, host_ports: &[u64]) -> Option<ContainerInfo> {
    let spec = version.container.as_ref()?;
    let docker = spec.docker.as_ref()?;

    let port_mappings = docker
        .port_mappings
        .iter()
        .zip(host_ports)
        .map(|(mapping, host)| PortMapping {
            host_port: u32::try_from(*host).unwrap_or(u32::MAX),
            container_port: mapping.container_port,
            protocol: if mapping.protocol.is_empty() {
                "tcp".to_string()
            } else {
                mapping.protocol.clone()
            },
        })
        .collect();

    let parameters = docker
        .parameters
        .iter()
        .map(|p| Parameter {
            key: p.key.clone(),
            value: p.value.clone(),
        })
        .collect();

    let volumes = spec
        .volumes
        .iter()
        .map(|v| Volume {
            container_path: v.container_path.clone(),
            host_path: v.host_path.clone(),
            mode: if v.mode.eq_ignore_ascii_case("rw") {
                VolumeMode::Rw
            } else {
                VolumeMode::Ro
            },
        })
        .collect();

    Some(ContainerInfo {
        docker: DockerInfo {
            image: docker.image.clone(),
            network: DockerNetwork::from_name(&docker.network),
            privileged: docker.privileged,
            force_pull_image: docker.force_pull_image,
            port_mappings,
            parameters,
        },
        volumes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{Container, Docker, PortMapping as AppPortMapping, Volume as AppVolume};
    use fleet_id::{AgentId, AppId, OfferId};

    fn version(port_mappings: usize) -> AppVersion {
        AppVersion {
            app_name: "web".to_string(),
            command: "nginx -g daemon-off".to_string(),
            cpus: 0.5,
            mem: 256.0,
            instances: 1,
            run_as: "ops".to_string(),
            container: Some(Container {
                kind: "docker".to_string(),
                docker: Some(Docker {
                    image: "nginx:1.27".to_string(),
                    network: "bridge".to_string(),
                    port_mappings: (0..port_mappings)
                        .map(|i| AppPortMapping {
                            container_port: 80 + i as u32,
                            ..AppPortMapping::default()
                        })
                        .collect(),
                    ..Docker::default()
                }),
                volumes: vec![AppVolume {
                    container_path: "/data".to_string(),
                    host_path: "/srv/data".to_string(),
                    mode: "RW".to_string(),
                }],
            }),
            env: [("MODE".to_string(), "prod".to_string())].into(),
            ..AppVersion::default()
        }
    }

    fn offer(ports: ValueRange) -> Offer {
        Offer {
            id: OfferId::parse("offer-1").unwrap(),
            agent_id: AgentId::parse("agent-7").unwrap(),
            hostname: "node-7".to_string(),
            resources: vec![
                Resource::scalar("cpus", 4.0),
                Resource::scalar("mem", 4096.0),
                Resource::ranges("ports", vec![ports]),
            ],
        }
    }

    fn task_id() -> TaskId {
        TaskId::for_instance(0, &AppId::compose("web", "ops", "local").unwrap()).unwrap()
    }

    #[test]
    fn test_build_task_binds_offer_and_ports() {
        let task = build_task(
            &version(2),
            &task_id(),
            &offer(ValueRange {
                begin: 31000,
                end: 31010,
            }),
        )
        .unwrap();

        assert_eq!(task.name, "0.web.ops.local");
        assert_eq!(task.agent_id.as_str(), "agent-7");
        assert_eq!(host_ports(&task), vec![31000, 31001]);

        let names: Vec<_> = task.resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["cpus", "mem", "ports", "ports"]);

        let docker = &task.container.as_ref().unwrap().docker;
        assert_eq!(docker.network, DockerNetwork::Bridge);
        assert_eq!(docker.port_mappings[1].host_port, 31001);
        assert_eq!(docker.port_mappings[1].container_port, 81);
        assert_eq!(docker.port_mappings[0].protocol, "tcp");
        assert_eq!(task.container.unwrap().volumes[0].mode, VolumeMode::Rw);
    }

    #[test]
    fn test_command_is_split_without_shell() {
        let task = build_task(&version(0), &task_id(), &offer(ValueRange::single(1))).unwrap();
        let command = task.command.unwrap();
        assert!(!command.shell);
        assert_eq!(command.value.as_deref(), Some("nginx"));
        assert_eq!(command.arguments, vec!["-g", "daemon-off"]);
        assert_eq!(command.environment["MODE"], "prod");
    }

    #[test]
    fn test_insufficient_ports() {
        let err = build_task(&version(3), &task_id(), &offer(ValueRange::single(31000)))
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::InsufficientPorts {
                needed: 3,
                offered: 1
            }
        ));
    }
}
