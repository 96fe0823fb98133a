//! Application definitions and persisted records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use fleet_events::{HealthCheck, KillPolicy, TaskState};
use fleet_id::{AgentId, AppId, OfferId, TaskId};
use serde::{Deserialize, Serialize};

use crate::acquire::ResourceRequest;

// =============================================================================
// App Version (operator-submitted definition)
// =============================================================================

/// One version of an application definition, as submitted by an operator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppVersion {
    pub app_name: String,
    pub app_version: String,
    /// Whitespace-separated command line; empty uses the image entrypoint.
    pub command: String,
    pub cpus: f64,
    pub mem: f64,
    pub disk: f64,
    pub instances: u32,
    pub run_as: String,
    pub container: Option<Container>,
    pub labels: BTreeMap<String, String>,
    pub health_check: Option<HealthCheck>,
    pub env: BTreeMap<String, String>,
    pub kill_policy: Option<KillPolicy>,
    pub update_policy: Option<UpdatePolicy>,
    pub gateway: Option<Gateway>,
    pub constraints: String,
    pub uris: Vec<String>,
    pub ip: Vec<String>,
    pub mode: String,
    pub priority: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Container {
    #[serde(rename = "type")]
    pub kind: String,
    pub docker: Option<Docker>,
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Docker {
    pub force_pull_image: bool,
    pub image: String,
    pub network: String,
    pub parameters: Vec<Parameter>,
    pub port_mappings: Vec<PortMapping>,
    pub privileged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortMapping {
    pub container_port: u32,
    pub host_port: u32,
    pub name: String,
    pub protocol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Volume {
    pub container_path: String,
    pub host_path: String,
    /// `RO` or `RW`; anything else is read-only.
    pub mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdatePolicy {
    pub update_delay: i32,
    pub max_retries: i32,
    pub max_failovers: i32,
    pub action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Gateway {
    pub enabled: bool,
    pub weight: f64,
}

impl AppVersion {
    /// The docker section, if the version runs a docker container.
    pub fn docker(&self) -> Option<&Docker> {
        self.container.as_ref()?.docker.as_ref()
    }

    /// Port mappings of the docker container; empty without one.
    pub fn port_mappings(&self) -> &[PortMapping] {
        self.docker().map_or(&[], |d| d.port_mappings.as_slice())
    }

    /// Resources one instance of this version needs.
    pub fn resource_request(&self) -> ResourceRequest {
        ResourceRequest::sized(self.cpus, self.mem, self.disk, self.port_mappings().len())
    }

    /// Check the fields the launcher relies on.
    pub fn validate(&self) -> Result<(), String> {
        if self.app_name.trim().is_empty() {
            return Err("appName must not be empty".to_string());
        }
        if self.run_as.trim().is_empty() {
            return Err("runAs must not be empty".to_string());
        }
        for (field, value) in [("cpus", self.cpus), ("mem", self.mem), ("disk", self.disk)] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{field} must be a non-negative number"));
            }
        }
        match self.docker() {
            Some(docker) if !docker.image.trim().is_empty() => Ok(()),
            Some(_) => Err("container.docker.image must not be empty".to_string()),
            None => Err("container.docker is required".to_string()),
        }
    }
}

// =============================================================================
// Persisted Records
// =============================================================================

/// Lifecycle state of an application record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Creating,
    Running,
    Failed,
    Deleting,
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Creating => "creating",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
        })
    }
}

/// A launched (or launching) application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: AppId,
    pub name: String,
    pub cluster_id: String,
    pub state: AppState,
    pub version: AppVersion,
    pub proposed_version: Option<AppVersion>,
    /// Last launch or kill error, if any.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl App {
    /// A fresh record in the `creating` state.
    pub fn creating(id: AppId, cluster: &str, version: AppVersion) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: version.app_name.clone(),
            cluster_id: cluster.to_string(),
            state: AppState::Creating,
            version,
            proposed_version: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_state(&mut self, state: AppState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

/// One task instance of an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: TaskId,
    pub app_id: AppId,
    pub version: String,
    pub state: TaskState,
    pub offer_id: OfferId,
    pub agent_id: AgentId,
    pub agent_hostname: String,
    pub host_ports: Vec<u64>,
    pub message: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> &'static str {
        r#"{
            "appName": "web",
            "appVersion": "v1",
            "command": "nginx -g daemon-off",
            "cpus": 0.5,
            "mem": 128,
            "instances": 2,
            "runAs": "ops",
            "container": {
                "type": "docker",
                "docker": {
                    "image": "nginx:1.27",
                    "network": "bridge",
                    "portMappings": [
                        {"containerPort": 80, "protocol": "tcp", "name": "http"}
                    ]
                },
                "volumes": [{"containerPath": "/data", "hostPath": "/srv", "mode": "RW"}]
            },
            "labels": {"team": "edge"},
            "env": {"MODE": "prod"},
            "killPolicy": {"duration": 5}
        }"#
    }

    #[test]
    fn test_app_version_parses_camel_case() {
        let version: AppVersion = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(version.app_name, "web");
        assert_eq!(version.run_as, "ops");
        assert_eq!(version.instances, 2);
        assert_eq!(version.port_mappings().len(), 1);
        assert_eq!(version.kill_policy, Some(KillPolicy { duration: 5 }));
        assert!(version.validate().is_ok());
    }

    #[test]
    fn test_resource_request_counts_port_mappings() {
        let version: AppVersion = serde_json::from_str(sample_json()).unwrap();
        let names: Vec<_> = version
            .resource_request()
            .requirements()
            .iter()
            .map(|r| r.name().to_string())
            .collect();
        assert_eq!(names, vec!["cpus", "mem", "ports"]);
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut version: AppVersion = serde_json::from_str(sample_json()).unwrap();
        version.run_as = " ".to_string();
        assert!(version.validate().unwrap_err().contains("runAs"));

        let mut version: AppVersion = serde_json::from_str(sample_json()).unwrap();
        version.container = None;
        assert!(version.validate().unwrap_err().contains("docker"));
    }

    #[test]
    fn test_validate_accepts_zero_instances() {
        let mut version: AppVersion = serde_json::from_str(sample_json()).unwrap();
        version.instances = 0;
        assert_eq!(version.validate(), Ok(()));
    }

    #[test]
    fn test_app_state_serialization() {
        assert_eq!(
            serde_json::to_string(&AppState::Creating).unwrap(),
            "\"creating\""
        );
        assert_eq!(AppState::Failed.to_string(), "failed");
    }
}
