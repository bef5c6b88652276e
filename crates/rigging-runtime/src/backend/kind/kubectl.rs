//! `kubectl` invocations against one kind cluster and parsing of their
//! JSON output.

use std::path::Path;
use std::process::Child;
use std::time::Duration;

use rigging_common::error::{Result, RiggingError};
use rigging_common::types::PortMap;
use rigging_core::command::{Command, ExecOptions, ExecOutput};
use serde::Deserialize;

use crate::exec::Tool;

/// `kubectl` bound to one cluster's kubeconfig.
#[derive(Debug, Clone)]
pub struct Kubectl {
    tool: Tool,
}

impl Kubectl {
    /// Binds `kubectl` to the kubeconfig at `kubeconfig`.
    #[must_use]
    pub fn new(kubectl: &Tool, kubeconfig: &Path) -> Self {
        Self {
            tool: kubectl.with_base_args([
                "--kubeconfig".to_string(),
                kubeconfig.display().to_string(),
            ]),
        }
    }

    /// Underlying tool, for rendering commands in logs.
    #[must_use]
    pub const fn tool(&self) -> &Tool {
        &self.tool
    }

    /// Applies a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::Tool`] if the apply is rejected.
    pub fn apply(&self, manifest: &Path) -> Result<()> {
        let path = manifest.display().to_string();
        self.tool.run(&["apply", "-f", path.as_str()])
    }

    /// Deletes every object of a manifest file, waiting for termination.
    ///
    /// A zero grace period forces immediate removal. Objects that are
    /// already gone are not an error.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::Tool`] if the delete is rejected.
    pub fn delete(&self, manifest: &Path, grace: Duration) -> Result<()> {
        let path = manifest.display().to_string();
        let grace_flag = format!("--grace-period={}", grace.as_secs());
        let mut args = vec![
            "delete",
            "-f",
            path.as_str(),
            grace_flag.as_str(),
            "--ignore-not-found=true",
            "--wait=true",
        ];
        if grace.is_zero() {
            args.push("--force");
        }
        self.tool.run(&args)
    }

    /// Internal IP address of the cluster's node.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::Parse`] if the node reports no internal IP.
    pub fn node_address(&self) -> Result<String> {
        let args = ["get", "nodes", "-o", "jsonpath={.items[0].status.addresses}"];
        let output = self.tool.output(&args)?;
        parse_node_address(&self.tool.describe(&args), &output)
    }

    /// Returns whether a pod labelled `app=<app>` reports ready.
    ///
    /// # Errors
    ///
    /// Returns an error if pods cannot be listed or the listing is not the
    /// expected JSON.
    pub fn pod_ready(&self, app: &str) -> Result<bool> {
        let selector = format!("app={app}");
        let args = ["get", "pods", "-l", selector.as_str(), "-o", "json"];
        let output = self.tool.output(&args)?;
        parse_pod_ready(&self.tool.describe(&args), &output)
    }

    /// Resolves the node port of every declared port of `service`.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::Parse`] if the service's ports disagree with
    /// the declared ones in count or naming.
    pub fn node_ports(&self, service: &str, declared: &PortMap) -> Result<PortMap> {
        let args = ["get", "service", service, "-o", "json"];
        let output = self.tool.output(&args)?;
        parse_node_ports(&self.tool.describe(&args), &output, declared)
    }

    /// Follows the logs of `deployment` in a child process.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `kubectl` cannot be spawned.
    pub fn follow_logs(&self, deployment: &str) -> Result<Child> {
        let target = format!("deployment/{deployment}");
        self.tool
            .spawn(&["logs", "-f", target.as_str(), "--all-containers=true"])
    }

    /// Executes `command` in the pod of `deployment`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `kubectl` cannot be spawned.
    pub fn exec(
        &self,
        deployment: &str,
        command: &Command,
        options: ExecOptions,
    ) -> Result<ExecOutput> {
        let mut args = vec![
            "exec".to_string(),
            format!("deployment/{deployment}"),
            "--".to_string(),
        ];
        args.extend(command.argv());
        self.tool.exec(&args, options)
    }
}

#[derive(Debug, Deserialize)]
struct NodeAddress {
    #[serde(rename = "type")]
    kind: String,
    address: String,
}

#[derive(Debug, Deserialize)]
struct PodList {
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ServiceObject {
    spec: ServiceSpec,
}

#[derive(Debug, Deserialize)]
struct ServiceSpec {
    #[serde(default)]
    ports: Vec<ServicePort>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServicePort {
    name: Option<String>,
    port: u16,
    node_port: Option<u16>,
}

fn parse_error(command: &str, output: &str, message: impl Into<String>) -> RiggingError {
    RiggingError::Parse {
        command: command.to_string(),
        message: message.into(),
        output: output.to_string(),
    }
}

fn from_json<'a, T: Deserialize<'a>>(command: &str, output: &'a str) -> Result<T> {
    serde_json::from_str(output).map_err(|e| parse_error(command, output, e.to_string()))
}

/// Picks the `InternalIP` out of a node's typed address array.
///
/// # Errors
///
/// Returns [`RiggingError::Parse`] if the output is not an address array or
/// carries no internal IP.
pub fn parse_node_address(command: &str, output: &str) -> Result<String> {
    let addresses: Vec<NodeAddress> = from_json(command, output)?;
    addresses
        .into_iter()
        .find(|a| a.kind == "InternalIP")
        .map(|a| a.address)
        .filter(|a| !a.is_empty())
        .ok_or_else(|| parse_error(command, output, "node reports no InternalIP address"))
}

/// Returns whether any pod of a listing has condition `Ready=True`.
///
/// # Errors
///
/// Returns [`RiggingError::Parse`] if the output is not a pod list.
pub fn parse_pod_ready(command: &str, output: &str) -> Result<bool> {
    let pods: PodList = from_json(command, output)?;
    Ok(pods.items.iter().any(|pod| {
        pod.status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True")
    }))
}

/// Maps a service's node ports back to the declared logical port names.
///
/// The service must expose exactly the declared ports: same count, every
/// declared name present with the declared port and an assigned node port.
///
/// # Errors
///
/// Returns [`RiggingError::Parse`] on any disagreement.
pub fn parse_node_ports(command: &str, output: &str, declared: &PortMap) -> Result<PortMap> {
    let service: ServiceObject = from_json(command, output)?;
    let ports = service.spec.ports;
    if ports.len() != declared.len() {
        return Err(parse_error(
            command,
            output,
            format!(
                "service exposes {} ports, {} declared",
                ports.len(),
                declared.len()
            ),
        ));
    }

    let mut resolved = PortMap::new();
    for (name, container_port) in declared {
        let Some(port) = ports.iter().find(|p| p.name.as_deref() == Some(name.as_str())) else {
            return Err(parse_error(
                command,
                output,
                format!("declared port {name} is not exposed"),
            ));
        };
        if port.port != *container_port {
            return Err(parse_error(
                command,
                output,
                format!(
                    "port {name} exposes {} instead of {container_port}",
                    port.port
                ),
            ));
        }
        let Some(node_port) = port.node_port else {
            return Err(parse_error(
                command,
                output,
                format!("port {name} has no node port yet"),
            ));
        };
        let _ = resolved.insert(name.clone(), node_port);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_address_picks_internal_ip() {
        let out = r#"[{"address":"172.18.0.2","type":"InternalIP"},{"address":"e2e-control-plane","type":"Hostname"}]"#;
        assert_eq!(parse_node_address("kubectl", out).unwrap(), "172.18.0.2");
    }

    #[test]
    fn node_address_requires_internal_ip() {
        let out = r#"[{"address":"e2e-control-plane","type":"Hostname"}]"#;
        assert!(parse_node_address("kubectl", out).is_err());
        assert!(parse_node_address("kubectl", "172.18.0.2").is_err());
    }

    #[test]
    fn pod_readiness_follows_ready_condition() {
        let ready = r#"{"items":[{"status":{"phase":"Running","conditions":[
            {"type":"Initialized","status":"True"},{"type":"Ready","status":"True"}]}}]}"#;
        let pending = r#"{"items":[{"status":{"phase":"Pending","conditions":[
            {"type":"Ready","status":"False"}]}}]}"#;
        assert!(parse_pod_ready("kubectl", ready).unwrap());
        assert!(!parse_pod_ready("kubectl", pending).unwrap());
        assert!(!parse_pod_ready("kubectl", r#"{"items":[{}]}"#).unwrap());
        assert!(!parse_pod_ready("kubectl", r#"{"items":[]}"#).unwrap());
        assert!(parse_pod_ready("kubectl", "not json").is_err());
    }

    fn declared() -> PortMap {
        PortMap::from([("http".into(), 9090), ("grpc".into(), 10901)])
    }

    #[test]
    fn node_ports_map_to_declared_names() {
        let out = r#"{"spec":{"type":"NodePort","ports":[
            {"name":"grpc","port":10901,"targetPort":10901,"nodePort":31001},
            {"name":"http","port":9090,"targetPort":9090,"nodePort":31002}]}}"#;
        let ports = parse_node_ports("kubectl", out, &declared()).unwrap();
        assert_eq!(ports.get("grpc"), Some(&31001));
        assert_eq!(ports.get("http"), Some(&31002));
        assert_eq!(
            ports.keys().collect::<Vec<_>>(),
            declared().keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn node_ports_count_mismatch_is_error() {
        let out = r#"{"spec":{"ports":[{"name":"http","port":9090,"nodePort":31002}]}}"#;
        let err = parse_node_ports("kubectl", out, &declared()).unwrap_err();
        assert!(err.to_string().contains("1 ports, 2 declared"), "{err}");
    }

    #[test]
    fn node_ports_name_mismatch_is_error() {
        let out = r#"{"spec":{"ports":[
            {"name":"web","port":9090,"nodePort":31002},
            {"name":"grpc","port":10901,"nodePort":31001}]}}"#;
        assert!(parse_node_ports("kubectl", out, &declared()).is_err());
    }

    #[test]
    fn node_ports_missing_node_port_is_error() {
        let out = r#"{"spec":{"ports":[
            {"name":"http","port":9090},
            {"name":"grpc","port":10901,"nodePort":31001}]}}"#;
        assert!(parse_node_ports("kubectl", out, &declared()).is_err());
    }
}
