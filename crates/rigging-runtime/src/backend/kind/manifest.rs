//! Kubernetes manifests and kind cluster configuration.
//!
//! A runnable becomes one single-replica Deployment plus, when it declares
//! ports, one NodePort Service exposing every declared port under its
//! logical name. The environment's shared directory reaches pods through a
//! kind extra mount on the node and a hostPath volume in the pod.

use std::collections::BTreeMap;
use std::path::Path;

use rigging_common::constants::{KIND_NODE_SHARED_PATH, KIND_SHARED_MOUNT, SCOPE_LABEL};
use rigging_common::error::{Result, RiggingError};
use rigging_common::types::PidMode;
use rigging_core::backend::LaunchSpec;
use serde::Serialize;

const SHARED_VOLUME: &str = "shared";
const MAX_PORT_NAME_LENGTH: usize = 15;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KindCluster {
    kind: &'static str,
    api_version: &'static str,
    nodes: Vec<KindNode>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KindNode {
    role: &'static str,
    extra_mounts: Vec<ExtraMount>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtraMount {
    host_path: String,
    container_path: &'static str,
}

/// Renders the kind cluster configuration mounting `shared_dir` into the
/// node.
///
/// # Errors
///
/// Returns a configuration error if the document cannot be serialized.
pub fn kind_config(shared_dir: &Path) -> Result<String> {
    let cluster = KindCluster {
        kind: "Cluster",
        api_version: "kind.x-k8s.io/v1alpha4",
        nodes: vec![KindNode {
            role: "control-plane",
            extra_mounts: vec![ExtraMount {
                host_path: shared_dir.display().to_string(),
                container_path: KIND_NODE_SHARED_PATH,
            }],
        }],
    };
    to_yaml(&cluster)
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Deployment {
    api_version: &'static str,
    kind: &'static str,
    metadata: ObjectMeta,
    spec: DeploymentSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentSpec {
    replicas: u32,
    selector: LabelSelector,
    template: PodTemplate,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LabelSelector {
    match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct PodTemplate {
    metadata: ObjectMeta,
    spec: PodSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PodSpec {
    #[serde(rename = "hostPID", skip_serializing_if = "std::ops::Not::not")]
    host_pid: bool,
    containers: Vec<Container>,
    volumes: Vec<Volume>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Container {
    name: String,
    image: String,
    image_pull_policy: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    args: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    ports: Vec<ContainerPort>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    env: Vec<EnvVar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resources: Option<Resources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    security_context: Option<SecurityContext>,
    volume_mounts: Vec<VolumeMount>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerPort {
    name: String,
    container_port: u16,
    protocol: &'static str,
}

#[derive(Debug, Serialize)]
struct EnvVar {
    name: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct Resources {
    limits: BTreeMap<&'static str, String>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecurityContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    privileged: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_as_user: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_as_group: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    capabilities: Option<Capabilities>,
}

#[derive(Debug, Serialize)]
struct Capabilities {
    add: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VolumeMount {
    name: String,
    mount_path: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    read_only: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Volume {
    name: String,
    host_path: HostPath,
}

#[derive(Debug, Serialize)]
struct HostPath {
    path: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Service {
    api_version: &'static str,
    kind: &'static str,
    metadata: ObjectMeta,
    spec: ServiceSpec,
}

#[derive(Debug, Serialize)]
struct ServiceSpec {
    #[serde(rename = "type")]
    kind: &'static str,
    selector: BTreeMap<String, String>,
    ports: Vec<ServicePort>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ServicePort {
    name: String,
    port: u16,
    target_port: u16,
    protocol: &'static str,
}

/// Renders the Deployment (and Service, when ports are declared) for a
/// launch as one multi-document YAML string.
///
/// # Errors
///
/// Returns a configuration error if a port name is not a valid Kubernetes
/// port name, the user is not numeric, a volume specification is malformed,
/// or serialization fails.
pub fn workload_manifest(spec: &LaunchSpec<'_>) -> Result<String> {
    for port_name in spec.ports.keys() {
        validate_port_name(spec.name, port_name)?;
    }

    let selector = BTreeMap::from([("app".to_string(), spec.name.to_string())]);
    let mut labels = selector.clone();
    let _ = labels.insert(SCOPE_LABEL.to_string(), spec.scope.name.clone());

    let (volumes, mut volume_mounts) = extra_volumes(spec)?;
    volume_mounts.insert(
        0,
        VolumeMount {
            name: SHARED_VOLUME.into(),
            mount_path: KIND_SHARED_MOUNT.into(),
            read_only: false,
        },
    );
    let mut all_volumes = vec![Volume {
        name: SHARED_VOLUME.into(),
        host_path: HostPath {
            path: KIND_NODE_SHARED_PATH.into(),
            kind: Some("Directory"),
        },
    }];
    all_volumes.extend(volumes);

    let (command, args) = command_and_args(spec);
    let container = Container {
        name: spec.name.to_string(),
        image: spec.options.image.clone(),
        image_pull_policy: "IfNotPresent",
        command,
        args,
        ports: spec
            .ports
            .iter()
            .map(|(name, port)| ContainerPort {
                name: name.clone(),
                container_port: *port,
                protocol: "TCP",
            })
            .collect(),
        env: spec
            .options
            .env
            .iter()
            .map(|(name, value)| EnvVar {
                name: name.clone(),
                value: value.clone(),
            })
            .collect(),
        resources: resources(spec),
        security_context: security_context(spec)?,
        volume_mounts,
    };

    let deployment = Deployment {
        api_version: "apps/v1",
        kind: "Deployment",
        metadata: ObjectMeta {
            name: Some(spec.name.to_string()),
            labels: labels.clone(),
        },
        spec: DeploymentSpec {
            replicas: 1,
            selector: LabelSelector {
                match_labels: selector.clone(),
            },
            template: PodTemplate {
                metadata: ObjectMeta {
                    name: None,
                    labels: labels.clone(),
                },
                spec: PodSpec {
                    host_pid: spec.options.pid_mode == PidMode::Host,
                    containers: vec![container],
                    volumes: all_volumes,
                },
            },
        },
    };

    let mut documents = vec![to_yaml(&deployment)?];
    if !spec.ports.is_empty() {
        let service = Service {
            api_version: "v1",
            kind: "Service",
            metadata: ObjectMeta {
                name: Some(spec.name.to_string()),
                labels,
            },
            spec: ServiceSpec {
                kind: "NodePort",
                selector,
                ports: spec
                    .ports
                    .iter()
                    .map(|(name, port)| ServicePort {
                        name: name.clone(),
                        port: *port,
                        target_port: *port,
                        protocol: "TCP",
                    })
                    .collect(),
            },
        };
        documents.push(to_yaml(&service)?);
    }
    Ok(documents.join("---\n"))
}

fn command_and_args(spec: &LaunchSpec<'_>) -> (Option<Vec<String>>, Vec<String>) {
    match &spec.options.command {
        Some(command) if command.entrypoint_disabled => {
            (Some(vec![command.cmd.clone()]), command.args.clone())
        }
        Some(command) => {
            let args = if command.cmd.is_empty() {
                command.args.clone()
            } else {
                command.argv()
            };
            (None, args)
        }
        None => (None, Vec::new()),
    }
}

fn resources(spec: &LaunchSpec<'_>) -> Option<Resources> {
    let limits = &spec.options.limits;
    if limits.is_empty() {
        return None;
    }
    let mut map = BTreeMap::new();
    if let Some(bytes) = limits.memory_bytes {
        let _ = map.insert("memory", bytes.to_string());
    }
    if let Some(cpus) = limits.cpus {
        let _ = map.insert("cpu", cpus.to_string());
    }
    Some(Resources { limits: map })
}

fn security_context(spec: &LaunchSpec<'_>) -> Result<Option<SecurityContext>> {
    let opts = spec.options;
    let mut context = SecurityContext::default();
    let mut set = false;
    if opts.privileged {
        context.privileged = Some(true);
        set = true;
    }
    if let Some(user) = &opts.user {
        let (uid, gid) = parse_user(spec.name, user)?;
        context.run_as_user = Some(uid);
        context.run_as_group = gid;
        set = true;
    }
    if !opts.capabilities.is_empty() {
        context.capabilities = Some(Capabilities {
            add: opts.capabilities.clone(),
        });
        set = true;
    }
    Ok(set.then_some(context))
}

fn parse_user(runnable: &str, user: &str) -> Result<(u32, Option<u32>)> {
    let invalid = || {
        RiggingError::config(format!(
            "runnable {runnable}: user {user:?} must be numeric uid or uid:gid"
        ))
    };
    let (uid, gid) = match user.split_once(':') {
        Some((uid, gid)) => (uid, Some(gid)),
        None => (user, None),
    };
    let uid = uid.parse().map_err(|_| invalid())?;
    let gid = gid
        .map(|g| g.parse().map_err(|_| invalid()))
        .transpose()?;
    Ok((uid, gid))
}

fn extra_volumes(spec: &LaunchSpec<'_>) -> Result<(Vec<Volume>, Vec<VolumeMount>)> {
    let mut volumes = Vec::new();
    let mut mounts = Vec::new();
    for (index, volume) in spec.options.volumes.iter().enumerate() {
        let parts: Vec<&str> = volume.split(':').collect();
        let (host, container, mode) = match parts.as_slice() {
            [host, container] => (*host, *container, ""),
            [host, container, mode] => (*host, *container, *mode),
            _ => {
                return Err(RiggingError::config(format!(
                    "runnable {}: volume {volume:?} must be host:container[:mode]",
                    spec.name
                )));
            }
        };
        let name = format!("extra-{index}");
        volumes.push(Volume {
            name: name.clone(),
            host_path: HostPath {
                path: node_path(&spec.scope.dir, Path::new(host)),
                kind: None,
            },
        });
        mounts.push(VolumeMount {
            name,
            mount_path: container.to_string(),
            read_only: mode.split(',').any(|m| m == "ro"),
        });
    }
    Ok((volumes, mounts))
}

/// Maps a host path to the node path it is visible at: paths inside the
/// shared directory go through the node's extra mount, others are used as
/// node paths directly.
fn node_path(shared_dir: &Path, host: &Path) -> String {
    match host.strip_prefix(shared_dir) {
        Ok(rel) => Path::new(KIND_NODE_SHARED_PATH)
            .join(rel)
            .display()
            .to_string(),
        Err(_) => host.display().to_string(),
    }
}

fn validate_port_name(runnable: &str, name: &str) -> Result<()> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    let has_letter = name.chars().any(|c| c.is_ascii_lowercase());
    if name.is_empty()
        || name.len() > MAX_PORT_NAME_LENGTH
        || !valid_chars
        || !has_letter
        || name.starts_with('-')
        || name.ends_with('-')
        || name.contains("--")
    {
        return Err(RiggingError::config(format!(
            "runnable {runnable}: port name {name:?} is not a valid Kubernetes port name \
             (1-{MAX_PORT_NAME_LENGTH} lowercase alphanumerics or '-', at least one letter)"
        )));
    }
    Ok(())
}

fn to_yaml<T: Serialize>(value: &T) -> Result<String> {
    serde_yaml::to_string(value)
        .map_err(|e| RiggingError::config(format!("malformed manifest: {e}")))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rigging_common::types::PortMap;
    use rigging_core::backend::Scope;
    use rigging_core::command::Command;
    use rigging_core::options::StartOptions;

    use super::*;

    fn scope() -> Scope {
        Scope {
            name: "e2e".into(),
            dir: PathBuf::from("/tmp/rigging_e2e_abc"),
            verbose: false,
        }
    }

    fn render(ports: &PortMap, options: &StartOptions) -> Result<String> {
        let scope = scope();
        let dir = scope.dir.join("app");
        let internal = PathBuf::from("/shared/app");
        workload_manifest(&LaunchSpec {
            scope: &scope,
            name: "app",
            ports,
            dir: &dir,
            internal_dir: &internal,
            options,
        })
    }

    fn documents(yaml: &str) -> Vec<serde_yaml::Value> {
        yaml.split("---\n")
            .map(|doc| serde_yaml::from_str(doc).expect("valid yaml"))
            .collect()
    }

    #[test]
    fn deployment_and_service_for_declared_ports() {
        let ports = PortMap::from([("http".into(), 9090), ("grpc".into(), 10901)]);
        let options = StartOptions::new("prom/prometheus:v2.53.0")
            .env("LOG", "debug")
            .user("1000:2000")
            .memory_limit(268_435_456)
            .cpu_limit(0.5)
            .capability("NET_ADMIN")
            .volume("/tmp/rigging_e2e_abc/data:/data:ro")
            .command(Command::new("--config.file=/etc/prom.yml", Vec::<String>::new()));

        let docs = documents(&render(&ports, &options).expect("manifest renders"));
        assert_eq!(docs.len(), 2);

        let deployment = &docs[0];
        assert_eq!(deployment["kind"], "Deployment");
        assert_eq!(deployment["metadata"]["name"], "app");
        assert_eq!(deployment["metadata"]["labels"]["rigging.scope"], "e2e");
        assert_eq!(deployment["spec"]["replicas"], 1);

        let pod = &deployment["spec"]["template"]["spec"];
        assert!(pod.get("hostPID").is_none());
        let container = &pod["containers"][0];
        assert_eq!(container["image"], "prom/prometheus:v2.53.0");
        assert!(container.get("command").is_none());
        assert_eq!(container["args"][0], "--config.file=/etc/prom.yml");
        assert_eq!(container["ports"][0]["name"], "grpc");
        assert_eq!(container["ports"][0]["containerPort"], 10901);
        assert_eq!(container["env"][0]["name"], "LOG");
        assert_eq!(container["resources"]["limits"]["memory"], "268435456");
        assert_eq!(container["resources"]["limits"]["cpu"], "0.5");
        assert_eq!(container["securityContext"]["runAsUser"], 1000);
        assert_eq!(container["securityContext"]["runAsGroup"], 2000);
        assert_eq!(container["securityContext"]["capabilities"]["add"][0], "NET_ADMIN");
        assert_eq!(container["volumeMounts"][0]["mountPath"], "/shared");
        assert_eq!(container["volumeMounts"][1]["mountPath"], "/data");
        assert_eq!(container["volumeMounts"][1]["readOnly"], true);
        assert_eq!(pod["volumes"][0]["hostPath"]["path"], "/rigging-shared");
        assert_eq!(pod["volumes"][1]["hostPath"]["path"], "/rigging-shared/data");

        let service = &docs[1];
        assert_eq!(service["kind"], "Service");
        assert_eq!(service["spec"]["type"], "NodePort");
        assert_eq!(service["spec"]["selector"]["app"], "app");
        assert_eq!(service["spec"]["ports"][1]["name"], "http");
        assert_eq!(service["spec"]["ports"][1]["port"], 9090);
    }

    #[test]
    fn no_service_without_ports() {
        let options = StartOptions::new("busybox");
        let docs = documents(&render(&PortMap::new(), &options).expect("manifest renders"));
        assert_eq!(docs.len(), 1);
        assert!(docs[0]["spec"]["template"]["spec"]["containers"][0]
            .get("securityContext")
            .is_none());
    }

    #[test]
    fn disabled_entrypoint_becomes_command() {
        let options = StartOptions::new("busybox")
            .privileged(true)
            .pid_mode(PidMode::Host)
            .command(Command::with_entrypoint_disabled("sh", ["-c", "sleep 3600"]));
        let docs = documents(&render(&PortMap::new(), &options).expect("manifest renders"));
        let pod = &docs[0]["spec"]["template"]["spec"];
        assert_eq!(pod["hostPID"], true);
        assert_eq!(pod["containers"][0]["command"][0], "sh");
        assert_eq!(pod["containers"][0]["args"][1], "sleep 3600");
        assert_eq!(pod["containers"][0]["securityContext"]["privileged"], true);
    }

    #[test]
    fn invalid_port_name_is_config_error() {
        let ports = PortMap::from([("http_admin_port".into(), 8080)]);
        let err = render(&ports, &StartOptions::new("busybox")).unwrap_err();
        assert!(matches!(err, RiggingError::Config { .. }), "{err}");
    }

    #[test]
    fn non_numeric_user_is_config_error() {
        let options = StartOptions::new("busybox").user("nobody");
        assert!(render(&PortMap::new(), &options).is_err());
    }

    #[test]
    fn malformed_volume_is_config_error() {
        let options = StartOptions::new("busybox").volume("/only-host");
        assert!(render(&PortMap::new(), &options).is_err());
    }

    #[test]
    fn kind_config_mounts_shared_dir() {
        let yaml = kind_config(Path::new("/tmp/rigging_e2e_abc")).expect("renders");
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).expect("valid yaml");
        assert_eq!(doc["kind"], "Cluster");
        assert_eq!(doc["apiVersion"], "kind.x-k8s.io/v1alpha4");
        let mount = &doc["nodes"][0]["extraMounts"][0];
        assert_eq!(mount["hostPath"], "/tmp/rigging_e2e_abc");
        assert_eq!(mount["containerPath"], "/rigging-shared");
    }
}
