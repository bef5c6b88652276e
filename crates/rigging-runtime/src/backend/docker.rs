//! Docker CLI backend.
//!
//! Every environment owns one bridge network named after the scope. Every
//! runnable is one attached `docker run --rm` child process whose container
//! is named `<scope>-<runnable>`, so in-network addresses are known before
//! anything starts. Host ports are published dynamically and discovered
//! with `docker port` once the container runs.

use std::path::PathBuf;
use std::process::{Child, ExitStatus};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rigging_common::config::{BackoffConfig, EnvironmentConfig};
use rigging_common::constants::{SCOPE_LABEL, STOP_GRACE};
use rigging_common::error::{Result, RiggingError};
use rigging_common::types::{PidMode, PortMap};
use rigging_core::backend::{Backend, LaunchSpec, Scope, Workload};
use rigging_core::backoff::Backoff;
use rigging_core::command::{Command, ExecOptions, ExecOutput};

use crate::exec::{Tool, reap};
use crate::logs::{LogCapture, append_log};

/// Drives the docker CLI.
#[derive(Debug)]
pub struct DockerBackend {
    docker: Tool,
    host_address: String,
    start_backoff: BackoffConfig,
}

impl DockerBackend {
    /// Locates `docker` and captures the host address used for published
    /// ports.
    ///
    /// # Errors
    ///
    /// Returns [`RiggingError::ToolNotFound`] if `docker` is not installed.
    pub fn new(config: &EnvironmentConfig) -> Result<Self> {
        Ok(Self {
            docker: Tool::locate("docker")?,
            host_address: config.docker_host_address.clone(),
            start_backoff: config.ready_backoff,
        })
    }

    fn scope_filter(scope: &Scope) -> String {
        format!("label={SCOPE_LABEL}={}", scope.name)
    }

    fn remove_leftover_containers(&self, scope: &Scope) {
        let filter = Self::scope_filter(scope);
        match self
            .docker
            .output(&["ps", "-a", "--quiet", "--filter", filter.as_str()])
        {
            Ok(ids) => {
                for id in ids.lines().map(str::trim).filter(|id| !id.is_empty()) {
                    tracing::info!(scope = %scope.name, container = id, "removing leftover container");
                    self.docker.run_best_effort(&["rm", "--force", id]);
                }
            }
            Err(err) => {
                tracing::warn!(scope = %scope.name, error = %err, "failed to list leftover containers");
            }
        }
    }

    fn is_running(&self, container: &str) -> Result<bool> {
        let args = ["inspect", "-f", "{{json .State.Running}}", container];
        let output = self.docker.output(&args)?;
        parse_running(&self.docker.describe(&args), &output)
    }

    fn wait_running(&self, workload: &DockerWorkload) -> Result<()> {
        let mut backoff = Backoff::new(self.start_backoff);
        let mut last_error = RiggingError::probe("container was never inspected");
        while backoff.ongoing() {
            if let Some(status) = workload.exit_status() {
                return Err(RiggingError::Tool {
                    command: format!("docker run {}", workload.container),
                    status: status.to_string(),
                    stderr: "container exited before it was seen running; see its log file".into(),
                });
            }
            match self.is_running(&workload.container) {
                Ok(true) => return Ok(()),
                Ok(false) => last_error = RiggingError::probe("container is not running yet"),
                Err(err) => last_error = err,
            }
            backoff.wait();
        }
        Err(RiggingError::NotReady {
            name: workload.runnable.clone(),
            attempts: backoff.retries(),
            source: Box::new(last_error),
        })
    }

    fn resolve_host_ports(&self, container: &str, ports: &PortMap) -> Result<PortMap> {
        let mut host_ports = PortMap::new();
        for (port_name, container_port) in ports {
            let target = format!("{container_port}/tcp");
            let args = ["port", container, target.as_str()];
            let output = self.docker.output(&args)?;
            let host_port = parse_port_output(&self.docker.describe(&args), &output)?;
            tracing::debug!(container, port = %port_name, container_port, host_port, "port resolved");
            let _ = host_ports.insert(port_name.clone(), host_port);
        }
        Ok(host_ports)
    }
}

impl Backend for DockerBackend {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn create_scope(&self, scope: &Scope) -> Result<()> {
        // Leftovers of a crashed run with the same name.
        self.remove_leftover_containers(scope);
        if self
            .docker
            .run(&["network", "inspect", scope.name.as_str()])
            .is_ok()
        {
            tracing::info!(scope = %scope.name, "removing leftover network");
            self.docker
                .run_best_effort(&["network", "rm", scope.name.as_str()]);
        }

        let label = format!("{SCOPE_LABEL}={}", scope.name);
        self.docker.run(&[
            "network",
            "create",
            "-d",
            "bridge",
            "--label",
            label.as_str(),
            scope.name.as_str(),
        ])?;
        tracing::info!(scope = %scope.name, "docker network created");
        Ok(())
    }

    fn destroy_scope(&self, scope: &Scope) {
        self.remove_leftover_containers(scope);
        self.docker
            .run_best_effort(&["network", "rm", scope.name.as_str()]);
        tracing::info!(scope = %scope.name, "docker network removed");
    }

    fn internal_dir(&self, scope: &Scope, runnable: &str) -> PathBuf {
        scope.dir.join(runnable)
    }

    fn internal_endpoint(&self, scope: &Scope, runnable: &str, port: u16) -> String {
        format!("{}:{port}", container_name(&scope.name, runnable))
    }

    fn launch(&self, spec: &LaunchSpec<'_>) -> Result<Box<dyn Workload>> {
        let container = container_name(&spec.scope.name, spec.name);
        let args = run_args(spec);
        append_log(
            &spec.scope.dir,
            spec.name,
            &format!("$ {}", self.docker.describe(&args)),
        )?;

        let mut child = self.docker.spawn(&args)?;
        let logs = match LogCapture::attach(
            &mut child,
            &spec.scope.dir,
            spec.name,
            spec.scope.verbose,
        ) {
            Ok(logs) => logs,
            Err(err) => {
                self.docker
                    .run_best_effort(&["rm", "--force", container.as_str()]);
                reap(&mut child);
                return Err(err);
            }
        };

        let mut workload = DockerWorkload {
            docker: self.docker.clone(),
            runnable: spec.name.to_string(),
            container,
            host_address: self.host_address.clone(),
            host_ports: PortMap::new(),
            process: Mutex::new(Some(RunProcess { child, logs })),
        };

        let resolved = self
            .wait_running(&workload)
            .and_then(|()| self.resolve_host_ports(&workload.container, spec.ports));
        match resolved {
            Ok(host_ports) => {
                workload.host_ports = host_ports;
                Ok(Box::new(workload))
            }
            Err(err) => {
                tracing::warn!(
                    runnable = %spec.name,
                    error = %err,
                    "start failed, removing container"
                );
                workload.remove();
                Err(err)
            }
        }
    }
}

#[derive(Debug)]
struct RunProcess {
    child: Child,
    logs: LogCapture,
}

#[derive(Debug)]
struct DockerWorkload {
    docker: Tool,
    runnable: String,
    container: String,
    host_address: String,
    host_ports: PortMap,
    process: Mutex<Option<RunProcess>>,
}

impl DockerWorkload {
    fn lock_process(&self) -> MutexGuard<'_, Option<RunProcess>> {
        self.process.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn exit_status(&self) -> Option<ExitStatus> {
        self.lock_process()
            .as_mut()
            .and_then(|p| p.child.try_wait().ok().flatten())
    }

    fn reap(&self) {
        if let Some(mut process) = self.lock_process().take() {
            reap(&mut process.child);
            process.logs.join();
        }
    }

    fn remove(&self) {
        self.docker
            .run_best_effort(&["rm", "--force", self.container.as_str()]);
        self.reap();
    }

    fn halt(&self, args: &[&str]) -> Result<()> {
        if let Err(err) = self.docker.run(args) {
            if self.exit_status().is_none() {
                return Err(err);
            }
            tracing::debug!(container = %self.container, error = %err, "container already exited");
        }
        self.reap();
        Ok(())
    }
}

impl Workload for DockerWorkload {
    fn host_ports(&self) -> &PortMap {
        &self.host_ports
    }

    fn host_address(&self) -> &str {
        &self.host_address
    }

    fn stop(&self) -> Result<()> {
        let grace = format!("--time={}", STOP_GRACE.as_secs());
        self.halt(&["stop", grace.as_str(), self.container.as_str()])
    }

    fn kill(&self) -> Result<()> {
        self.halt(&["kill", self.container.as_str()])
    }

    fn exec(&self, command: &Command, options: ExecOptions) -> Result<ExecOutput> {
        if command.is_empty() {
            return Err(RiggingError::config(format!(
                "exec in {}: command is empty",
                self.runnable
            )));
        }
        let mut args = vec!["exec".to_string(), self.container.clone()];
        args.extend(command.argv());
        self.docker.exec(&args, options)
    }
}

/// Container name (and hostname) of `runnable` in `scope`.
#[must_use]
pub fn container_name(scope: &str, runnable: &str) -> String {
    format!("{scope}-{runnable}")
}

/// Builds the `docker run` argument list for a launch.
#[must_use]
pub fn run_args(spec: &LaunchSpec<'_>) -> Vec<String> {
    let scope = &spec.scope.name;
    let container = container_name(scope, spec.name);
    let dir = spec.scope.dir.display();
    let opts = spec.options;

    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        format!("--net={scope}"),
        format!("--name={container}"),
        format!("--hostname={container}"),
        "--label".to_string(),
        format!("{SCOPE_LABEL}={scope}"),
        "-v".to_string(),
        format!("{dir}:{dir}:z"),
    ];
    for (key, value) in &opts.env {
        args.push("-e".to_string());
        args.push(format!("{key}={value}"));
    }
    if let Some(user) = &opts.user {
        args.push(format!("--user={user}"));
    }
    for port in spec.ports.values() {
        args.push("-p".to_string());
        args.push(port.to_string());
    }
    for volume in &opts.volumes {
        args.push("-v".to_string());
        args.push(volume.clone());
    }
    if let Some(bytes) = opts.limits.memory_bytes {
        args.push(format!("--memory={bytes}b"));
    }
    if let Some(cpus) = opts.limits.cpus {
        args.push(format!("--cpus={cpus}"));
    }
    if opts.privileged {
        args.push("--privileged".to_string());
    }
    for capability in &opts.capabilities {
        args.push(format!("--cap-add={capability}"));
    }
    if opts.pid_mode == PidMode::Host {
        args.push("--pid=host".to_string());
    }

    match &opts.command {
        Some(command) if command.entrypoint_disabled => {
            args.push(format!("--entrypoint={}", command.cmd));
            args.push(opts.image.clone());
            args.extend(command.args.iter().cloned());
        }
        Some(command) => {
            args.push(opts.image.clone());
            if !command.cmd.is_empty() {
                args.push(command.cmd.clone());
            }
            args.extend(command.args.iter().cloned());
        }
        None => args.push(opts.image.clone()),
    }
    args
}

/// Parses `docker inspect -f '{{json .State.Running}}'` output.
///
/// # Errors
///
/// Returns [`RiggingError::Parse`] unless the output is `true` or `false`.
pub fn parse_running(command: &str, output: &str) -> Result<bool> {
    match output.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(RiggingError::Parse {
            command: command.to_string(),
            message: "expected true or false".into(),
            output: output.to_string(),
        }),
    }
}

/// Parses `docker port <container> <port>` output into the host port.
///
/// Every non-empty line must be `address:port`. One line per address family
/// is accepted as long as all of them report the same port; any other shape
/// is an error.
///
/// # Errors
///
/// Returns [`RiggingError::Parse`] on an empty, malformed, or conflicting
/// mapping.
pub fn parse_port_output(command: &str, output: &str) -> Result<u16> {
    let parse_error = |message: String| RiggingError::Parse {
        command: command.to_string(),
        message,
        output: output.to_string(),
    };

    let mut resolved: Option<u16> = None;
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((address, port)) = line.rsplit_once(':') else {
            return Err(parse_error(format!("line {line:?} is not address:port")));
        };
        if address.is_empty() {
            return Err(parse_error(format!("line {line:?} has no address")));
        }
        let port: u16 = port
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| parse_error(format!("line {line:?} has no valid port")))?;
        match resolved {
            Some(previous) if previous != port => {
                return Err(parse_error(format!(
                    "conflicting host ports {previous} and {port}"
                )));
            }
            _ => resolved = Some(port),
        }
    }
    resolved.ok_or_else(|| parse_error("no port mapping reported".into()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use rigging_core::options::StartOptions;

    use super::*;

    fn scope() -> Scope {
        Scope {
            name: "e2e".into(),
            dir: PathBuf::from("/tmp/rigging_e2e_abc"),
            verbose: false,
        }
    }

    #[test]
    fn run_args_cover_all_options() {
        let scope = scope();
        let ports: PortMap = BTreeMap::from([("http".into(), 9090), ("grpc".into(), 10901)]);
        let options = StartOptions::new("quay.io/thanos/thanos:v0.35.0")
            .env("B", "2")
            .env("A", "1")
            .user("1000:1000")
            .volume("/data:/data:ro")
            .memory_limit(1024)
            .cpu_limit(0.5)
            .privileged(true)
            .capability("SYS_ADMIN")
            .pid_mode(PidMode::Host)
            .command(Command::new("query", ["--log.level=debug"]));
        let dir = scope.dir.join("querier");
        let spec = LaunchSpec {
            scope: &scope,
            name: "querier",
            ports: &ports,
            dir: &dir,
            internal_dir: &dir,
            options: &options,
        };

        let args = run_args(&spec);
        assert_eq!(
            args,
            vec![
                "run",
                "--rm",
                "--net=e2e",
                "--name=e2e-querier",
                "--hostname=e2e-querier",
                "--label",
                "rigging.scope=e2e",
                "-v",
                "/tmp/rigging_e2e_abc:/tmp/rigging_e2e_abc:z",
                "-e",
                "A=1",
                "-e",
                "B=2",
                "--user=1000:1000",
                "-p",
                "10901",
                "-p",
                "9090",
                "-v",
                "/data:/data:ro",
                "--memory=1024b",
                "--cpus=0.5",
                "--privileged",
                "--cap-add=SYS_ADMIN",
                "--pid=host",
                "quay.io/thanos/thanos:v0.35.0",
                "query",
                "--log.level=debug",
            ]
        );
    }

    #[test]
    fn run_args_disable_entrypoint() {
        let scope = scope();
        let ports = PortMap::new();
        let options = StartOptions::new("busybox")
            .command(Command::with_entrypoint_disabled("sh", ["-c", "sleep 1"]));
        let spec = LaunchSpec {
            scope: &scope,
            name: "job",
            ports: &ports,
            dir: &scope.dir,
            internal_dir: &scope.dir,
            options: &options,
        };

        let args = run_args(&spec);
        let tail: Vec<_> = args.iter().rev().take(4).rev().cloned().collect();
        assert_eq!(tail, vec!["--entrypoint=sh", "busybox", "-c", "sleep 1"]);
    }

    #[test]
    fn run_args_image_default_command() {
        let scope = scope();
        let ports = PortMap::new();
        let options = StartOptions::new("redis:7");
        let spec = LaunchSpec {
            scope: &scope,
            name: "cache",
            ports: &ports,
            dir: &scope.dir,
            internal_dir: &scope.dir,
            options: &options,
        };
        assert_eq!(run_args(&spec).last().map(String::as_str), Some("redis:7"));
    }

    #[test]
    fn port_output_single_family() {
        assert_eq!(parse_port_output("docker port", "0.0.0.0:49153\n").unwrap(), 49153);
    }

    #[test]
    fn port_output_both_families_same_port() {
        let out = "0.0.0.0:49153\n[::]:49153\n";
        assert_eq!(parse_port_output("docker port", out).unwrap(), 49153);
    }

    #[test]
    fn port_output_conflicting_ports_is_error() {
        let err = parse_port_output("docker port", "0.0.0.0:49153\n[::]:49154\n").unwrap_err();
        assert!(matches!(err, RiggingError::Parse { .. }), "{err}");
        assert!(err.to_string().contains("conflicting"));
    }

    #[test]
    fn port_output_malformed_is_error() {
        for out in ["", "\n", "49153", ":49153", "0.0.0.0:http", "0.0.0.0:0"] {
            assert!(
                parse_port_output("docker port", out).is_err(),
                "accepted {out:?}"
            );
        }
    }

    #[test]
    fn running_flag_parsing() {
        assert!(parse_running("inspect", "true\n").unwrap());
        assert!(!parse_running("inspect", "false").unwrap());
        assert!(parse_running("inspect", "null").is_err());
    }

    #[test]
    fn container_names_are_scoped() {
        assert_eq!(container_name("e2e", "prometheus"), "e2e-prometheus");
    }
}
