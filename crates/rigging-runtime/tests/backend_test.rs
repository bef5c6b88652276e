//! End-to-end tests against real container engines.
//!
//! These need a working `docker` daemon (and `kind` plus `kubectl` for the
//! cluster test) and pull public images, so they are ignored by default.
//! Run them with `cargo test -p rigging-runtime -- --ignored`.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use rigging_common::config::{BackoffConfig, EnvironmentConfig};
use rigging_common::constants::STOPPED_ENDPOINT;
use rigging_common::error::RiggingError;
use rigging_core::command::{Command, ExecOptions};
use rigging_core::environment::Environment;
use rigging_core::options::StartOptions;
use rigging_core::probe::{HttpProbe, ReadinessProbe};
use rigging_runtime::backend::BackendKind;
use rigging_runtime::logs::read_logs;

const HTTP_IMAGE: &str = "nginx:1.27-alpine";
const SHELL_IMAGE: &str = "busybox:1.36";

fn environment(kind: BackendKind, name: &str, base: &std::path::Path) -> Environment {
    let mut config = EnvironmentConfig::new(name);
    config.base_dir = Some(base.to_path_buf());
    config.ready_backoff = BackoffConfig::new(
        Duration::from_millis(300),
        Duration::from_secs(1),
        120,
    )
    .unwrap();
    let backend = kind.create(&config).expect("backend tools should be installed");
    Environment::new(config, backend).expect("environment should build")
}

fn nginx() -> StartOptions {
    StartOptions::new(HTTP_IMAGE).readiness(HttpProbe::new("http", "/").body_contains("nginx"))
}

#[test]
#[ignore = "requires a docker daemon"]
fn docker_runnable_serves_and_execs() {
    let base = tempfile::tempdir().unwrap();
    let env = environment(BackendKind::Docker, "rigging-docker-e2e", base.path());

    let web = env
        .runnable("web")
        .unwrap()
        .with_port("http", 80)
        .init(nginx())
        .unwrap();
    web.start().unwrap();
    web.wait_ready().unwrap();

    let endpoint = web.endpoint("http");
    assert!(endpoint.starts_with("127.0.0.1:"), "{endpoint}");
    assert_eq!(web.internal_endpoint("http"), "rigging-docker-e2e-web:80");

    let output = web
        .exec(&Command::new("cat", ["/etc/hostname"]), ExecOptions::default())
        .unwrap();
    assert_eq!(output.stdout.trim(), "rigging-docker-e2e-web");

    let err = web
        .exec(&Command::new("false", Vec::<String>::new()), ExecOptions::default())
        .unwrap_err();
    assert!(matches!(err, RiggingError::ExecFailed { .. }), "{err}");

    web.stop().unwrap();
    assert_eq!(web.endpoint("http"), STOPPED_ENDPOINT);
    assert!(read_logs(env.shared_dir(), "web").unwrap().contains("docker"));
}

#[test]
#[ignore = "requires a docker daemon"]
fn docker_runnables_reach_each_other_and_share_the_directory() {
    let base = tempfile::tempdir().unwrap();
    let env = environment(BackendKind::Docker, "rigging-docker-net", base.path());

    let web = env
        .runnable("web")
        .unwrap()
        .with_port("http", 80)
        .init(nginx())
        .unwrap();
    web.start().unwrap();
    web.wait_ready().unwrap();

    let client = env.runnable("client").unwrap().future().unwrap();
    std::fs::create_dir_all(client.dir()).unwrap();
    std::fs::write(client.dir().join("marker"), "shared").unwrap();
    let target = format!("http://{}/", web.internal_endpoint("http"));
    let marker = client.internal_dir().join("marker").display().to_string();
    let client = client
        .init(
            StartOptions::new(SHELL_IMAGE)
                .command(Command::new("sleep", ["3600"]))
                .readiness(ReadinessProbe::command(Command::new(
                    "wget",
                    ["-q", "-O", "-", target.as_str()],
                ))),
        )
        .unwrap();
    client.start().unwrap();
    client.wait_ready().unwrap();

    let output = client
        .exec(&Command::new("cat", [marker.as_str()]), ExecOptions::default())
        .unwrap();
    assert_eq!(output.stdout, "shared");

    env.close();
    assert!(!client.is_running());
    assert!(!web.is_running());
}

#[test]
#[ignore = "requires a docker daemon"]
fn docker_start_failure_is_reported() {
    let base = tempfile::tempdir().unwrap();
    let env = environment(BackendKind::Docker, "rigging-docker-fail", base.path());

    let broken = env
        .runnable("broken")
        .unwrap()
        .init(StartOptions::new("rigging.invalid/no-such-image:0"))
        .unwrap();
    assert!(broken.start().is_err());
    assert!(!broken.is_running());
}

#[test]
#[ignore = "requires docker, kind, and kubectl"]
fn kind_runnable_serves_through_node_port() {
    let base = tempfile::tempdir().unwrap();
    let env = environment(BackendKind::Kind, "rigging-kind-e2e", base.path());

    let web = env
        .runnable("web")
        .unwrap()
        .with_port("http", 80)
        .init(nginx())
        .unwrap();
    web.start().unwrap();
    web.wait_ready().unwrap();

    assert_eq!(web.internal_endpoint("http"), "web:80");
    assert_eq!(web.internal_dir(), std::path::Path::new("/shared/web"));
    assert!(!web.endpoint("http").is_empty());

    let output = web
        .exec(&Command::new("ls", ["/shared"]), ExecOptions::default())
        .unwrap();
    assert!(output.stdout.contains("logs"), "{}", output.stdout);

    web.kill().unwrap();
    assert_eq!(web.endpoint("http"), STOPPED_ENDPOINT);
}
