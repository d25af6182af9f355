use crate::domain::{
    ContainerEngine, CreateContainerOptions, EngineError, PullImageOptions, RemoveContainerOptions,
};
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::process::{Command, Output, Stdio};
use std::thread;
use tracing::debug;

/// Engine client that drives a docker-compatible CLI (`docker`, `podman`).
#[derive(Debug, Clone)]
pub struct CliEngine {
    binary: String,
}

impl CliEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn docker() -> Self {
        Self::new("docker")
    }

    pub fn podman() -> Self {
        Self::new("podman")
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn output<I, S>(&self, args: I, context: &str) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args);
        debug!(command = ?cmd, "running engine command");

        cmd.stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(&self.binary, e))
            .with_context(|| context.to_string())
    }

    fn run<I, S>(&self, args: I, subject: &str, context: &str) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.output(args, context)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify(&self.binary, subject, &output.status.to_string(), &stderr))
                .with_context(|| context.to_string());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for CliEngine {
    fn default() -> Self {
        Self::docker()
    }
}

impl ContainerEngine for CliEngine {
    fn create_container(&self, options: &CreateContainerOptions) -> Result<String> {
        let args = create_args(options);
        let id = self.run(
            &args,
            &options.name,
            &format!("creating container {}", options.name),
        )?;

        // Some engines print warnings before the id.
        Ok(id.lines().last().unwrap_or_default().trim().to_string())
    }

    fn start_container(&self, id: &str) -> Result<()> {
        self.run(["start", id], id, &format!("starting container {id}"))
            .map(drop)
    }

    fn stop_container(&self, id: &str, grace_secs: u64) -> Result<()> {
        let grace = grace_secs.to_string();
        self.run(
            ["stop", "-t", grace.as_str(), id],
            id,
            &format!("stopping container {id}"),
        )
        .map(drop)
    }

    fn remove_container(&self, options: &RemoveContainerOptions) -> Result<()> {
        let mut args = vec!["rm"];
        if options.force {
            args.push("-f");
        }
        if options.remove_volumes {
            args.push("-v");
        }
        args.push(&options.id);

        self.run(
            args,
            &options.id,
            &format!("removing container {}", options.id),
        )
        .map(drop)
    }

    fn pull_image(&self, options: &PullImageOptions, output: &mut dyn Write) -> Result<()> {
        let reference = options.reference();
        let context = format!("pulling image {reference}");

        let mut child = Command::new(&self.binary)
            .args(["pull", reference.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(&self.binary, e))
            .with_context(|| context.clone())?;

        // A full stderr pipe blocks the engine before stdout closes.
        let stderr = child.stderr.take();
        let drain = thread::spawn(move || {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut buf);
            }
            buf
        });

        let copied = match child.stdout.take() {
            Some(mut stdout) => io::copy(&mut stdout, &mut *output).map(drop),
            None => Ok(()),
        };
        if let Err(e) = copied {
            let _ = child.kill();
            let _ = child.wait();
            let _ = drain.join();
            return Err(e).with_context(|| context.clone());
        }

        let status = child.wait().with_context(|| context.clone())?;
        let stderr = drain.join().unwrap_or_default();
        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(classify(
                &self.binary,
                &reference,
                &status.to_string(),
                &stderr,
            ))
            .with_context(|| context.clone());
        }

        output.flush()?;
        Ok(())
    }
}

/// Translates create options into `<engine> create` arguments.
///
/// `--pull never` keeps a missing image a create failure instead of an
/// implicit pull, so the caller decides when to hit the registry.
pub fn create_args(options: &CreateContainerOptions) -> Vec<String> {
    let mut args: Vec<String> = vec!["create".into(), "--pull".into(), "never".into()];

    if !options.name.is_empty() {
        args.push("--name".into());
        args.push(options.name.clone());
    }

    for port in options.config.exposed_ports.keys() {
        args.push("--expose".into());
        args.push(port.clone());
    }

    for (port, bindings) in &options.host_config.port_bindings {
        for binding in bindings {
            args.push("-p".into());
            args.push(match &binding.host_ip {
                Some(ip) if !ip.is_empty() => format!("{ip}:{}:{port}", binding.host_port),
                _ => format!("{}:{port}", binding.host_port),
            });
        }
    }

    if options.host_config.publish_all_ports {
        args.push("--publish-all".into());
    }

    if options.host_config.privileged {
        args.push("--privileged".into());
    }

    for bind in &options.host_config.binds {
        args.push("-v".into());
        args.push(bind.clone());
    }

    if let Some(network) = &options.host_config.network_mode {
        args.push("--network".into());
        args.push(network.clone());
    }

    if let Some(user) = &options.config.user {
        args.push("--user".into());
        args.push(user.clone());
    }

    if let Some(dir) = &options.config.working_dir {
        args.push("--workdir".into());
        args.push(dir.clone());
    }

    // The CLI takes a single entrypoint word; the rest lead the command.
    let (entrypoint, entrypoint_args) = match options.config.entrypoint.as_deref() {
        Some([first, rest @ ..]) => (Some(first.clone()), rest),
        Some([]) => (Some(String::new()), &[][..]),
        None => (None, &[][..]),
    };
    if let Some(entrypoint) = entrypoint {
        args.push("--entrypoint".into());
        args.push(entrypoint);
    }

    for env in &options.config.env {
        args.push("-e".into());
        args.push(env.clone());
    }

    for (key, value) in &options.config.labels {
        args.push("--label".into());
        args.push(format!("{key}={value}"));
    }

    args.push(options.config.image.clone());
    args.extend(entrypoint_args.iter().cloned());

    if let Some(cmd) = &options.config.cmd {
        args.extend(cmd.iter().cloned());
    }

    args
}

/// Maps engine stderr onto the error kinds callers act upon.
pub fn classify(binary: &str, subject: &str, status: &str, stderr: &str) -> anyhow::Error {
    let lower = stderr.to_lowercase();

    let err = if lower.contains("no such container") {
        EngineError::ContainerNotFound(subject.to_string())
    } else if lower.contains("no such image")
        || lower.contains("unable to find image")
        || lower.contains("image not known")
        || lower.contains("manifest unknown")
        || lower.contains("pull access denied")
    {
        EngineError::ImageNotFound(subject.to_string())
    } else if lower.contains("already in use") || lower.contains("conflict") {
        EngineError::NameConflict(subject.to_string())
    } else if lower.contains("cannot connect to the docker daemon")
        || lower.contains("is the docker daemon running")
        || lower.contains("unable to connect to podman")
    {
        EngineError::Unreachable(stderr.trim().to_string())
    } else {
        EngineError::Command {
            command: binary.to_string(),
            status: status.to_string(),
            stderr: stderr.trim().to_string(),
        }
    };

    err.into()
}

fn spawn_error(binary: &str, e: io::Error) -> anyhow::Error {
    if e.kind() == io::ErrorKind::NotFound {
        EngineError::Unreachable(format!("`{binary}` not found on PATH")).into()
    } else {
        anyhow::Error::new(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Blueprint;

    fn position(args: &[String], flag: &str) -> usize {
        args.iter().position(|a| a == flag).unwrap()
    }

    #[test]
    fn test_rabbitmq_create_args() {
        let options = Blueprint::rabbitmq().container_options();
        let args = create_args(&options);

        assert_eq!(&args[..3], &["create", "--pull", "never"]);
        assert_eq!(args[position(&args, "--name") + 1], options.name);
        assert_eq!(args[position(&args, "--expose") + 1], "5672/tcp");
        assert_eq!(args[position(&args, "-p") + 1], "35672:5672/tcp");
        assert!(args.contains(&"--publish-all".to_string()));
        assert!(!args.contains(&"--privileged".to_string()));
        assert_eq!(args.last().unwrap(), "rabbitmq");
    }

    #[test]
    fn test_create_args_host_ip_env_and_cmd() {
        let mut options = CreateContainerOptions {
            name: "fixture".into(),
            ..Default::default()
        };
        options.config.image = "postgis/postgis:16-3.4".into();
        options.config.env = vec!["POSTGRES_PASSWORD=secret".into()];
        options.config.cmd = Some(vec!["postgres".into(), "-c".into(), "fsync=off".into()]);
        options.host_config.privileged = true;
        options.host_config.port_bindings.insert(
            "5432/tcp".into(),
            vec![crate::domain::PortBinding {
                host_ip: Some("127.0.0.1".into()),
                host_port: "45432".into(),
            }],
        );

        let args = create_args(&options);

        assert_eq!(args[position(&args, "-p") + 1], "127.0.0.1:45432:5432/tcp");
        assert_eq!(args[position(&args, "-e") + 1], "POSTGRES_PASSWORD=secret");
        assert!(args.contains(&"--privileged".to_string()));
        let image_at = position(&args, "postgis/postgis:16-3.4");
        assert_eq!(&args[image_at + 1..], &["postgres", "-c", "fsync=off"]);
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify(
            "docker",
            "abc",
            "exit status: 1",
            "Error response from daemon: No such container: abc",
        );
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::ContainerNotFound(id)) if id == "abc"
        ));
    }

    #[test]
    fn test_classify_missing_image() {
        let err = classify(
            "docker",
            "conjured-rabbitmq-1a2b3c",
            "exit status: 125",
            "Unable to find image 'rabbitmq:latest' locally\nError: No such image: rabbitmq:latest",
        );
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::ImageNotFound(_))
        ));
    }

    #[test]
    fn test_classify_name_conflict_and_daemon() {
        let conflict = classify(
            "docker",
            "x",
            "exit status: 125",
            "Conflict. The container name \"/x\" is already in use",
        );
        assert!(matches!(
            conflict.downcast_ref::<EngineError>(),
            Some(EngineError::NameConflict(_))
        ));

        let daemon = classify(
            "docker",
            "x",
            "exit status: 1",
            "Cannot connect to the Docker daemon at unix:///var/run/docker.sock.",
        );
        assert!(matches!(
            daemon.downcast_ref::<EngineError>(),
            Some(EngineError::Unreachable(_))
        ));
    }

    #[test]
    fn test_classify_unknown_keeps_stderr() {
        let err = classify("podman", "x", "exit status: 2", "  something odd  ");
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Command { stderr, .. }) if stderr == "something odd"
        ));
    }

    #[test]
    fn test_missing_binary_is_unreachable() {
        let engine = CliEngine::new("conjure-no-such-engine-binary");
        let err = engine.start_container("abc").unwrap_err();

        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::Unreachable(_))
        ));
    }

    #[test]
    fn test_create_args_binds_network_user_and_entrypoint() {
        let mut options = CreateContainerOptions {
            name: "fx".into(),
            ..Default::default()
        };
        options.config.image = "redis".into();
        options.config.entrypoint = Some(vec!["/bin/sh".into(), "-c".into()]);
        options.config.cmd = Some(vec!["redis-server --save ''".into()]);
        options.config.user = Some("1000".into());
        options.config.working_dir = Some("/srv".into());
        options.host_config.binds = vec!["/tmp:/data:ro".into()];
        options.host_config.network_mode = Some("host".into());

        let args = create_args(&options);

        assert_eq!(args[position(&args, "-v") + 1], "/tmp:/data:ro");
        assert_eq!(args[position(&args, "--network") + 1], "host");
        assert_eq!(args[position(&args, "--user") + 1], "1000");
        assert_eq!(args[position(&args, "--workdir") + 1], "/srv");
        assert_eq!(args[position(&args, "--entrypoint") + 1], "/bin/sh");
        let image_at = position(&args, "redis");
        assert_eq!(&args[image_at + 1..], &["-c", "redis-server --save ''"]);
    }

    #[test]
    fn test_empty_entrypoint_resets_the_image_default() {
        let mut options = CreateContainerOptions::default();
        options.config.image = "busybox".into();
        options.config.entrypoint = Some(Vec::new());

        let args = create_args(&options);

        assert_eq!(args[position(&args, "--entrypoint") + 1], "");
        assert_eq!(args.last().unwrap(), "busybox");
    }

    #[cfg(unix)]
    mod fake_engine {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use std::path::{Path, PathBuf};
        use tempfile::TempDir;

        /// A shell script standing in for the engine CLI. Each invocation
        /// appends its arguments, one per line, to `calls.log`.
        fn install(dir: &TempDir) -> (CliEngine, PathBuf) {
            let log = dir.path().join("calls.log");
            let script = dir.path().join("engine");
            let body = format!(
                r#"#!/bin/sh
printf '%s\n' "$@" >> '{log}'
for last; do :; done
case "$1" in
  pull)
    if [ "$2" = "missing:latest" ]; then
      echo "Error response from daemon: manifest unknown" >&2
      exit 1
    fi
    head -c 262144 /dev/zero | tr '\0' 'x' >&2
    echo "latest: Pulling from library/$2"
    echo "Status: Downloaded newer image for $2"
    ;;
  rm)
    if [ "$last" = "gone" ]; then
      echo "Error: No such container: gone" >&2
      exit 1
    fi
    ;;
esac
"#,
                log = log.display()
            );
            fs::write(&script, body).unwrap();
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

            (CliEngine::new(script.display().to_string()), log)
        }

        fn calls(log: &Path) -> Vec<String> {
            fs::read_to_string(log)
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }

        fn pull_options(repository: &str) -> PullImageOptions {
            PullImageOptions {
                repository: repository.into(),
                tag: "latest".into(),
            }
        }

        struct BrokenSink;

        impl Write for BrokenSink {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        #[test]
        fn test_pull_streams_stdout_despite_noisy_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let (engine, log) = install(&dir);
            let mut output = Vec::new();

            engine
                .pull_image(&pull_options("rabbitmq"), &mut output)
                .unwrap();

            let progress = String::from_utf8(output).unwrap();
            assert!(progress.contains("Pulling from library/rabbitmq:latest"));
            assert!(progress.contains("Status: Downloaded newer image"));
            assert_eq!(calls(&log), vec!["pull", "rabbitmq:latest"]);
        }

        #[test]
        fn test_pull_failure_is_classified() {
            let dir = tempfile::tempdir().unwrap();
            let (engine, _) = install(&dir);

            let err = engine
                .pull_image(&pull_options("missing"), &mut io::sink())
                .unwrap_err();

            assert!(matches!(
                err.downcast_ref::<EngineError>(),
                Some(EngineError::ImageNotFound(reference)) if reference == "missing:latest"
            ));
        }

        #[test]
        fn test_pull_into_broken_sink_returns_error() {
            let dir = tempfile::tempdir().unwrap();
            let (engine, _) = install(&dir);

            let err = engine
                .pull_image(&pull_options("rabbitmq"), &mut BrokenSink)
                .unwrap_err();

            assert!(format!("{err:#}").contains("pulling image rabbitmq:latest"));
        }

        #[test]
        fn test_remove_passes_force_and_volume_flags() {
            let dir = tempfile::tempdir().unwrap();
            let (engine, log) = install(&dir);

            engine
                .remove_container(&RemoveContainerOptions {
                    id: "abc".into(),
                    remove_volumes: true,
                    force: true,
                })
                .unwrap();
            engine
                .remove_container(&RemoveContainerOptions {
                    id: "def".into(),
                    remove_volumes: false,
                    force: false,
                })
                .unwrap();

            assert_eq!(calls(&log), vec!["rm", "-f", "-v", "abc", "rm", "def"]);
        }

        #[test]
        fn test_remove_unknown_container_is_not_found() {
            let dir = tempfile::tempdir().unwrap();
            let (engine, _) = install(&dir);

            let err = engine
                .remove_container(&RemoveContainerOptions {
                    id: "gone".into(),
                    remove_volumes: true,
                    force: true,
                })
                .unwrap_err();

            assert!(matches!(
                err.downcast_ref::<EngineError>(),
                Some(EngineError::ContainerNotFound(id)) if id == "gone"
            ));
        }
    }
}
