//! # Helm CLI
//!
//! [`PackageManager`] backed by the `helm` binary.
//!
//! Every action runs `helm` as a child process with `kill_on_drop`, so a cancelled
//! job (its future dropped) also stops the child. Values, TLS material and other
//! scratch files live in a per-action temporary directory.

use super::package_manager::{PackageManager, ReleaseError, ReleaseFailureReason};
use super::types::{HelmReleaseJson, Release, ReleaseKey, ReleaseRequest};
use crate::crd::ReleaseConfig;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn, Instrument};

/// Helm binary wrapper
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: PathBuf,
    default_timeout: Duration,
}

impl HelmCli {
    pub fn new(binary: PathBuf, default_timeout: Duration) -> Self {
        Self {
            binary,
            default_timeout,
        }
    }

    /// Locate `helm` from an explicit path or on `PATH`
    pub fn discover(explicit: Option<&str>, default_timeout: Duration) -> anyhow::Result<Self> {
        let binary = match explicit {
            Some(path) => PathBuf::from(path),
            None => which::which("helm")
                .map_err(|e| anyhow::anyhow!("helm binary not found on PATH: {e}"))?,
        };
        info!("Using helm binary at {}", binary.display());
        Ok(Self::new(binary, default_timeout))
    }

    fn timeout_for(&self, request: &ReleaseRequest) -> Duration {
        request
            .config
            .timeout_seconds
            .map_or(self.default_timeout, Duration::from_secs)
    }

    async fn run(
        &self,
        action: &'static str,
        key: &ReleaseKey,
        args: Vec<String>,
        timeout: Duration,
    ) -> Result<String, ReleaseError> {
        debug!(release = %key, action, "helm {}", redact_args(&args).join(" "));

        let mut command = Command::new(&self.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Slack on top of helm's own --timeout so helm can report its failure first
        let deadline = timeout + Duration::from_secs(30);
        let output = match tokio::time::timeout(deadline, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ReleaseError::new(
                    action,
                    key,
                    ReleaseFailureReason::BinaryUnavailable,
                    format!("failed to execute {}: {e}", self.binary.display()),
                ))
            }
            Err(_) => {
                return Err(ReleaseError::new(
                    action,
                    key,
                    ReleaseFailureReason::Timeout,
                    format!("helm did not finish within {}s", deadline.as_secs()),
                ))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(release = %key, action, "helm failed: {}", stderr);
            return Err(ReleaseError::new(
                action,
                key,
                classify_helm_error(&stderr),
                stderr,
            ));
        }

        String::from_utf8(output.stdout).map_err(|e| {
            ReleaseError::new(
                action,
                key,
                ReleaseFailureReason::InvalidOutput,
                format!("helm output is not UTF-8: {e}"),
            )
        })
    }

    async fn status(&self, key: &ReleaseKey) -> Result<Release, ReleaseError> {
        let args = vec![
            "status".to_string(),
            key.name.clone(),
            "--namespace".to_string(),
            key.namespace.clone(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let stdout = self
            .run("status", key, args, self.default_timeout)
            .await?;
        parse_release(&stdout, "status", key)
    }
}

#[async_trait]
impl PackageManager for HelmCli {
    async fn template(&self, request: &ReleaseRequest) -> Result<String, ReleaseError> {
        let span = tracing::info_span!("helm.template", release = %request.key);
        async {
            let scratch = scratch_dir("template", &request.key)?;
            let mut args = vec![
                "template".to_string(),
                request.key.name.clone(),
                request.chart.chart.clone(),
                "--namespace".to_string(),
                request.key.namespace.clone(),
            ];
            args.extend(chart_args(request, scratch.path(), "template")?);
            args.extend(value_args(request, scratch.path(), "template")?);
            self.run("template", &request.key, args, self.timeout_for(request))
                .await
        }
        .instrument(span)
        .await
    }

    async fn install_or_upgrade(&self, request: &ReleaseRequest) -> Result<Release, ReleaseError> {
        let span = tracing::info_span!(
            "helm.install_or_upgrade",
            release = %request.key,
            version = %request.chart.version
        );
        async {
            let scratch = scratch_dir("install_or_upgrade", &request.key)?;
            let timeout = self.timeout_for(request);
            let mut args = vec![
                "upgrade".to_string(),
                "--install".to_string(),
                request.key.name.clone(),
                request.chart.chart.clone(),
                "--namespace".to_string(),
                request.key.namespace.clone(),
                "--create-namespace".to_string(),
                "--description".to_string(),
                request.description.clone(),
                "--timeout".to_string(),
                format!("{}s", timeout.as_secs()),
                "--output".to_string(),
                "json".to_string(),
            ];
            args.extend(chart_args(request, scratch.path(), "install_or_upgrade")?);
            args.extend(value_args(request, scratch.path(), "install_or_upgrade")?);
            args.extend(config_flags(&request.config));
            if let Some(max_history) = request.config.max_history {
                args.push("--history-max".to_string());
                args.push(max_history.to_string());
            }

            let stdout = self
                .run("install_or_upgrade", &request.key, args, timeout)
                .await?;
            let release = parse_release(&stdout, "install_or_upgrade", &request.key)?;
            info!(
                "✅ Release {} at revision {} ({})",
                request.key, release.revision, release.chart_version
            );
            Ok(release)
        }
        .instrument(span)
        .await
    }

    async fn uninstall(&self, key: &ReleaseKey) -> Result<(), ReleaseError> {
        let span = tracing::info_span!("helm.uninstall", release = %key);
        async {
            let args = vec![
                "uninstall".to_string(),
                key.name.clone(),
                "--namespace".to_string(),
                key.namespace.clone(),
                "--wait".to_string(),
                "--timeout".to_string(),
                format!("{}s", self.default_timeout.as_secs()),
            ];
            self.run("uninstall", key, args, self.default_timeout)
                .await
                .map(|_| ())
        }
        .instrument(span)
        .await
    }

    async fn rollback(
        &self,
        key: &ReleaseKey,
        revision: i32,
        config: &ReleaseConfig,
    ) -> Result<Release, ReleaseError> {
        let span = tracing::info_span!("helm.rollback", release = %key, revision);
        async {
            let timeout = config
                .timeout_seconds
                .map_or(self.default_timeout, Duration::from_secs);
            let mut args = vec![
                "rollback".to_string(),
                key.name.clone(),
                revision.to_string(),
                "--namespace".to_string(),
                key.namespace.clone(),
                "--timeout".to_string(),
                format!("{}s", timeout.as_secs()),
            ];
            args.extend(config_flags(config));
            if let Some(max_history) = config.max_history {
                args.push("--history-max".to_string());
                args.push(max_history.to_string());
            }
            self.run("rollback", key, args, timeout).await?;
            self.status(key).await
        }
        .instrument(span)
        .await
    }

    async fn last_release(&self, key: &ReleaseKey) -> Result<Option<Release>, ReleaseError> {
        match self.status(key).await {
            Ok(release) => Ok(Some(release)),
            Err(e) if e.reason == ReleaseFailureReason::ReleaseNotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn scratch_dir(action: &'static str, key: &ReleaseKey) -> Result<TempDir, ReleaseError> {
    tempfile::Builder::new()
        .prefix("component-release-")
        .tempdir()
        .map_err(|e| {
            ReleaseError::new(
                action,
                key,
                ReleaseFailureReason::Io,
                format!("failed to create scratch directory: {e}"),
            )
        })
}

fn write_scratch(
    dir: &Path,
    file: &str,
    contents: &[u8],
    action: &'static str,
    key: &ReleaseKey,
) -> Result<String, ReleaseError> {
    let path = dir.join(file);
    std::fs::write(&path, contents).map_err(|e| {
        ReleaseError::new(
            action,
            key,
            ReleaseFailureReason::Io,
            format!("failed to write {file}: {e}"),
        )
    })?;
    Ok(path.to_string_lossy().into_owned())
}

/// Repository, version and credential flags
fn chart_args(
    request: &ReleaseRequest,
    scratch: &Path,
    action: &'static str,
) -> Result<Vec<String>, ReleaseError> {
    let chart = &request.chart;
    let mut args = vec![
        "--repo".to_string(),
        chart.repo_url.clone(),
        "--version".to_string(),
        chart.version.clone(),
    ];
    if chart.insecure {
        args.push("--insecure-skip-tls-verify".to_string());
    }
    if let Some(auth) = &chart.auth {
        if let Some(username) = &auth.username {
            args.push("--username".to_string());
            args.push(username.clone());
        }
        if let Some(password) = &auth.password {
            args.push("--password".to_string());
            args.push(password.clone());
        }
        if let Some(ca) = &auth.ca_data {
            args.push("--ca-file".to_string());
            args.push(write_scratch(scratch, "ca.crt", ca, action, &request.key)?);
        }
        if let Some(cert) = &auth.cert_data {
            args.push("--cert-file".to_string());
            args.push(write_scratch(scratch, "tls.crt", cert, action, &request.key)?);
        }
        if let Some(key) = &auth.key_data {
            args.push("--key-file".to_string());
            args.push(write_scratch(scratch, "tls.key", key, action, &request.key)?);
        }
    }
    Ok(args)
}

/// Values file and `--set`/`--set-string` pairs
fn value_args(
    request: &ReleaseRequest,
    scratch: &Path,
    action: &'static str,
) -> Result<Vec<String>, ReleaseError> {
    let mut args = Vec::new();
    if let Some(values) = &request.override_values.values {
        if !values.is_null() {
            let yaml = serde_yaml::to_string(values).map_err(|e| {
                ReleaseError::new(
                    action,
                    &request.key,
                    ReleaseFailureReason::Io,
                    format!("failed to encode override values: {e}"),
                )
            })?;
            args.push("--values".to_string());
            args.push(write_scratch(
                scratch,
                "values.yaml",
                yaml.as_bytes(),
                action,
                &request.key,
            )?);
        }
    }
    for pair in &request.override_values.set {
        args.push("--set".to_string());
        args.push(pair.clone());
    }
    for pair in &request.override_values.set_string {
        args.push("--set-string".to_string());
        args.push(pair.clone());
    }
    Ok(args)
}

fn config_flags(config: &ReleaseConfig) -> Vec<String> {
    [
        (config.wait, "--wait"),
        (config.atomic, "--atomic"),
        (config.force, "--force"),
        (config.disable_hooks, "--no-hooks"),
    ]
    .into_iter()
    .filter(|(enabled, _)| *enabled)
    .map(|(_, flag)| flag.to_string())
    .collect()
}

fn parse_release(
    stdout: &str,
    action: &'static str,
    key: &ReleaseKey,
) -> Result<Release, ReleaseError> {
    serde_json::from_str::<HelmReleaseJson>(stdout)
        .map(Release::from)
        .map_err(|e| {
            ReleaseError::new(
                action,
                key,
                ReleaseFailureReason::InvalidOutput,
                format!("failed to parse helm output: {e}"),
            )
        })
}

fn classify_helm_error(stderr: &str) -> ReleaseFailureReason {
    let lower = stderr.to_lowercase();
    if lower.contains("release: not found") || lower.contains("release not found") {
        ReleaseFailureReason::ReleaseNotFound
    } else if lower.contains("another operation") && lower.contains("in progress") {
        ReleaseFailureReason::Conflict
    } else if lower.contains("timed out") || lower.contains("context deadline exceeded") {
        ReleaseFailureReason::Timeout
    } else if lower.contains("not found in") && lower.contains("chart") {
        ReleaseFailureReason::ChartNotFound
    } else {
        ReleaseFailureReason::ActionFailed
    }
}

/// Hide the value following `--password` in debug logs
fn redact_args(args: &[String]) -> Vec<&str> {
    let mut redacted = Vec::with_capacity(args.len());
    let mut hide_next = false;
    for arg in args {
        if hide_next {
            redacted.push("<redacted>");
            hide_next = false;
        } else {
            hide_next = arg == "--password";
            redacted.push(arg.as_str());
        }
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::release::types::ChartRef;
    use crate::crd::Override;

    fn request() -> ReleaseRequest {
        ReleaseRequest {
            key: ReleaseKey::new("default", "nginx"),
            chart: ChartRef {
                repo_url: "https://charts.example.com".to_string(),
                chart: "nginx".to_string(),
                version: "1.0.0".to_string(),
                insecure: true,
                auth: None,
            },
            override_values: Override {
                values: Some(serde_json::json!({"replicaCount": 2})),
                set: vec!["image.tag=1.25".to_string()],
                set_string: vec!["podLabels.team=core".to_string()],
            },
            config: ReleaseConfig {
                wait: true,
                disable_hooks: true,
                ..Default::default()
            },
            description: "default/nginx-1/uid/1".to_string(),
        }
    }

    #[test]
    fn test_value_args_write_values_file() {
        let dir = tempfile::tempdir().unwrap();
        let args = value_args(&request(), dir.path(), "template").unwrap();
        assert_eq!(args[0], "--values");
        let written = std::fs::read_to_string(&args[1]).unwrap();
        assert!(written.contains("replicaCount: 2"));
        assert_eq!(&args[2..], ["--set", "image.tag=1.25", "--set-string", "podLabels.team=core"]);
    }

    #[test]
    fn test_chart_and_config_flags() {
        let dir = tempfile::tempdir().unwrap();
        let args = chart_args(&request(), dir.path(), "template").unwrap();
        assert!(args.contains(&"--insecure-skip-tls-verify".to_string()));
        assert_eq!(config_flags(&request().config), vec!["--wait", "--no-hooks"]);
    }

    #[test]
    fn test_classify_helm_error() {
        assert_eq!(
            classify_helm_error("Error: release: not found"),
            ReleaseFailureReason::ReleaseNotFound
        );
        assert_eq!(
            classify_helm_error("Error: UPGRADE FAILED: another operation (install/upgrade/rollback) is in progress"),
            ReleaseFailureReason::Conflict
        );
        assert_eq!(classify_helm_error("boom"), ReleaseFailureReason::ActionFailed);
    }

    #[test]
    fn test_redact_password() {
        let args = vec!["--username".to_string(), "u".to_string(), "--password".to_string(), "s3cret".to_string()];
        assert_eq!(redact_args(&args), vec!["--username", "u", "--password", "<redacted>"]);
    }
}
