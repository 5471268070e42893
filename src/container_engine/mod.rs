//! Idempotent image provisioning and one-shot containerized test execution (C6 *Container
//! Execution Engine*).
//!
//! Three responsibilities live here, in the order a run touches them: [`ImageProvisioner`]
//! makes sure the configured image tag exists locally (pull-then-build, §4.6); [`run_script`]
//! writes a script into a per-run directory, runs it detached in a uniquely-named container, and
//! ingests the structured artifacts it produces; [`classify_result`] turns those artifacts into a
//! [`TestStatus`]. [`ContainerHandle`] is the capability the rest of this module is allowed to
//! use on a running container — it has no `logs()` method, so the "never read logs from the
//! container's stdout/stderr APIs" rule (§4.6 *Log source policy*) is enforced by the type system
//! rather than by convention.

mod xml_report;

pub use xml_report::{parse_statistics, Statistics};

use std::path::{Path, PathBuf};

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, ListContainersOptions,
    RemoveContainerOptions, WaitContainerOptions,
};
use bollard::image::{BuildImageOptions, CreateImageOptions, TagImageOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use serde::Serialize;

use crate::errors::PipelineError;
use crate::event::{Event, Stage};

/// Final classification of a completed run, per §4.6 *Result classification*.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    SystemError,
}

/// Structured result of one container run, handed to the orchestrator for serialization into an
/// `execution.complete` event.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub test_status: TestStatus,
    pub logs: String,
    pub log_html: String,
    pub report_html: String,
}

/// The only operations the pipeline is allowed to perform on a running container. Deliberately
/// excludes `logs()` — see §9 *Container-handle wrapping to trap `logs()`* — by never defining
/// it, rather than by wrapping a richer handle and panicking if it's called.
pub trait ContainerHandle {
    fn name(&self) -> &str;
    fn id(&self) -> &str;
}

struct RunningContainer {
    name: String,
    id: String,
}

impl ContainerHandle for RunningContainer {
    fn name(&self) -> &str {
        &self.name
    }
    fn id(&self) -> &str {
        &self.id
    }
}

/// Ensures the configured image tag is available locally, pulling a pre-published image first
/// (when enabled) and falling back to a local build.
pub struct ImageProvisioner<'a> {
    docker: &'a Docker,
    image_tag: &'a str,
    remote_image: &'a str,
    prefer_remote: bool,
    build_context_dir: &'a Path,
}

impl<'a> ImageProvisioner<'a> {
    pub fn new(
        docker: &'a Docker,
        image_tag: &'a str,
        remote_image: &'a str,
        prefer_remote: bool,
        build_context_dir: &'a Path,
    ) -> Self {
        ImageProvisioner {
            docker,
            image_tag,
            remote_image,
            prefer_remote,
            build_context_dir,
        }
    }

    /// Idempotent per-run provisioning (§4.6, §8 *Round-trip / idempotence*): if `image_tag`
    /// already exists locally, do nothing. Otherwise pull-then-tag when `prefer_remote` is set;
    /// on pull failure (or when disabled), build locally from `build_context_dir`. The tag step
    /// is atomic from the caller's perspective — a failed pull or build never leaves a
    /// partially-tagged image referenced by `image_tag`, because the tag is only ever applied
    /// after the source image resolves successfully. Emits `execution.running` log events for
    /// every pull/build line so the caller can stream provisioning progress.
    pub async fn ensure_image<F>(&self, mut emit: F) -> Result<(), PipelineError>
    where
        F: FnMut(Event),
    {
        if self.docker.inspect_image(self.image_tag).await.is_ok() {
            emit(Event::running_log(
                Stage::Execution,
                0,
                "using existing container image",
            ));
            return Ok(());
        }

        if self.prefer_remote {
            match self.pull_and_tag(&mut emit).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log::warn!(
                        "container_engine::ensure_image: remote pull failed ({e}), falling back to local build"
                    );
                    emit(Event::running_log(
                        Stage::Execution,
                        0,
                        "pull failed, building image locally",
                    ));
                }
            }
        }

        self.build_locally(&mut emit).await
    }

    async fn pull_and_tag<F: FnMut(Event)>(&self, emit: &mut F) -> Result<(), PipelineError> {
        emit(Event::running_log(
            Stage::Execution,
            0,
            format!("pulling {}", self.remote_image),
        ));

        let options = CreateImageOptions {
            from_image: self.remote_image,
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(chunk) = stream.next().await {
            let info = chunk
                .map_err(|e| PipelineError::Infrastructure(format!("docker pull failed: {e}")))?;
            if let Some(status) = info.status {
                let mut line = status;
                if let Some(progress) = info.progress {
                    line.push(' ');
                    line.push_str(&progress);
                }
                emit(Event::running_log(Stage::Execution, 0, line));
            }
            if let Some(error) = info.error {
                return Err(PipelineError::Infrastructure(format!("docker pull error: {error}")));
            }
        }

        self.docker
            .tag_image(
                self.remote_image,
                Some(TagImageOptions {
                    repo: self.image_tag,
                    tag: "",
                }),
            )
            .await
            .map_err(|e| PipelineError::Infrastructure(format!("failed to tag pulled image: {e}")))?;

        emit(Event::running_log(Stage::Execution, 0, "image downloaded successfully"));
        Ok(())
    }

    async fn build_locally<F: FnMut(Event)>(&self, emit: &mut F) -> Result<(), PipelineError> {
        emit(Event::running_log(Stage::Execution, 0, "building image from local context"));

        let tar_bytes = tar_directory(self.build_context_dir)?;

        let options = BuildImageOptions {
            dockerfile: "Dockerfile",
            t: self.image_tag,
            rm: true,
            ..Default::default()
        };
        let mut stream = self
            .docker
            .build_image(options, None, Some(tar_bytes.into()));
        while let Some(chunk) = stream.next().await {
            let info = chunk
                .map_err(|e| PipelineError::Infrastructure(format!("docker build failed: {e}")))?;
            if let Some(stream_line) = info.stream {
                let trimmed = stream_line.trim();
                if !trimmed.is_empty() {
                    emit(Event::running_log(Stage::Execution, 0, trimmed.to_string()));
                }
            }
            if let Some(error) = info.error {
                return Err(PipelineError::Infrastructure(format!("docker build error: {error}")));
            }
        }

        emit(Event::running_log(Stage::Execution, 0, "image built successfully"));
        Ok(())
    }
}

fn tar_directory(dir: &Path) -> Result<Vec<u8>, PipelineError> {
    let mut builder = tar::Builder::new(Vec::new());
    if dir.is_dir() {
        builder
            .append_dir_all(".", dir)
            .map_err(|e| PipelineError::Infrastructure(format!("failed to tar build context: {e}")))?;
    }
    builder
        .into_inner()
        .map_err(|e| PipelineError::Infrastructure(format!("failed to finalize build context tar: {e}")))
}

/// Container name for `run_id`, per §4.6 / §5's `robot-test-<run-id>` naming convention.
pub fn container_name(run_id: &str) -> String {
    format!("robot-test-{run_id}")
}

/// Write `script` to `<tests_root>/<run_id>/test.robot`, run it in a detached, non-auto-removed
/// container named [`container_name`], wait for it to exit, then ingest `output.xml`/`log.html`/
/// `report.html` from the same directory and classify the result.
///
/// A preexisting container with the same name is force-removed first (§4.6, §8 *Container name
/// collision*); if that removal itself fails, the general orphan-cleanup sweep
/// ([`cleanup_orphaned_containers`]) runs before proceeding. The container is always removed
/// (best-effort) once it has exited, win or lose.
pub async fn run_script(
    docker: &Docker,
    image_tag: &str,
    run_id: &str,
    script: &str,
    tests_root: &Path,
) -> Result<ExecutionResult, PipelineError> {
    let run_dir = tests_root.join(run_id);
    std::fs::create_dir_all(&run_dir)?;
    std::fs::write(run_dir.join("test.robot"), script)?;

    let name = container_name(run_id);
    remove_if_exists(docker, &name).await;

    let host_config = HostConfig {
        binds: Some(vec![format!(
            "{}:/app/robot_tests/{run_id}",
            run_dir
                .canonicalize()
                .unwrap_or_else(|_| run_dir.clone())
                .display()
        )]),
        ..Default::default()
    };
    let config = ContainerConfig {
        image: Some(image_tag.to_string()),
        working_dir: Some("/app".to_string()),
        cmd: Some(vec![
            "robot".to_string(),
            "--outputdir".to_string(),
            format!("/app/robot_tests/{run_id}"),
            format!("/app/robot_tests/{run_id}/test.robot"),
        ]),
        host_config: Some(host_config),
        ..Default::default()
    };

    let created = docker
        .create_container(
            Some(CreateContainerOptions {
                name: name.clone(),
                platform: None,
            }),
            config,
        )
        .await
        .map_err(|e| PipelineError::Execution(format!("failed to create container {name}: {e}")))?;

    let handle = RunningContainer {
        name: name.clone(),
        id: created.id,
    };

    docker
        .start_container::<String>(handle.name(), None)
        .await
        .map_err(|e| PipelineError::Execution(format!("failed to start container {name}: {e}")))?;

    let exit_code = wait_for_exit(docker, &handle).await?;

    let removal = docker
        .remove_container(
            handle.name(),
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await;
    if let Err(e) = removal {
        log::warn!("container_engine::run_script: best-effort removal of {name} failed: {e}");
    }

    ingest_artifacts(&run_dir, run_id, exit_code)
}

async fn wait_for_exit(docker: &Docker, handle: &RunningContainer) -> Result<i64, PipelineError> {
    let mut stream = docker.wait_container(
        handle.name(),
        Some(WaitContainerOptions {
            condition: "not-running",
        }),
    );
    match stream.next().await {
        Some(Ok(response)) => Ok(response.status_code),
        Some(Err(e)) => Err(PipelineError::Execution(format!(
            "waiting for container {} failed: {e}",
            handle.name()
        ))),
        None => Err(PipelineError::Execution(format!(
            "container {} exited without a wait response",
            handle.name()
        ))),
    }
}

async fn remove_if_exists(docker: &Docker, name: &str) {
    match docker
        .remove_container(
            name,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await
    {
        Ok(()) | Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {}
        Err(e) => {
            log::warn!(
                "container_engine::run_script: failed to remove preexisting container {name}: {e}, running orphan cleanup"
            );
            let _ = cleanup_orphaned_containers(docker).await;
        }
    }
}

/// Ingest `output.xml`/`log.html`/`report.html` from `run_dir` and classify the result per §4.6:
/// a parseable `output.xml` with `fail=0` and `pass>0` is `passed`, any other parseable statistics
/// block is `failed`. When the XML cannot be parsed at all, fall back to exit-code-based
/// classification: exit 0 is `passed`; non-zero with `log.html` present is `failed`; otherwise
/// `system_error` with whatever logs are available.
fn ingest_artifacts(run_dir: &Path, run_id: &str, exit_code: i64) -> Result<ExecutionResult, PipelineError> {
    let output_xml_path = run_dir.join("output.xml");
    let log_html_path = run_dir.join("log.html");
    let log_html = format!("/reports/{run_id}/log.html");
    let report_html = format!("/reports/{run_id}/report.html");

    let xml_text = std::fs::read_to_string(&output_xml_path).ok();

    if let Some(xml_text) = &xml_text {
        match parse_statistics(xml_text) {
            Ok(stats) => {
                let test_status = if stats.fail == 0 && stats.pass > 0 {
                    TestStatus::Passed
                } else {
                    TestStatus::Failed
                };
                let logs = xml_report::render_timeline(xml_text, exit_code);
                return Ok(ExecutionResult {
                    test_status,
                    logs,
                    log_html,
                    report_html,
                });
            }
            Err(e) => {
                log::warn!(
                    "container_engine::ingest_artifacts: failed to parse output.xml statistics, falling back to exit code: {e}"
                );
            }
        }
    }

    let fallback_logs = xml_text
        .as_deref()
        .map(|t| xml_report::render_timeline(t, exit_code))
        .unwrap_or_else(|| format!("Robot Framework Test Execution (Exit Code: {exit_code})\nNo output.xml produced."));

    if exit_code == 0 {
        Ok(ExecutionResult {
            test_status: TestStatus::Passed,
            logs: fallback_logs,
            log_html,
            report_html,
        })
    } else if log_html_path.exists() {
        Ok(ExecutionResult {
            test_status: TestStatus::Failed,
            logs: fallback_logs,
            log_html,
            report_html,
        })
    } else {
        Err(PipelineError::Execution(format!(
            "container exited with a system error (exit code {exit_code}); Robot Framework reports were \
             not generated. Available logs:\n{fallback_logs}"
        )))
    }
}

/// Remove every `robot-test-*` container regardless of state — the general cleanup sweep invoked
/// when a name-collision removal fails, and the `/test/containers/cleanup` collaborator endpoint
/// (§6). Returns the number of containers removed.
pub async fn cleanup_orphaned_containers(docker: &Docker) -> Result<u64, PipelineError> {
    let containers = docker
        .list_containers(Some(ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        }))
        .await
        .map_err(|e| PipelineError::Infrastructure(format!("failed to list containers: {e}")))?;

    let mut cleaned = 0u64;
    for container in containers {
        let matches_prefix = container
            .names
            .unwrap_or_default()
            .iter()
            .any(|n| n.trim_start_matches('/').starts_with("robot-test-"));
        if !matches_prefix {
            continue;
        }
        let Some(id) = container.id else { continue };
        match docker
            .remove_container(
                &id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => cleaned += 1,
            Err(e) => log::warn!("container_engine::cleanup_orphaned_containers: failed to remove {id}: {e}"),
        }
    }
    Ok(cleaned)
}

/// Status summary for the `/docker-status` collaborator endpoint (§6).
#[derive(Debug, Clone, Serialize)]
pub struct DockerStatus {
    pub docker_available: bool,
    pub image_exists: bool,
    pub image_id: Option<String>,
    pub image_created: Option<String>,
    pub image_size: Option<i64>,
}

/// Report whether Docker is reachable and whether the configured image tag currently exists.
pub async fn docker_status(docker: &Docker, image_tag: &str) -> DockerStatus {
    if docker.ping().await.is_err() {
        return DockerStatus {
            docker_available: false,
            image_exists: false,
            image_id: None,
            image_created: None,
            image_size: None,
        };
    }

    match docker.inspect_image(image_tag).await {
        Ok(inspect) => DockerStatus {
            docker_available: true,
            image_exists: true,
            image_id: inspect.id,
            image_created: inspect.created,
            image_size: inspect.size,
        },
        Err(_) => DockerStatus {
            docker_available: true,
            image_exists: false,
            image_id: None,
            image_created: None,
            image_size: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_name_is_deterministic() {
        assert_eq!(container_name("abc123"), "robot-test-abc123");
    }

    #[test]
    fn ingest_artifacts_classifies_passed_from_statistics() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("output.xml"),
            r#"<robot><statistics><total><stat pass="2" fail="0">All Tests</stat></total></statistics></robot>"#,
        )
        .unwrap();
        let result = ingest_artifacts(dir.path(), "run-1", 0).unwrap();
        assert_eq!(result.test_status, TestStatus::Passed);
    }

    #[test]
    fn ingest_artifacts_classifies_failed_from_statistics() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("output.xml"),
            r#"<robot><statistics><total><stat pass="1" fail="1">All Tests</stat></total></statistics></robot>"#,
        )
        .unwrap();
        let result = ingest_artifacts(dir.path(), "run-1", 1).unwrap();
        assert_eq!(result.test_status, TestStatus::Failed);
    }

    #[test]
    fn ingest_artifacts_falls_back_to_exit_code_without_xml() {
        let dir = tempfile::tempdir().unwrap();
        let result = ingest_artifacts(dir.path(), "run-1", 0).unwrap();
        assert_eq!(result.test_status, TestStatus::Passed);
    }

    #[test]
    fn ingest_artifacts_is_system_error_without_xml_or_log_html() {
        let dir = tempfile::tempdir().unwrap();
        let err = ingest_artifacts(dir.path(), "run-1", 1).unwrap_err();
        assert!(matches!(err, PipelineError::Execution(_)));
    }

    #[test]
    fn ingest_artifacts_is_failed_with_log_html_but_no_xml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("log.html"), "<html></html>").unwrap();
        let result = ingest_artifacts(dir.path(), "run-1", 1).unwrap();
        assert_eq!(result.test_status, TestStatus::Failed);
    }
}
