pub(crate) mod archive;
pub(crate) mod catalog;
pub(crate) mod engine;
pub(crate) mod probe;
pub(crate) mod recovery_conf;
pub(crate) mod recovery_target;
pub(crate) mod request;
pub(crate) mod s3_download;
pub(crate) mod validation;

use async_trait::async_trait;
use std::io;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::errors::{ConfigError, EngineError, RestoreError, RestoreStage};
use request::RestoreRequest;

/// Reports whether a path already holds data.
pub trait StorageProbe: Send + Sync {
    fn exists(&self, path: &Path) -> io::Result<bool>;
}

/// Validates and performs restores.
#[async_trait]
pub trait RestoreEngine: Send + Sync {
    /// Side-effect free consistency check of the request.
    fn verify_configuration(&self, request: &RestoreRequest) -> Result<(), ConfigError>;

    /// Materializes the data directory. Must honour `cancel`.
    async fn restore(
        &self,
        cancel: &CancellationToken,
        request: &RestoreRequest,
    ) -> Result<(), EngineError>;
}

/// Runs the guarded restore sequence:
/// destination check, configuration verification, restore.
///
/// Every failure is logged once where it is detected and returned without
/// retry. Partially written directories are the engine's concern.
pub struct RestoreOrchestrator<P, E> {
    probe: P,
    engine: E,
}

impl<P: StorageProbe, E: RestoreEngine> RestoreOrchestrator<P, E> {
    pub fn new(probe: P, engine: E) -> Self {
        Self { probe, engine }
    }

    #[instrument(
        name = "restore",
        skip_all,
        fields(
            backup_id = %request.backup_id,
            cluster = %request.cluster_name,
            namespace = %request.namespace
        )
    )]
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        request: RestoreRequest,
    ) -> Result<(), RestoreError> {
        let summary = request.summary();

        info!(
            stage = %RestoreStage::CheckingDestination,
            pg_data = %request.target_path.display(),
            "checking for an existing data directory"
        );
        match self.probe.exists(&request.target_path) {
            Ok(false) => {}
            Ok(true) => {
                warn!(
                    stage = %RestoreStage::CheckingDestination,
                    already_restored = true,
                    request = %summary,
                    "data directory already exists, can't restore over an existing folder"
                );
                return Err(RestoreError::DestinationNotEmpty {
                    path: request.target_path,
                });
            }
            Err(source) => {
                error!(
                    stage = %RestoreStage::CheckingDestination,
                    request = %summary,
                    error = %source,
                    "error while checking for an existing data directory"
                );
                return Err(RestoreError::Probe {
                    path: request.target_path,
                    source,
                });
            }
        }

        info!(stage = %RestoreStage::Verifying, "verifying restore configuration");
        if let Err(source) = self.engine.verify_configuration(&request) {
            error!(
                stage = %RestoreStage::Verifying,
                request = %summary,
                error = %source,
                "restore configuration not valid"
            );
            return Err(RestoreError::InvalidConfiguration {
                request: summary,
                source,
            });
        }

        info!(stage = %RestoreStage::Restoring, "restoring backup");
        if let Err(source) = self.engine.restore(cancel, &request).await {
            error!(
                stage = %RestoreStage::Restoring,
                request = %summary,
                error = %source,
                "error while restoring a backup"
            );
            return Err(RestoreError::Execution {
                backup_id: request.backup_id,
                source,
            });
        }

        info!(pg_data = %request.target_path.display(), "restore completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    type CallLog = Arc<Mutex<Vec<&'static str>>>;

    enum ProbeAnswer {
        Missing,
        Present,
        Fails,
    }

    struct FakeProbe {
        answer: ProbeAnswer,
        calls: CallLog,
    }

    impl StorageProbe for FakeProbe {
        fn exists(&self, _path: &Path) -> io::Result<bool> {
            self.calls.lock().unwrap().push("exists");
            match self.answer {
                ProbeAnswer::Missing => Ok(false),
                ProbeAnswer::Present => Ok(true),
                ProbeAnswer::Fails => Err(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "permission denied",
                )),
            }
        }
    }

    /// Engine that validates only the backup id and optionally fails restores.
    /// A successful restore creates the target directory.
    struct FakeEngine {
        fail_restore: bool,
        calls: CallLog,
    }

    #[async_trait]
    impl RestoreEngine for FakeEngine {
        fn verify_configuration(&self, request: &RestoreRequest) -> Result<(), ConfigError> {
            self.calls.lock().unwrap().push("verify");
            if request.backup_id.is_empty() {
                return Err(ConfigError::MissingField { field: "backup_name" });
            }
            Ok(())
        }

        async fn restore(
            &self,
            cancel: &CancellationToken,
            request: &RestoreRequest,
        ) -> Result<(), EngineError> {
            self.calls.lock().unwrap().push("restore");
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled { during: "testing" });
            }
            if self.fail_restore {
                return Err(EngineError::S3Download {
                    uri: "s3://pg-backups/base.tar.gz".to_string(),
                    message: "connection reset".to_string(),
                });
            }
            let target = &request.target_path;
            fs::create_dir_all(target)
                .map_err(|e| EngineError::io("creating data directory", target, e))?;
            fs::write(request.target_path.join("PG_VERSION"), "16\n")
                .map_err(|e| EngineError::io("writing PG_VERSION", &request.target_path, e))?;
            Ok(())
        }
    }

    fn request_for(target_path: PathBuf) -> RestoreRequest {
        RestoreRequest {
            target_path,
            credentials_file: Some(PathBuf::from("/etc/secrets/superuser-password")),
            cluster_name: "cluster-example".to_string(),
            backup_id: "nightly".to_string(),
            namespace: "default".to_string(),
            ..Default::default()
        }
    }

    fn orchestrator(
        answer: ProbeAnswer,
        fail_restore: bool,
    ) -> (RestoreOrchestrator<FakeProbe, FakeEngine>, CallLog) {
        let calls = CallLog::default();
        let orchestrator = RestoreOrchestrator::new(
            FakeProbe {
                answer,
                calls: calls.clone(),
            },
            FakeEngine {
                fail_restore,
                calls: calls.clone(),
            },
        );
        (orchestrator, calls)
    }

    #[tokio::test]
    async fn test_existing_destination_stops_before_verification() {
        let (orchestrator, calls) = orchestrator(ProbeAnswer::Present, false);
        let err = orchestrator
            .run(&CancellationToken::new(), request_for(PathBuf::from("/pgdata")))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RestoreError::DestinationNotEmpty { ref path } if path == Path::new("/pgdata")
        ));
        assert!(err.is_already_restored());
        assert_eq!(err.stage(), RestoreStage::CheckingDestination);
        assert_eq!(*calls.lock().unwrap(), vec!["exists"]);
    }

    #[tokio::test]
    async fn test_probe_failure_is_surfaced() {
        let (orchestrator, calls) = orchestrator(ProbeAnswer::Fails, false);
        let err = orchestrator
            .run(&CancellationToken::new(), request_for(PathBuf::from("/pgdata")))
            .await
            .unwrap_err();

        match &err {
            RestoreError::Probe { source, .. } => {
                assert_eq!(source.kind(), io::ErrorKind::PermissionDenied)
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!err.is_already_restored());
        assert_eq!(*calls.lock().unwrap(), vec!["exists"]);
    }

    #[tokio::test]
    async fn test_invalid_configuration_skips_restore() {
        let (orchestrator, calls) = orchestrator(ProbeAnswer::Missing, false);
        let mut request = request_for(PathBuf::from("/pgdata"));
        request.backup_id = String::new();

        let err = orchestrator.run(&CancellationToken::new(), request).await.unwrap_err();

        match &err {
            RestoreError::InvalidConfiguration { request, source } => {
                assert!(matches!(source, ConfigError::MissingField { field: "backup_name" }));
                assert!(request.credentials_file_set);
                assert_eq!(request.cluster_name, "cluster-example");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.stage(), RestoreStage::Verifying);
        assert_eq!(*calls.lock().unwrap(), vec!["exists", "verify"]);
    }

    #[tokio::test]
    async fn test_successful_restore() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let (orchestrator, calls) = orchestrator(ProbeAnswer::Missing, false);

        orchestrator
            .run(&CancellationToken::new(), request_for(dir.path().join("pgdata")))
            .await?;

        assert_eq!(*calls.lock().unwrap(), vec!["exists", "verify", "restore"]);
        assert!(dir.path().join("pgdata/PG_VERSION").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_restore_failure_wraps_cause() {
        let (orchestrator, calls) = orchestrator(ProbeAnswer::Missing, true);
        let err = orchestrator
            .run(&CancellationToken::new(), request_for(PathBuf::from("/pgdata")))
            .await
            .unwrap_err();

        match &err {
            RestoreError::Execution { backup_id, source } => {
                assert_eq!(backup_id, "nightly");
                assert!(matches!(source, EngineError::S3Download { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.stage(), RestoreStage::Restoring);
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(*calls.lock().unwrap(), vec!["exists", "verify", "restore"]);
    }

    #[tokio::test]
    async fn test_cancellation_reaches_engine() {
        let (orchestrator, _calls) = orchestrator(ProbeAnswer::Missing, false);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = orchestrator
            .run(&cancel, request_for(PathBuf::from("/pgdata")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RestoreError::Execution {
                source: EngineError::Cancelled { .. },
                ..
            }
        ));
    }

    /// Collects formatted log lines written by a scoped subscriber.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    impl CapturedLogs {
        fn problem_lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .filter(|line| line.contains("WARN") || line.contains("ERROR"))
                .map(str::to_string)
                .collect()
        }
    }

    #[tokio::test]
    async fn test_existing_destination_is_reported_once() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let (orchestrator, _calls) = orchestrator(ProbeAnswer::Present, false);
        let err = orchestrator
            .run(&CancellationToken::new(), request_for(PathBuf::from("/pgdata")))
            .await
            .unwrap_err();
        assert!(err.is_already_restored());

        let problems = logs.problem_lines();
        assert_eq!(problems.len(), 1, "expected a single report, got {problems:#?}");
        assert!(problems[0].contains("WARN"));
        assert!(problems[0].contains("already_restored=true"));
        assert!(problems[0].contains("pw_file=<redacted>"));
    }

    #[tokio::test]
    async fn test_second_run_never_overwrites() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let calls = CallLog::default();
        let orchestrator = RestoreOrchestrator::new(
            probe::FsStorageProbe,
            FakeEngine {
                fail_restore: false,
                calls: calls.clone(),
            },
        );
        let request = request_for(dir.path().join("pgdata"));

        orchestrator.run(&CancellationToken::new(), request.clone()).await?;
        let err = orchestrator
            .run(&CancellationToken::new(), request)
            .await
            .unwrap_err();

        assert!(err.is_already_restored());
        assert_eq!(*calls.lock().unwrap(), vec!["verify", "restore"]);
        Ok(())
    }
}
