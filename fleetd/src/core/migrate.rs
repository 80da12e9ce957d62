use anyhow::{anyhow, bail};
use axum::body::Bytes;
use axum::http::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

use common::error::ApiError;
use common::schemas::{ImportRequest, ImportResponse, ReceiveResponse, TokenResponse, WorkloadKind};
use common::time_utils::utc_now_ms;

use crate::core::state::ControlState;

/// Long timeout for moving an archive; everything else on the wire uses the
/// proxy's own short timeout.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(300);

/// Where a migrated workload goes. A tagged variant, so every call site has
/// to handle the cross-cluster case: an external cluster shares no registry
/// with us and is authorized by a one-time token instead of identity.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrationDestination {
    Peer { node_id: String },
    External { url: String, token: String },
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Stop,
    Export,
    Transfer,
    Import,
    Cleanup,
}

impl std::fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MigrationPhase::Stop => "stop",
            MigrationPhase::Export => "export",
            MigrationPhase::Transfer => "transfer",
            MigrationPhase::Import => "import",
            MigrationPhase::Cleanup => "cleanup",
        };
        write!(f, "{}", s)
    }
}

/// Every phase records a message even on success: migrations are
/// long-running and the operator needs to see where a job currently is,
/// not just the final verdict.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: MigrationPhase,
    pub ok: bool,
    pub message: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Completed,
    Failed,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MigrationRequest {
    pub kind: WorkloadKind,
    pub workload_id: String,
    pub destination: MigrationDestination,
    #[serde(default)]
    pub delete_source: bool,
}

/// One migration, ephemeral by design: jobs are not persisted across a
/// daemon restart and are never retried automatically — the operator
/// resubmits.
#[derive(Clone, Debug, Serialize)]
pub struct MigrationJob {
    pub job_id: String,
    pub kind: WorkloadKind,
    pub workload_id: String,
    pub source_node: String,
    pub destination: MigrationDestination,
    pub delete_source: bool,
    pub state: JobState,
    pub phases: Vec<PhaseResult>,
    pub started_ms: i128,
}

#[derive(Clone, Default)]
pub struct MigrationTracker {
    jobs: Arc<RwLock<HashMap<String, MigrationJob>>>,
}

impl MigrationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, MigrationJob>>, ApiError> {
        self.jobs
            .read()
            .map_err(|e| ApiError::Any(anyhow!("failed to acquire migration jobs read lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, MigrationJob>>, ApiError> {
        self.jobs
            .write()
            .map_err(|e| ApiError::Any(anyhow!("failed to acquire migration jobs write lock: {}", e)))
    }

    pub fn start(&self, req: &MigrationRequest, source_node: String) -> Result<MigrationJob, ApiError> {
        let job = MigrationJob {
            job_id: Uuid::new_v4().to_string(),
            kind: req.kind,
            workload_id: req.workload_id.clone(),
            source_node,
            destination: req.destination.clone(),
            delete_source: req.delete_source,
            state: JobState::Running,
            phases: Vec::new(),
            started_ms: utc_now_ms(),
        };
        self.write()?.insert(job.job_id.clone(), job.clone());
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Result<Option<MigrationJob>, ApiError> {
        Ok(self.read()?.get(job_id).cloned())
    }

    pub fn record(&self, job_id: &str, result: PhaseResult) -> Result<(), ApiError> {
        if let Some(job) = self.write()?.get_mut(job_id) {
            job.phases.push(result);
        }
        Ok(())
    }

    pub fn finish(&self, job_id: &str, state: JobState) -> Result<(), ApiError> {
        if let Some(job) = self.write()?.get_mut(job_id) {
            job.state = state;
        }
        Ok(())
    }
}

/// Short-lived, single-use transfer tokens issued by a migration
/// destination. Consumed when the archive arrives; the follow-up import is
/// authorized by a credential minted for that one transfer.
#[derive(Clone)]
pub struct TokenStore {
    tokens: Arc<RwLock<HashMap<String, Instant>>>,
    ttl: Duration,
}

impl TokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Instant>>, ApiError> {
        self.tokens
            .write()
            .map_err(|e| ApiError::Any(anyhow!("failed to acquire token store lock: {}", e)))
    }

    pub fn issue(&self) -> Result<TokenResponse, ApiError> {
        let token = Uuid::new_v4().to_string();
        let mut tokens = self.write()?;
        let now = Instant::now();
        tokens.retain(|_, expiry| *expiry > now);
        tokens.insert(token.clone(), now + self.ttl);
        Ok(TokenResponse {
            token,
            expires_in_secs: self.ttl.as_secs(),
        })
    }

    pub fn consume(&self, token: &str) -> Result<bool, ApiError> {
        Ok(self
            .write()?
            .remove(token)
            .is_some_and(|expiry| expiry > Instant::now()))
    }
}

#[derive(Clone, Debug)]
pub struct PendingTransfer {
    pub kind: WorkloadKind,
    pub archive: PathBuf,
    /// Credential returned to the uploader at receive time; the only thing
    /// that authorizes importing this transfer.
    pub import_token: String,
}

/// Archives received from a source node, waiting for their import call.
#[derive(Clone, Default)]
pub struct TransferStore {
    inner: Arc<RwLock<HashMap<String, PendingTransfer>>>,
}

impl TransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, PendingTransfer>>, ApiError> {
        self.inner
            .write()
            .map_err(|e| ApiError::Any(anyhow!("failed to acquire transfer store lock: {}", e)))
    }

    pub fn insert(&self, transfer_id: String, pending: PendingTransfer) -> Result<(), ApiError> {
        self.write()?.insert(transfer_id, pending);
        Ok(())
    }

    /// Remove and return a pending transfer, but only for the credential it
    /// was issued with. Unknown ids, mismatched credentials and replays are
    /// indistinguishable to the caller.
    pub fn take_authorized(
        &self,
        transfer_id: &str,
        token: &str,
    ) -> Result<PendingTransfer, ApiError> {
        let mut inner = self.write()?;
        if let Entry::Occupied(entry) = inner.entry(transfer_id.to_string())
            && entry.get().import_token == token
        {
            return Ok(entry.remove());
        }
        Err(ApiError::InvalidToken)
    }
}

/// Drive one migration job to completion. Phases run strictly in order and
/// the job is terminal on the first failure; later phases are never
/// attempted.
pub async fn run(ctx: ControlState, job_id: String) {
    let job = match ctx.migrations.get(&job_id) {
        Ok(Some(job)) => job,
        Ok(None) => {
            warn!(job_id, "migration job vanished before start");
            return;
        }
        Err(e) => {
            warn!(job_id, "migration tracker unavailable: {}", e);
            return;
        }
    };

    match drive(&ctx, &job).await {
        Ok(()) => {
            if let Err(e) = ctx.migrations.finish(&job_id, JobState::Completed) {
                warn!(job_id, "failed to mark migration completed: {}", e);
            }
            info!(job_id, workload = %job.workload_id, "migration completed");
        }
        Err((phase, err)) => {
            let outcome = ctx
                .migrations
                .record(
                    &job_id,
                    PhaseResult {
                        phase,
                        ok: false,
                        message: format!("{:#}", err),
                    },
                )
                .and_then(|()| ctx.migrations.finish(&job_id, JobState::Failed));
            if let Err(e) = outcome {
                warn!(job_id, "failed to mark migration failed: {}", e);
            }
            warn!(job_id, workload = %job.workload_id, %phase, "migration failed: {:#}", err);
        }
    }
}

type PhaseError = (MigrationPhase, anyhow::Error);

async fn drive(ctx: &ControlState, job: &MigrationJob) -> Result<(), PhaseError> {
    // stop: never export a running, inconsistent workload
    ctx.runtime
        .stop(job.kind, &job.workload_id)
        .await
        .map_err(|e| (MigrationPhase::Stop, e))?;
    ctx.migrations
        .record(
            &job.job_id,
            PhaseResult {
                phase: MigrationPhase::Stop,
                ok: true,
                message: format!("{} {} stopped on source", job.kind, job.workload_id),
            },
        )
        .map_err(|e| (MigrationPhase::Stop, e.into()))?;

    // export
    let archive = ctx
        .runtime
        .export(job.kind, &job.workload_id)
        .await
        .map_err(|e| (MigrationPhase::Export, e))?;
    let size = tokio::fs::metadata(&archive)
        .await
        .map(|m| m.len())
        .unwrap_or(0);
    ctx.migrations
        .record(
            &job.job_id,
            PhaseResult {
                phase: MigrationPhase::Export,
                ok: true,
                message: format!("archive {} ({} bytes)", archive.display(), size),
            },
        )
        .map_err(|e| (MigrationPhase::Export, e.into()))?;

    // transfer
    let (transfer_id, import_token) = transfer(ctx, job, &archive)
        .await
        .map_err(|e| (MigrationPhase::Transfer, e))?;
    ctx.migrations
        .record(
            &job.job_id,
            PhaseResult {
                phase: MigrationPhase::Transfer,
                ok: true,
                message: format!("archive transferred, transfer id {}", transfer_id),
            },
        )
        .map_err(|e| (MigrationPhase::Transfer, e.into()))?;

    // import
    let new_id = import(ctx, job, &transfer_id, &import_token)
        .await
        .map_err(|e| (MigrationPhase::Import, e))?;
    ctx.migrations
        .record(
            &job.job_id,
            PhaseResult {
                phase: MigrationPhase::Import,
                ok: true,
                message: format!("imported on destination as {}", new_id),
            },
        )
        .map_err(|e| (MigrationPhase::Import, e.into()))?;

    // cleanup: destructive, so it runs only with import confirmed
    let message = cleanup(ctx, job, &archive)
        .await
        .map_err(|e| (MigrationPhase::Cleanup, e))?;
    ctx.migrations
        .record(
            &job.job_id,
            PhaseResult {
                phase: MigrationPhase::Cleanup,
                ok: true,
                message,
            },
        )
        .map_err(|e| (MigrationPhase::Cleanup, e.into()))?;

    Ok(())
}

/// Move the archive to the destination. Returns the destination's transfer
/// id and the credential it issued for the follow-up import.
async fn transfer(
    ctx: &ControlState,
    job: &MigrationJob,
    archive: &Path,
) -> anyhow::Result<(String, String)> {
    let bytes = Bytes::from(tokio::fs::read(archive).await?);
    let receive_path = format!("/internal/migrations/receive?kind={}", job.kind);

    match &job.destination {
        MigrationDestination::Peer { node_id } => {
            // the destination authorizes by capability even inside a
            // cluster: fetch a one-time token first, through the router
            let relayed = ctx
                .proxy
                .forward(node_id, Method::POST, "/migrations/token", None, None)
                .await?;
            if !relayed.status.is_success() {
                bail!(
                    "destination {} refused token request: {}",
                    node_id,
                    relayed.status
                );
            }
            let token: TokenResponse = relayed.json()?;

            // the archive is bulk data, not a control-plane call
            let relayed = ctx
                .proxy
                .forward_with_timeout(
                    node_id,
                    Method::POST,
                    &receive_path,
                    Some(bytes),
                    Some(&token.token),
                    TRANSFER_TIMEOUT,
                )
                .await?;
            if !relayed.status.is_success() {
                bail!(
                    "destination {} rejected archive: {} {}",
                    node_id,
                    relayed.status,
                    String::from_utf8_lossy(&relayed.body)
                );
            }
            let resp: ReceiveResponse = relayed.json()?;
            Ok((resp.transfer_id, resp.import_token))
        }
        MigrationDestination::External { url, token } => {
            let base = common::url_utils::sanitize_url(url)?;
            let resp = ctx
                .http
                .post(format!("{}{}", base, receive_path))
                .timeout(TRANSFER_TIMEOUT)
                .bearer_auth(token)
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(bytes)
                .send()
                .await
                .map_err(|e| anyhow!("external destination unreachable: {}", e))?;
            if !resp.status().is_success() {
                bail!("external destination rejected archive: {}", resp.status());
            }
            let resp: ReceiveResponse = resp.json().await?;
            Ok((resp.transfer_id, resp.import_token))
        }
    }
}

/// Ask the destination to materialize the workload from the transferred
/// archive. Failures here are destination-side (capacity, runtime), which
/// an operator remediates differently from a transfer failure.
async fn import(
    ctx: &ControlState,
    job: &MigrationJob,
    transfer_id: &str,
    token: &str,
) -> anyhow::Result<String> {
    let payload = ImportRequest {
        transfer_id: transfer_id.to_string(),
    };

    match &job.destination {
        MigrationDestination::Peer { node_id } => {
            // materializing a VM can take far longer than a control call
            let relayed = ctx
                .proxy
                .forward_json_with_timeout(
                    node_id,
                    Method::POST,
                    "/internal/migrations/import",
                    &payload,
                    Some(token),
                    TRANSFER_TIMEOUT,
                )
                .await?;
            if !relayed.status.is_success() {
                bail!(
                    "destination {} failed import: {} {}",
                    node_id,
                    relayed.status,
                    String::from_utf8_lossy(&relayed.body)
                );
            }
            let resp: ImportResponse = relayed.json()?;
            Ok(resp.workload_id)
        }
        MigrationDestination::External { url, .. } => {
            let base = common::url_utils::sanitize_url(url)?;
            let resp = ctx
                .http
                .post(format!("{}/internal/migrations/import", base))
                .timeout(TRANSFER_TIMEOUT)
                .bearer_auth(token)
                .json(&payload)
                .send()
                .await
                .map_err(|e| anyhow!("external destination unreachable: {}", e))?;
            if !resp.status().is_success() {
                bail!("external destination failed import: {}", resp.status());
            }
            let resp: ImportResponse = resp.json().await?;
            Ok(resp.workload_id)
        }
    }
}

async fn cleanup(
    ctx: &ControlState,
    job: &MigrationJob,
    archive: &Path,
) -> anyhow::Result<String> {
    if let Err(e) = tokio::fs::remove_file(archive).await {
        warn!(archive = %archive.display(), "leaving stale archive behind: {}", e);
    }

    if !job.delete_source {
        return Ok("source workload retained".to_string());
    }

    ctx.runtime.remove(job.kind, &job.workload_id).await?;
    Ok(format!(
        "source {} {} deleted",
        job.kind, job.workload_id
    ))
}
