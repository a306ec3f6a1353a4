use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type JobId = u64;
pub type HostId = u64;
pub type SubjectId = u64;
pub type ZoneId = u64;

/// What kind of image a job moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectKind {
    Template,
    Iso,
    Volume,
}

/// Transfer direction of a job: push to an external URL, or expose a
/// time-limited public download URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UploadMode {
    FtpUpload,
    HttpDownload,
}

/// Job states of both transfer modes. The two mode state sets are disjoint
/// and share only the terminal `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UploadStatus {
    NotUploaded,
    UploadInProgress,
    CopyInProgress,
    Uploaded,
    UploadError,
    Abandoned,
    DownloadUrlNotCreated,
    DownloadUrlCreated,
    Error,
}

impl UploadStatus {
    /// Outcome states with no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UploadStatus::Uploaded
                | UploadStatus::UploadError
                | UploadStatus::Abandoned
                | UploadStatus::Error
        )
    }

    /// True while a transfer or its pre-stage copy is running.
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            UploadStatus::UploadInProgress | UploadStatus::CopyInProgress
        )
    }

    pub fn belongs_to(self, mode: UploadMode) -> bool {
        match self {
            UploadStatus::Error => true,
            UploadStatus::DownloadUrlNotCreated | UploadStatus::DownloadUrlCreated => {
                mode == UploadMode::HttpDownload
            }
            _ => mode == UploadMode::FtpUpload,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadStatus::NotUploaded => "NOT_UPLOADED",
            UploadStatus::UploadInProgress => "UPLOAD_IN_PROGRESS",
            UploadStatus::CopyInProgress => "COPY_IN_PROGRESS",
            UploadStatus::Uploaded => "UPLOADED",
            UploadStatus::UploadError => "UPLOAD_ERROR",
            UploadStatus::Abandoned => "ABANDONED",
            UploadStatus::DownloadUrlNotCreated => "DOWNLOAD_URL_NOT_CREATED",
            UploadStatus::DownloadUrlCreated => "DOWNLOAD_URL_CREATED",
            UploadStatus::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// On-disk format of an image copy; the extension travels into extraction
/// URL tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageFormat {
    Qcow2,
    Vhd,
    Ova,
    Raw,
    Iso,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Qcow2 => "qcow2",
            ImageFormat::Vhd => "vhd",
            ImageFormat::Ova => "ova",
            ImageFormat::Raw => "raw",
            ImageFormat::Iso => "iso",
        }
    }
}

/// Persisted record of one upload or extraction session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub id: JobId,
    pub host_id: HostId,
    pub subject_id: SubjectId,
    pub subject_kind: SubjectKind,
    pub mode: UploadMode,
    pub status: UploadStatus,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Push target for `FtpUpload` jobs, public URL for `HttpDownload` ones.
    pub upload_url: Option<String>,
    pub install_path: Option<String>,
    pub error: Option<String>,
    pub uploaded_bytes: u64,
    pub upload_percent: u8,
}

impl UploadJob {
    pub fn new(
        host_id: HostId,
        subject_id: SubjectId,
        subject_kind: SubjectKind,
        mode: UploadMode,
        status: UploadStatus,
        upload_url: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // assigned by the store on create
            host_id,
            subject_id,
            subject_kind,
            mode,
            status,
            created: now,
            last_updated: now,
            upload_url,
            install_path: None,
            error: None,
            uploaded_bytes: 0,
            upload_percent: 0,
        }
    }
}

/// Point update applied to a job record; `None` fields stay untouched.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<UploadStatus>,
    pub upload_url: Option<String>,
    pub install_path: Option<String>,
    pub error: Option<String>,
    pub uploaded_bytes: Option<u64>,
    pub upload_percent: Option<u8>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateInfo {
    pub id: SubjectId,
    pub name: String,
    pub format: ImageFormat,
    pub zone_id: ZoneId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub id: SubjectId,
    pub name: String,
    pub zone_id: ZoneId,
    pub size: Option<u64>,
}

/// Where a subject's source copy lives on a secondary storage host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectBinding {
    pub host_id: HostId,
    pub install_path: String,
    pub size: Option<u64>,
}

/// A secondary storage host; `parent_path` is the mount parent that remote
/// link commands resolve install paths against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageHost {
    pub id: HostId,
    pub name: String,
    pub parent_path: String,
}

/// A storage service VM acting as the agent endpoint for a host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceVm {
    pub id: HostId,
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StorageCommand {
    Upload(UploadCommand),
    CreateDownloadUrl(CreateDownloadUrlCommand),
    DeleteDownloadUrl(DeleteDownloadUrlCommand),
    UploadProgress(UploadProgressCommand),
}

/// Push one image copy to an external URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadCommand {
    pub job_id: JobId,
    pub subject_id: SubjectId,
    pub kind: SubjectKind,
    pub url: String,
    pub install_path: String,
    pub name: String,
    pub size: Option<u64>,
}

/// Link an image copy under the public web root of a service VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDownloadUrlCommand {
    pub parent_path: String,
    pub install_path: String,
    pub token: String,
}

/// Drop the public link; for volume subjects the agent also removes the
/// underlying volume copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteDownloadUrlCommand {
    pub install_path: String,
    pub kind: SubjectKind,
    pub download_url: Option<String>,
    pub parent_path: String,
}

/// Ask the agent for the fate of an outstanding upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadProgressCommand {
    pub job_id: JobId,
    pub request: StatusRequestKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusRequestKind {
    GetStatus,
    GetOrRestart,
    Purge,
}

/// Asynchronous notification an agent delivers for an outstanding command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentEvent {
    InProgress { uploaded_bytes: u64, percent: u8 },
    Completed,
    Failed { error: String },
    Abandoned,
    Disconnected,
}
