//! Typed entities for all persisted state
//!
//! Every entity carries a UUID-shaped string id, a creation timestamp, an
//! optional update timestamp and a free-form metadata map. JSON-shaped
//! columns are stored as TEXT and decoded here.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use uuid::Uuid;

pub type JsonMap = serde_json::Map<String, Json>;

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Created,
    Active,
    Paused,
    Completed,
    Archived,
}

impl Default for CampaignStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

impl CampaignStatus {
    /// The transition graph:
    ///
    /// ```text
    /// CREATED -> ACTIVE
    /// ACTIVE  -> PAUSED | COMPLETED
    /// PAUSED  -> ACTIVE | ARCHIVED
    /// COMPLETED -> ARCHIVED
    /// ARCHIVED: terminal
    /// ```
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, next),
            (Created, Active)
                | (Active, Paused)
                | (Active, Completed)
                | (Paused, Active)
                | (Paused, Archived)
                | (Completed, Archived)
        )
    }

    /// Observations and proposals may only be added in these states
    pub fn accepts_writes(&self) -> bool {
        matches!(self, Self::Created | Self::Active)
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

/// Job type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Propose,
    Benchmark,
    Export,
    Import,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Propose => write!(f, "propose"),
            Self::Benchmark => write!(f, "benchmark"),
            Self::Export => write!(f, "export"),
            Self::Import => write!(f, "import"),
        }
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "propose" => Ok(Self::Propose),
            "benchmark" => Ok(Self::Benchmark),
            "export" => Ok(Self::Export),
            "import" => Ok(Self::Import),
            _ => Err(format!("Invalid job type: {}", s)),
        }
    }
}

fn json_column<T: DeserializeOwned>(row: &SqliteRow, name: &'static str) -> Result<T, sqlx::Error> {
    let text: String = row.try_get(name)?;
    serde_json::from_str(&text).map_err(|e| sqlx::Error::ColumnDecode {
        index: name.to_string(),
        source: Box::new(e),
    })
}

fn opt_json_column<T: DeserializeOwned>(
    row: &SqliteRow,
    name: &'static str,
) -> Result<Option<T>, sqlx::Error> {
    let text: Option<String> = row.try_get(name)?;
    match text {
        Some(text) => serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| sqlx::Error::ColumnDecode {
                index: name.to_string(),
                source: Box::new(e),
            }),
        None => Ok(None),
    }
}

fn parsed_column<T>(row: &SqliteRow, name: &'static str) -> Result<T, sqlx::Error>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.try_get(name)?;
    text.parse().map_err(|e: String| sqlx::Error::ColumnDecode {
        index: name.to_string(),
        source: e.into(),
    })
}

/// Versioned problem definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub spec_yaml: String,
    pub spec_parsed: Json,
    pub version: i64,
    pub is_active: bool,
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Process {
    pub fn new(name: String, spec_yaml: String, spec_parsed: Json, version: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            description: None,
            spec_yaml,
            spec_parsed,
            version,
            is_active: true,
            metadata: JsonMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

impl FromRow<'_, SqliteRow> for Process {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            spec_yaml: row.try_get("spec_yaml")?,
            spec_parsed: json_column(row, "spec_parsed_json")?,
            version: row.try_get("version")?,
            is_active: row.try_get("is_active")?,
            metadata: json_column(row, "metadata_json")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// One optimization run against a process version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub process_id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: CampaignStatus,
    pub strategy_config: JsonMap,
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn new(process_id: String, name: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            process_id,
            name,
            description: None,
            status: CampaignStatus::Created,
            strategy_config: JsonMap::new(),
            metadata: JsonMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

impl FromRow<'_, SqliteRow> for Campaign {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            process_id: row.try_get("process_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            status: parsed_column(row, "status")?,
            strategy_config: json_column(row, "strategy_config_json")?,
            metadata: json_column(row, "metadata_json")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Experiment result bound to a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: String,
    pub campaign_id: String,
    pub x_raw: JsonMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_encoded: Option<Vec<f64>>,
    pub y: JsonMap,
    pub source: String,
    pub observed_at: DateTime<Utc>,
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Observation {
    pub fn new(campaign_id: String, x_raw: JsonMap, y: JsonMap, source: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            campaign_id,
            x_raw,
            x_encoded: None,
            y,
            source,
            observed_at: Utc::now(),
            metadata: JsonMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

impl FromRow<'_, SqliteRow> for Observation {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            x_raw: json_column(row, "x_raw_json")?,
            x_encoded: opt_json_column(row, "x_encoded_json")?,
            y: json_column(row, "y_json")?,
            source: row.try_get("source")?,
            observed_at: row.try_get("observed_at")?,
            metadata: json_column(row, "metadata_json")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// One optimization cycle within a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Iteration {
    pub id: String,
    pub campaign_id: String,
    /// 0-based, strictly monotonic within a campaign, gaps forbidden
    pub index: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_hash: Option<String>,
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Iteration {
    pub fn new(campaign_id: String, index: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            campaign_id,
            index,
            dataset_hash: None,
            metadata: JsonMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

impl FromRow<'_, SqliteRow> for Iteration {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            index: row.try_get("idx")?,
            dataset_hash: row.try_get("dataset_hash")?,
            metadata: json_column(row, "metadata_json")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// One strategy's output within an iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub iteration_id: String,
    pub strategy_name: String,
    /// Ordered candidate points in raw (decoded) form
    pub candidates_raw: Vec<JsonMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates_encoded: Option<Vec<Vec<f64>>>,
    /// Per-candidate acquisition scores; non-finite cells are omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acq_values: Option<Vec<Option<f64>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Json>,
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Proposal {
    pub fn new(iteration_id: String, strategy_name: String, candidates_raw: Vec<JsonMap>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            iteration_id,
            strategy_name,
            candidates_raw,
            candidates_encoded: None,
            acq_values: None,
            predictions: None,
            metadata: JsonMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

impl FromRow<'_, SqliteRow> for Proposal {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            iteration_id: row.try_get("iteration_id")?,
            strategy_name: row.try_get("strategy_name")?,
            candidates_raw: json_column(row, "candidates_raw_json")?,
            candidates_encoded: opt_json_column(row, "candidates_encoded_json")?,
            acq_values: opt_json_column(row, "acq_values_json")?,
            predictions: opt_json_column(row, "predictions_json")?,
            metadata: json_column(row, "metadata_json")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Accepted candidates from one proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedCandidates {
    pub proposal_id: String,
    pub candidate_indices: Vec<usize>,
}

/// At most one decision per iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub iteration_id: String,
    pub accepted: Vec<AcceptedCandidates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Decision {
    pub fn new(iteration_id: String, accepted: Vec<AcceptedCandidates>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            iteration_id,
            accepted,
            notes: None,
            metadata: JsonMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

impl FromRow<'_, SqliteRow> for Decision {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            iteration_id: row.try_get("iteration_id")?,
            accepted: json_column(row, "accepted_json")?,
            notes: row.try_get("notes")?,
            metadata: json_column(row, "metadata_json")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Snapshot of a fitted surrogate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub campaign_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<i64>,
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Checkpoint {
    pub fn new(campaign_id: String, path: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            campaign_id,
            iteration_id: None,
            path,
            file_size_bytes: None,
            metadata: JsonMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

impl FromRow<'_, SqliteRow> for Checkpoint {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            iteration_id: row.try_get("iteration_id")?,
            path: row.try_get("path")?,
            file_size_bytes: row.try_get("file_size_bytes")?,
            metadata: json_column(row, "metadata_json")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Generic named file (plot, report, export)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub campaign_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,
    pub artifact_type: String,
    pub name: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Artifact {
    pub fn new(campaign_id: String, artifact_type: String, name: String, path: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            campaign_id,
            iteration_id: None,
            artifact_type,
            name,
            path,
            file_size_bytes: None,
            content_type: None,
            metadata: JsonMap::new(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

impl FromRow<'_, SqliteRow> for Artifact {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            iteration_id: row.try_get("iteration_id")?,
            artifact_type: row.try_get("artifact_type")?,
            name: row.try_get("name")?,
            path: row.try_get("path")?,
            file_size_bytes: row.try_get("file_size_bytes")?,
            content_type: row.try_get("content_type")?,
            metadata: json_column(row, "metadata_json")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Durable unit of background work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
    pub job_type: JobType,
    pub status: JobStatus,
    pub params: JsonMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonMap>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_type: JobType, params: JsonMap, campaign_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            campaign_id,
            job_type,
            status: JobStatus::Pending,
            params,
            result: None,
            error: None,
            progress: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

impl FromRow<'_, SqliteRow> for Job {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            job_type: parsed_column(row, "job_type")?,
            status: parsed_column(row, "status")?,
            params: json_column(row, "params_json")?,
            result: opt_json_column(row, "result_json")?,
            error: row.try_get("error")?,
            progress: row.try_get("progress")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Mutual-exclusion record for campaign writers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignLock {
    pub campaign_id: String,
    pub locked_by: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CampaignLock {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

impl FromRow<'_, SqliteRow> for CampaignLock {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            campaign_id: row.try_get("campaign_id")?,
            locked_by: row.try_get("locked_by")?,
            locked_at: row.try_get("locked_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transition_graph() {
        use CampaignStatus::*;
        assert!(Created.can_transition_to(Active));
        assert!(Active.can_transition_to(Paused));
        assert!(Active.can_transition_to(Completed));
        assert!(Paused.can_transition_to(Active));
        assert!(Paused.can_transition_to(Archived));
        assert!(Completed.can_transition_to(Archived));

        assert!(!Created.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Active));
        assert!(!Archived.can_transition_to(Active));
        assert!(!Archived.can_transition_to(Archived));
    }

    #[test]
    fn test_writes_only_in_created_or_active() {
        assert!(CampaignStatus::Created.accepts_writes());
        assert!(CampaignStatus::Active.accepts_writes());
        assert!(!CampaignStatus::Paused.accepts_writes());
        assert!(!CampaignStatus::Completed.accepts_writes());
        assert!(!CampaignStatus::Archived.accepts_writes());
    }

    #[test]
    fn test_job_status_round_trip() {
        for status in ["pending", "running", "completed", "failed", "cancelled"] {
            let parsed: JobStatus = status.parse().unwrap();
            assert_eq!(parsed.to_string(), status);
        }
        assert!("bogus".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_job_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }
}
