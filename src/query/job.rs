//! Asynchronous query job protocol.
//!
//! Long-running queries are submitted as jobs: creation answers with a
//! redirect to a job URL, the job advances through a lifecycle of
//! phases, and the result is collected from a child resource once the
//! job reaches a terminal phase.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::query::RowSet;

/// Result type for job protocol operations.
pub type JobResult<T> = Result<T, JobError>;

/// Errors raised while driving a query job.
#[derive(Error, Debug)]
pub enum JobError {
    /// HTTP transport failure.
    #[error("job request failed: {0}")]
    Http(#[source] reqwest::Error),

    /// The service answered with a status the protocol does not allow
    /// at this point of the lifecycle.
    #[error("unexpected response from {url} ({status})")]
    UnexpectedResponse {
        /// URL that was requested.
        url: String,
        /// HTTP status code received.
        status: u16,
    },

    /// Job creation succeeded but no job URL was supplied.
    #[error("job creation response carried no location")]
    NoLocation,
}

/// Lifecycle phase of a query job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPhase {
    /// Created, not yet queued.
    Pending,
    /// Accepted for execution.
    Queued,
    /// Running.
    Executing,
    /// Finished successfully; a result is available.
    Completed,
    /// Finished with an error.
    Error,
    /// Aborted on client request.
    Aborted,
    /// Held by the service pending operator action.
    Held,
    /// Suspended by the service.
    Suspended,
    /// Result removed after retention expiry.
    Archived,
    /// Phase token not in the standard set.
    Unknown(String),
}

impl JobPhase {
    /// Parse a phase token. Tokens outside the standard set yield
    /// [`JobPhase::Unknown`] rather than an error, since services are
    /// observed to emit extensions.
    pub fn from_token(token: &str) -> Self {
        match token.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Self::Pending,
            "QUEUED" => Self::Queued,
            "EXECUTING" => Self::Executing,
            "COMPLETED" => Self::Completed,
            "ERROR" => Self::Error,
            "ABORTED" => Self::Aborted,
            "HELD" => Self::Held,
            "SUSPENDED" => Self::Suspended,
            "ARCHIVED" => Self::Archived,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// True for phases after which the job will make no further
    /// progress.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Error | Self::Aborted | Self::Archived
        )
    }
}

impl FromStr for JobPhase {
    type Err = std::convert::Infallible;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_token(token))
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Self::Pending => "PENDING",
            Self::Queued => "QUEUED",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Error => "ERROR",
            Self::Aborted => "ABORTED",
            Self::Held => "HELD",
            Self::Suspended => "SUSPENDED",
            Self::Archived => "ARCHIVED",
            Self::Unknown(other) => other.as_str(),
        };
        f.write_str(token)
    }
}

/// A created query job, addressed by its job URL.
pub struct AsyncJob {
    http: reqwest::Client,
    job_url: String,
    last_phase: Option<JobPhase>,
}

impl AsyncJob {
    /// Submit a query to the asynchronous endpoint and return the
    /// created job. The service answers creation with a redirect whose
    /// location is the job URL; redirects are therefore not followed.
    pub async fn create(endpoint: &str, query: &str, maxrec: Option<u64>) -> JobResult<AsyncJob> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(JobError::Http)?;
        let body = crate::query::SyncRequest {
            query: query.to_string(),
            maxrec,
        };
        let response = http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(JobError::Http)?;
        let status = response.status();
        if status != reqwest::StatusCode::SEE_OTHER && !status.is_success() {
            return Err(JobError::UnexpectedResponse {
                url: endpoint.to_string(),
                status: status.as_u16(),
            });
        }
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(JobError::NoLocation)?;
        let job_url = resolve(endpoint, location);
        tracing::info!(%job_url, "created query job");
        Ok(AsyncJob {
            http,
            job_url,
            last_phase: None,
        })
    }

    /// URL identifying this job on the service.
    pub fn job_url(&self) -> &str {
        &self.job_url
    }

    /// The most recently read phase. Does not contact the service.
    pub fn last_phase(&self) -> Option<&JobPhase> {
        self.last_phase.as_ref()
    }

    /// Read the current phase from the service.
    pub async fn read_phase(&mut self) -> JobResult<JobPhase> {
        let url = format!("{}/phase", self.job_url);
        let response = self.http.get(&url).send().await.map_err(JobError::Http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(JobError::UnexpectedResponse {
                url,
                status: status.as_u16(),
            });
        }
        let token = response.text().await.map_err(JobError::Http)?;
        let phase = JobPhase::from_token(&token);
        if let JobPhase::Unknown(other) = &phase {
            tracing::warn!(job = %self.job_url, token = %other, "non-standard job phase");
        }
        self.last_phase = Some(phase.clone());
        Ok(phase)
    }

    /// Post a phase transition request.
    async fn post_phase(&self, phase: &str) -> JobResult<()> {
        let url = format!("{}/phase", self.job_url);
        let response = self
            .http
            .post(&url)
            .form(&[("PHASE", phase)])
            .send()
            .await
            .map_err(JobError::Http)?;
        let status = response.status();
        if status != reqwest::StatusCode::SEE_OTHER && !status.is_success() {
            return Err(JobError::UnexpectedResponse {
                url,
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    /// Start execution.
    pub async fn start(&self) -> JobResult<()> {
        self.post_phase("RUN").await
    }

    /// Request abortion.
    pub async fn abort(&self) -> JobResult<()> {
        self.post_phase("ABORT").await
    }

    /// Poll the phase at the given interval until the job finishes,
    /// returning the terminal phase.
    pub async fn wait_until_finished(&mut self, poll: Duration) -> JobResult<JobPhase> {
        loop {
            let phase = self.read_phase().await?;
            if phase.is_finished() {
                return Ok(phase);
            }
            tracing::debug!(job = %self.job_url, %phase, "job still running");
            tokio::time::sleep(poll).await;
        }
    }

    /// Fetch the result row set of a completed job.
    pub async fn fetch_result(&self) -> JobResult<RowSet> {
        let url = format!("{}/results/result", self.job_url);
        let response = self.http.get(&url).send().await.map_err(JobError::Http)?;
        let status = response.status();
        if !status.is_success() {
            return Err(JobError::UnexpectedResponse {
                url,
                status: status.as_u16(),
            });
        }
        #[derive(serde::Deserialize)]
        struct Doc {
            columns: Vec<String>,
            #[serde(default)]
            rows: Vec<Vec<serde_json::Value>>,
        }
        let doc: Doc = response.json().await.map_err(JobError::Http)?;
        Ok(RowSet::new(doc.columns, doc.rows))
    }

    /// Delete the job on the service, consuming the handle.
    pub async fn delete(self) -> JobResult<()> {
        let response = self
            .http
            .delete(&self.job_url)
            .send()
            .await
            .map_err(JobError::Http)?;
        let status = response.status();
        if status != reqwest::StatusCode::SEE_OTHER && !status.is_success() {
            return Err(JobError::UnexpectedResponse {
                url: self.job_url,
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Resolve a possibly relative redirect location against the endpoint.
fn resolve(endpoint: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        location.to_string()
    } else {
        format!(
            "{}/{}",
            endpoint.trim_end_matches('/'),
            location.trim_start_matches('/')
        )
    }
}
