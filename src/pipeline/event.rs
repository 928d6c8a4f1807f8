//! CodePipeline job event, as delivered to a custom action invocation.
//!
//! Only the job id is consumed; everything else in the payload (artifact
//! locations, action configuration, credentials) is ignored.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use super::JobId;

#[derive(Debug, Clone, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "CodePipeline.job")]
    pub job: Job,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "accountId", default)]
    pub account_id: Option<String>,
}

pub fn parse_event(json: &str) -> Result<JobEvent> {
    serde_json::from_str(json).context("failed to parse CodePipeline job event")
}

/// Read a job event from `source`, where `-` means stdin.
pub fn read_event(source: &str) -> Result<JobEvent> {
    let json = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read job event from stdin")?;
        buf
    } else {
        let path = Path::new(source);
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read job event file: {}", path.display()))?
    };
    parse_event(&json)
}
