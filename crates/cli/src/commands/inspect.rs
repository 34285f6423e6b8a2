//! `hireline inspect` -- read-only view of a JSON record store.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use hireline_core::{Deliverable, EscrowStatus, Milestone, Project, ProjectStatus, Proposal};
use hireline_engine::{Engine, EngineConfig, EngineError};
use hireline_storage::{MemoryStorage, StorageError};
use serde::Serialize;
use thiserror::Error;

use crate::OutputFormat;

#[derive(Debug, Error)]
pub(crate) enum InspectError {
    #[error("data file not found: {}", .0.display())]
    Missing(PathBuf),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ProjectSummary {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) status: ProjectStatus,
    pub(crate) client_id: String,
    pub(crate) freelancer_id: Option<String>,
    pub(crate) escrow_status: Option<EscrowStatus>,
    pub(crate) proposals: usize,
    pub(crate) milestones: usize,
    pub(crate) deliverables: usize,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ProjectDetail {
    pub(crate) project: Project,
    pub(crate) proposals: Vec<Proposal>,
    pub(crate) milestones: Vec<Milestone>,
    pub(crate) deliverables: Vec<Deliverable>,
}

async fn open_engine(path: &Path) -> Result<Engine<MemoryStorage>, InspectError> {
    if !path.is_file() {
        return Err(InspectError::Missing(path.to_path_buf()));
    }
    let storage = MemoryStorage::open(path).await?;
    Ok(Engine::new(Arc::new(storage), EngineConfig::default()))
}

pub(crate) async fn summarize(path: &Path) -> Result<Vec<ProjectSummary>, InspectError> {
    let engine = open_engine(path).await?;
    let mut out = Vec::new();
    for project in engine.projects(None).await? {
        out.push(ProjectSummary {
            proposals: engine.proposals(&project.id).await?.len(),
            milestones: engine.milestones(&project.id).await?.len(),
            deliverables: engine.deliverables(&project.id).await?.len(),
            escrow_status: project.escrow_status(),
            id: project.id,
            title: project.title,
            status: project.status,
            client_id: project.client_id,
            freelancer_id: project.freelancer_id,
        });
    }
    Ok(out)
}

pub(crate) async fn project_detail(path: &Path, id: &str) -> Result<ProjectDetail, InspectError> {
    let engine = open_engine(path).await?;
    Ok(ProjectDetail {
        project: engine.project(id).await?,
        proposals: engine.proposals(id).await?,
        milestones: engine.milestones(id).await?,
        deliverables: engine.deliverables(id).await?,
    })
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

fn render_summary(rows: &[ProjectSummary]) -> String {
    if rows.is_empty() {
        return "no projects".to_string();
    }
    let mut lines = vec![format!(
        "{:<36}  {:<11}  {:<15}  {:>4}  {:>4}  {:>4}  TITLE",
        "ID", "STATUS", "ESCROW", "PROP", "MILE", "DELV"
    )];
    for r in rows {
        lines.push(format!(
            "{:<36}  {:<11}  {:<15}  {:>4}  {:>4}  {:>4}  {}",
            r.id,
            r.status.to_string(),
            or_dash(r.escrow_status),
            r.proposals,
            r.milestones,
            r.deliverables,
            r.title
        ));
    }
    lines.join("\n")
}

fn render_detail(d: &ProjectDetail) -> String {
    let p = &d.project;
    let mut lines = vec![
        format!("project     {} ({})", p.id, p.status),
        format!("title       {}", p.title),
        format!("client      {}", p.client_id),
        format!("freelancer  {}", or_dash(p.freelancer_id.as_deref())),
        format!("budget      {} - {}", p.budget_min, p.budget_max),
    ];
    if let Some(e) = &p.escrow {
        lines.push(format!(
            "escrow      {} amount={} fee={} payout={}",
            e.status, e.escrow_amount, e.platform_fee_amount, e.freelancer_payout_amount
        ));
    }
    lines.push(format!("proposals   {}", d.proposals.len()));
    for pr in &d.proposals {
        lines.push(format!(
            "  {} {} {} budget={} rounds={}",
            pr.id, pr.status, pr.freelancer_id, pr.proposed_budget, pr.negotiation_count
        ));
    }
    lines.push(format!("milestones  {}", d.milestones.len()));
    for m in &d.milestones {
        lines.push(format!("  {} {} {}", m.id, m.status, m.title));
    }
    lines.push(format!("deliverables {}", d.deliverables.len()));
    for dl in &d.deliverables {
        lines.push(format!(
            "  {} {} rev={} {}",
            dl.id, dl.status, dl.revision_number, dl.title
        ));
    }
    lines.join("\n")
}

fn print_json<T: Serialize>(value: &T) {
    let pretty = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization error: {}\"}}", e));
    println!("{}", pretty);
}

pub(crate) async fn cmd_inspect(data_file: &Path, project: Option<&str>, output: OutputFormat) {
    let result = match project {
        Some(id) => project_detail(data_file, id).await.map(|d| match output {
            OutputFormat::Json => print_json(&d),
            OutputFormat::Text => println!("{}", render_detail(&d)),
        }),
        None => summarize(data_file).await.map(|rows| match output {
            OutputFormat::Json => print_json(&serde_json::json!({ "projects": rows })),
            OutputFormat::Text => println!("{}", render_summary(&rows)),
        }),
    };

    if let Err(e) = result {
        match output {
            OutputFormat::Json => eprintln!("{}", serde_json::json!({ "error": e.to_string() })),
            OutputFormat::Text => eprintln!("error: {}", e),
        }
        process::exit(1);
    }
}
