use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use reportdesk_client_core::location::one_time_token;
use reportdesk_client_core::{
    Capabilities, Job, JobStatus, MemoryAddressBar, ReportApi, ReportDesk, UploadFile,
};
use serde_json::{Map, Value};

use crate::context::CliContext;
use crate::delivery::SaveToDirectory;
use crate::{AdminCommand, JobCommand, JobRunArgs, PrefsCommand, Toggle};

pub async fn health(ctx: &CliContext) -> Result<()> {
    ctx.api
        .health()
        .await
        .with_context(|| format!("report service at {} is unreachable", ctx.api.base_url()))?;
    println!("ok {}", ctx.api.base_url());
    Ok(())
}

pub async fn login(ctx: &CliContext, email: &str) -> Result<()> {
    let request = ctx.auth_flow().request_link(email).await?;
    println!(
        "login link sent to {} (valid for {} minutes)",
        request.email,
        request.ttl_seconds.div_ceil(60)
    );
    println!("open it, or run `reportdesk verify <link>`");
    Ok(())
}

/// Accepts the full emailed link or just its token.
pub async fn verify(ctx: &CliContext, link: &str) -> Result<()> {
    let link = link.trim();
    let (token, mut address) = match one_time_token(link) {
        Some(token) => (token, MemoryAddressBar::new(link)),
        None => (link.to_string(), MemoryAddressBar::new(ctx.api.base_url())),
    };
    let session = ctx.auth_flow().verify(&token, &mut address).await?;
    println!("signed in as {}", session.email);
    print_capabilities(&session.capabilities())
}

pub async fn access(ctx: &CliContext) -> Result<()> {
    let capabilities = ctx.auth_flow().refresh_access().await?;
    print_capabilities(&capabilities)
}

pub fn logout(ctx: &CliContext) {
    ctx.auth_flow().logout();
    println!("signed out");
}

pub fn prefs(ctx: &CliContext, command: PrefsCommand) {
    match command {
        PrefsCommand::AutoDeliver { value } => {
            let enabled = value == Toggle::On;
            ctx.store.save_auto_deliver(enabled);
            println!("auto-deliver {}", if enabled { "on" } else { "off" });
        }
    }
}

pub async fn job(ctx: &CliContext, command: JobCommand) -> Result<()> {
    match command {
        JobCommand::Run(args) => job_run(ctx, args).await,
        JobCommand::Watch { job_id, out } => job_watch(ctx, &job_id, out).await,
        JobCommand::Status { job_id } => job_status(ctx, &job_id).await,
    }
}

pub async fn admin(ctx: &CliContext, command: AdminCommand) -> Result<()> {
    let token = ctx.session_token()?;
    match command {
        AdminCommand::Approve { job_id } => {
            ctx.api.approve_job(&token, &job_id).await?;
            println!("job {job_id} approved");
        }
        AdminCommand::Queue => {
            let queue = ctx.api.review_queue(&token).await?;
            if queue.jobs.is_empty() {
                println!("review queue is empty");
            }
            for entry in &queue.jobs {
                println!(
                    "{}\t{}\t{}\t{}",
                    field(entry, "job_id"),
                    field(entry, "job_type"),
                    field(entry, "email"),
                    field(entry, "status")
                );
            }
        }
    }
    Ok(())
}

async fn job_run(ctx: &CliContext, args: JobRunArgs) -> Result<()> {
    let sink = Arc::new(SaveToDirectory::new(ctx.api.clone(), args.out.clone()));
    let desk = ctx.desk(sink.clone());

    let job = desk
        .start_job(args.job_type, inputs_json(&args.inputs))
        .await?;
    print_job(&job);

    for (file_set, path) in &args.files {
        let file = read_upload(Path::new(path)).await?;
        let job = desk
            .jobs()
            .upload(file_set, Some(file))
            .await
            .with_context(|| format!("failed to upload {path} into {file_set}"))?;
        println!(
            "uploaded {path} into {file_set}; missing: {}",
            join_or_none(job.missing_required_sets().iter())
        );
    }

    let job = desk.submit().await?;
    print_job(&job);
    if args.no_wait {
        desk.scheduler().stop();
        println!("resume with `reportdesk job watch {}`", job.id());
        return Ok(());
    }
    wait_for_terminal(&desk).await?;
    report_outcome(ctx, &desk, &sink)
}

async fn job_watch(ctx: &CliContext, job_id: &str, out: Option<PathBuf>) -> Result<()> {
    let sink = Arc::new(SaveToDirectory::new(ctx.api.clone(), out));
    let desk = ctx.desk(sink.clone());
    let job = desk.attach_job(job_id).await?;
    print_job(&job);
    wait_for_terminal(&desk).await?;
    report_outcome(ctx, &desk, &sink)
}

async fn job_status(ctx: &CliContext, job_id: &str) -> Result<()> {
    let controller = ctx.controller();
    controller.attach(job_id).await?;
    let snapshot = controller.fetch_snapshot(job_id).await?;
    controller.apply_snapshot(job_id, &snapshot);
    if let Some(job) = controller.active_job() {
        print_job(&job);
    }
    Ok(())
}

async fn wait_for_terminal(desk: &ReportDesk) -> Result<()> {
    tokio::select! {
        () = desk.scheduler().wait() => Ok(()),
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            desk.scheduler().stop();
            if let Some(job_id) = desk.jobs().active_job_id() {
                println!("stopped watching; resume with `reportdesk job watch {job_id}`");
            }
            Ok(())
        }
    }
}

fn report_outcome(ctx: &CliContext, desk: &ReportDesk, sink: &SaveToDirectory) -> Result<()> {
    let Some(job) = desk.jobs().active_job() else {
        return Ok(());
    };
    match job.status() {
        JobStatus::Delivered => {
            if !ctx.store.load_auto_deliver() {
                let token = ctx.session_token()?;
                println!(
                    "report {} delivered: {}",
                    job.id(),
                    ctx.api.download_url(&token, job.id())
                );
            } else if sink.saved().is_empty() {
                println!("report {} delivered", job.id());
            }
            Ok(())
        }
        JobStatus::Failed => bail!("job {} failed", job.id()),
        status => {
            println!("job {} is {status}", job.id());
            Ok(())
        }
    }
}

fn print_job(job: &Job) {
    let job_type = job
        .job_type()
        .map_or_else(String::new, |job_type| format!(" [{job_type}]"));
    println!("job {}{job_type}: {}", job.id(), job.status());
    if !job.required_sets().is_empty() {
        println!("  required: {}", join_or_none(job.required_sets().iter()));
    }
    println!("  missing:  {}", join_or_none(job.missing_required_sets().iter()));
    for file in job.uploaded_files() {
        println!("  uploaded: {}/{} ({} bytes)", file.file_set, file.filename, file.size);
    }
    for warning in job.warnings() {
        println!("  warning:  {warning}");
    }
}

fn print_capabilities(capabilities: &Capabilities) -> Result<()> {
    let rendered = serde_json::to_string_pretty(capabilities)?;
    println!("{rendered}");
    if !capabilities.can_create_jobs() {
        println!("this account cannot create jobs; contact support to enable app access");
    }
    Ok(())
}

pub(crate) fn inputs_json(pairs: &[(String, String)]) -> Value {
    let map: Map<String, Value> = pairs
        .iter()
        .map(|(key, value)| (key.clone(), Value::String(value.clone())))
        .collect();
    Value::Object(map)
}

async fn read_upload(path: &Path) -> Result<UploadFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .with_context(|| format!("{} has no usable file name", path.display()))?;
    Ok(UploadFile {
        content_type: content_type_for(path).map(str::to_string),
        filename,
        bytes,
    })
}

pub(crate) fn content_type_for(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match extension.as_str() {
        "pdf" => "application/pdf",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "json" => "application/json",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xls" => "application/vnd.ms-excel",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => return None,
    };
    Some(content_type)
}

fn join_or_none<'a>(items: impl Iterator<Item = &'a String>) -> String {
    let joined = items.map(String::as_str).collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "none".to_string()
    } else {
        joined
    }
}

fn field<'a>(entry: &'a Value, key: &str) -> &'a str {
    entry.get(key).and_then(Value::as_str).unwrap_or("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn inputs_become_a_string_object() {
        let inputs = inputs_json(&[
            ("sector".to_string(), "retail".to_string()),
            ("country".to_string(), "TR".to_string()),
        ]);
        assert_eq!(inputs, json!({ "sector": "retail", "country": "TR" }));
        assert_eq!(inputs_json(&[]), json!({}));
    }

    #[test]
    fn content_type_is_guessed_from_extension() {
        assert_eq!(content_type_for(Path::new("fy.PDF")), Some("application/pdf"));
        assert_eq!(content_type_for(Path::new("ledger.csv")), Some("text/csv"));
        assert_eq!(content_type_for(Path::new("notes")), None);
        assert_eq!(content_type_for(Path::new("archive.7z")), None);
    }

    #[test]
    fn queue_fields_fall_back_to_dash() {
        let entry = json!({ "job_id": "job_1", "status": "pending_review" });
        assert_eq!(field(&entry, "job_id"), "job_1");
        assert_eq!(field(&entry, "email"), "-");
    }

    #[tokio::test]
    async fn read_upload_names_file_and_content_type() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("financials.pdf");
        std::fs::write(&path, b"%PDF-1.7").expect("write fixture");

        let file = read_upload(&path).await.expect("read upload");

        assert_eq!(file.filename, "financials.pdf");
        assert_eq!(file.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(file.bytes, b"%PDF-1.7".to_vec());
    }
}
