#![deny(clippy::all)]

mod audio;
mod config;
mod error;
mod gateway;
mod media;
mod profile;
mod storage;
mod workflow;

use crate::audio::RecordedAudio;
use crate::error::WorkflowError;
use crate::gateway::HttpGateway;
use crate::workflow::{GenerationMode, Orchestrator, Snapshot};
use anyhow::Context;
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A .env file next to the binary is optional
    let _ = dotenvy::dotenv();

    // Initialize tracing for structured logging
    tracing_subscriber::fmt::init();

    let app_config = config::load().context("Failed to parse embedded config.toml")?;

    let token = config::api_token();
    if token.is_none() {
        warn!(
            "{} is not set; network transitions will fail until a credential is provided",
            config::API_TOKEN_ENV
        );
    }

    let mode = if app_config.service.two_stage {
        GenerationMode::TwoStage
    } else {
        GenerationMode::SingleStage
    };
    info!(
        "Inspection service: {} ({:?} generation)",
        app_config.service.base_url, mode
    );

    let jurisdiction = profile::get_jurisdiction();
    info!(
        "Jurisdiction: {} ({})",
        jurisdiction,
        profile::jurisdiction_name(&jurisdiction)
    );

    let gateway = HttpGateway::new(&app_config.service, token)?;
    let orchestrator = Orchestrator::new(gateway, mode, jurisdiction);

    run_command_loop(&orchestrator).await?;

    // Make sure the microphone is never leaked on the way out
    if let Err(e) = orchestrator.reset() {
        warn!("Teardown reset failed: {}", e);
    }

    Ok(())
}

/// Interactive driver for the workflow; each command is one transition.
async fn run_command_loop(orch: &Orchestrator<HttpGateway>) -> anyhow::Result<()> {
    print_help(orch.mode());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    // Kept so a failed transcription can be retried without re-recording
    let mut last_take: Option<RecordedAudio> = None;

    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        let (cmd, rest) = match line.split_once(char::is_whitespace) {
            Some((cmd, rest)) => (cmd, rest.trim()),
            None => (line, ""),
        };

        match cmd {
            "" => {}
            "help" => print_help(orch.mode()),
            "image" => report(orch.select_image_file(Path::new(rest))),
            "desc" => report(orch.set_description(rest)),
            "jur" => {
                report(orch.set_jurisdiction(rest));
                if let Err(e) = profile::set_jurisdiction(rest) {
                    warn!("Failed to persist jurisdiction to profile: {}", e);
                }
            }
            "rec" => report(orch.start_recording()),
            "stop" => match orch.stop_recording() {
                Ok(Some(take)) => {
                    println!(
                        "captured {:.1}s of audio at {}Hz, transcribing...",
                        take.duration_secs, take.sample_rate
                    );
                    match orch.transcribe(&take).await {
                        Ok(text) => {
                            println!("transcript merged: {}", text);
                            last_take = None;
                        }
                        Err(e) => {
                            eprintln!("error: {} (use `retry-stt` or type the description)", e);
                            last_take = Some(take);
                        }
                    }
                }
                Ok(None) => println!("no recording in progress"),
                Err(e) => eprintln!("error: {}", e),
            },
            "retry-stt" => match &last_take {
                Some(take) => match orch.transcribe(take).await {
                    Ok(text) => {
                        println!("transcript merged: {}", text);
                        last_take = None;
                    }
                    Err(e) => eprintln!("error: {}", e),
                },
                None => println!("no captured audio to transcribe"),
            },
            "analyze" => match orch.analyze().await {
                Ok(text) => println!("--- analysis preview ---\n{}", text),
                Err(e) => eprintln!("error: {}", e),
            },
            "fix" => report(orch.set_analysis_text(rest)),
            "generate" => match orch.generate_final().await {
                Ok(outcome) => {
                    println!("--- final statement ---\n{}", outcome.statement);
                    if !outcome.editable {
                        eprintln!("warning: no record id returned; editing is disabled");
                    }
                    archive(orch, &outcome.statement);
                }
                Err(e) => eprintln!("error: {}", e),
            },
            "edit" => {
                report(orch.begin_edit());
                if !rest.is_empty() {
                    report(orch.set_edited_text(rest));
                }
            }
            "text" => report(orch.set_edited_text(rest)),
            "save" => match orch.save_edit().await {
                Ok(()) => {
                    println!("edit saved");
                    if let Some(statement) = orch.snapshot().final_statement {
                        archive(orch, &statement);
                    }
                }
                Err(e) => eprintln!("error: {}", e),
            },
            "cancel" => report(orch.cancel_edit()),
            "regen" => match orch.regenerate().await {
                Ok(outcome) => {
                    println!("--- final statement ---\n{}", outcome.statement);
                    archive(orch, &outcome.statement);
                }
                Err(e) => eprintln!("error: {}", e),
            },
            "show" => print_snapshot(&orch.snapshot()),
            "reset" => {
                report(orch.reset());
                last_take = None;
            }
            "quit" | "exit" => break,
            other => println!("unknown command: {} (try `help`)", other),
        }
    }

    Ok(())
}

fn report(result: Result<(), WorkflowError>) {
    match result {
        Ok(()) => println!("ok"),
        Err(e) => eprintln!("error: {}", e),
    }
}

/// Keep a local Markdown copy of the statement; the durable record lives
/// behind the gateway, so a failure here is log-only.
fn archive(orch: &Orchestrator<HttpGateway>, statement: &str) {
    let snap = orch.snapshot();
    let entry = storage::ArchiveEntry {
        statement,
        record_id: snap.remote_id.as_deref(),
        jurisdiction: &snap.jurisdiction,
        image: snap.image_summary.as_deref(),
    };
    if let Err(e) = storage::archive_statement(&entry) {
        warn!("Failed to archive statement locally: {}", e);
    }
}

fn print_snapshot(snap: &Snapshot) {
    println!("stage:        {:?}", snap.stage);
    if let Some(op) = snap.in_flight {
        println!("in flight:    {:?}", op);
    }
    match &snap.image_summary {
        Some(summary) => println!("image:        {}", summary),
        None => println!("image:        none"),
    }
    println!(
        "jurisdiction: {} ({})",
        snap.jurisdiction,
        profile::jurisdiction_name(&snap.jurisdiction)
    );
    println!("description:  {}", snap.description);
    if let Some(text) = &snap.analysis_text {
        println!("analysis:     {}", text);
    }
    if let Some(text) = &snap.final_statement {
        println!("statement:    {}", text);
        println!("editable:     {}", snap.editable);
    }
    if let Some(text) = &snap.edit_buffer {
        println!("edit buffer:  {}", text);
    }
    if let Some(id) = &snap.remote_id {
        println!("record id:    {}", id);
    }
    if let Some(url) = &snap.uploaded_image_url {
        println!("image url:    {}", url);
    }
    println!("audio:        {:?}", snap.audio_state);
    if let Some(since) = snap.recording_since {
        println!("recording since: {}", since.format("%H:%M:%S"));
    }
}

fn print_help(mode: GenerationMode) {
    println!("snagscribe - defect statements from photo and voice");
    println!("  image <path>   select and normalize a defect photo");
    println!("  desc <text>    set the free-text description");
    println!("  rec / stop     record a spoken description and transcribe it");
    println!("  retry-stt      retry transcription of the last take");
    if mode == GenerationMode::TwoStage {
        println!("  analyze        run the preliminary defect analysis");
        println!("  fix <text>     correct the analysis before generating");
    }
    println!("  generate       generate and persist the final statement");
    println!("  edit [<text>]  edit the final statement");
    println!("  text <text>    replace the edit buffer");
    println!("  save / cancel  save or discard the edit");
    println!("  regen          regenerate the statement");
    println!("  jur <code>     set the jurisdiction (two-letter code)");
    println!("  show           print the current workflow state");
    println!("  reset          discard the draft and start over");
    println!("  quit           exit");
}
