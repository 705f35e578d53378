//! Directive replay harness.
//!
//! Reads newline-delimited JSON operations from stdin, drives a
//! [`VoiceClient`] with them, and writes one JSON line per completed
//! directive to stdout:
//!
//! ```text
//! {"op":"register","namespace":"TTS","name":"Speak","policy":{"resource_class":"audio","is_blocking":true},"focus_channel":"tts","priority":200}
//! {"op":"directive","header":{"namespace":"TTS","name":"Speak","dialogRequestId":"d1","messageId":"m1"},"payload":{"duration_ms":300}}
//! {"op":"cancel","dialog_request_id":"d1"}
//! ```
//!
//! Registered handlers hold their focus channel for `duration_ms` and then
//! finish. A payload `"stop": true` stops the rest of the dialog, and
//! `"stop": ["TTS.Speak"]` stops only the listed types.
//! Tracing output goes to stderr so stdout stays machine-readable.
//! Usage: `voicelink-replay [config.toml] < script.jsonl`

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use voicelink::directive::{
    BlockingPolicy, CancelPolicy, Directive, DirectiveEvent, DirectiveHandler, DirectiveOutcome,
    DirectiveResult, DirectiveTypeInfo,
};
use voicelink::error::HandlerError;
use voicelink::focus::{ChannelPriority, FocusChannel, FocusManager, FocusState, NoopFocusDelegate};
use voicelink::telemetry::TracingTelemetry;
use voicelink::{SdkConfig, VoiceClient};

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum ReplayOp {
    Register {
        namespace: String,
        name: String,
        #[serde(default)]
        policy: BlockingPolicy,
        focus_channel: Option<String>,
        #[serde(default)]
        priority: i32,
    },
    Directive(Directive),
    Cancel {
        dialog_request_id: String,
    },
}

#[derive(Debug, Serialize)]
struct CompletionLine {
    message_id: String,
    directive_type: String,
    result: String,
}

struct ReplayHandler {
    focus: FocusManager,
    channel: Option<String>,
}

#[async_trait]
impl DirectiveHandler for ReplayHandler {
    async fn prefetch(&self, directive: &Directive) -> Result<(), HandlerError> {
        if !directive.payload.is_null() && !directive.payload.is_object() {
            return Err(HandlerError::new("payload must be a JSON object"));
        }
        Ok(())
    }

    async fn handle(&self, directive: Directive) -> Result<DirectiveOutcome, HandlerError> {
        let duration = Duration::from_millis(directive.payload["duration_ms"].as_u64().unwrap_or(0));
        if let Some(channel) = &self.channel {
            self.focus.request_focus(channel).await;
        }
        tracing::info!(
            message_id = %directive.header.message_id,
            directive_type = %directive.directive_type(),
            duration_ms = duration.as_millis() as u64,
            "handling"
        );
        tokio::time::sleep(duration).await;
        if let Some(channel) = &self.channel {
            self.focus.release_focus(channel).await;
        }
        match &directive.payload["stop"] {
            serde_json::Value::Bool(true) => {
                return Ok(DirectiveOutcome::Stopped(CancelPolicy::all()));
            }
            serde_json::Value::Array(targets) => {
                let targets = targets.iter().filter_map(serde_json::Value::as_str);
                return Ok(DirectiveOutcome::Stopped(CancelPolicy::targets(targets)));
            }
            _ => {}
        }
        Ok(DirectiveOutcome::Finished)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("voicelink=info")),
        )
        .init();

    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => SdkConfig::from_file(&path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => SdkConfig::default(),
    };

    let client = VoiceClient::start(config, Arc::new(NoopFocusDelegate), Arc::new(TracingTelemetry))?;
    let mut events = client.directives().subscribe();
    let submitted = read_script(&client).await?;

    let mut stdout = tokio::io::stdout();
    let mut completed = 0;
    while completed < submitted {
        let (header, result) = match events.recv().await {
            Ok(DirectiveEvent::Completed { header, result }) => (header, result),
            Ok(_) => continue,
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(lagged = n, "replay output lagged; completions were dropped");
                completed += n as usize;
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        completed += 1;

        let line = CompletionLine {
            message_id: header.message_id.clone(),
            directive_type: header.directive_type(),
            result: match result {
                DirectiveResult::Finished => "finished".to_owned(),
                DirectiveResult::Stopped => "stopped".to_owned(),
                DirectiveResult::Canceled => "canceled".to_owned(),
                DirectiveResult::Failed(reason) => format!("failed: {reason}"),
            },
        };
        let mut json = serde_json::to_string(&line)?;
        json.push('\n');
        stdout.write_all(json.as_bytes()).await?;
    }
    stdout.flush().await?;

    client.shutdown();
    tracing::info!(completed, "replay finished");
    Ok(())
}

/// Apply every script line; returns the number of directives submitted.
async fn read_script(client: &VoiceClient) -> anyhow::Result<usize> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut submitted = 0;

    while let Some(line) = lines.next_line().await.context("failed to read from stdin")? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let op: ReplayOp = match serde_json::from_str(trimmed) {
            Ok(op) => op,
            Err(e) => {
                tracing::warn!(error = %e, raw_line = %trimmed, "skipping unparsable line");
                continue;
            }
        };

        match op {
            ReplayOp::Register {
                namespace,
                name,
                policy,
                focus_channel,
                priority,
            } => {
                if let Some(channel) = &focus_channel {
                    client
                        .focus()
                        .register(
                            FocusChannel::new(channel.clone(), ChannelPriority::new(priority)),
                            |channel: &str, state: FocusState| {
                                tracing::info!(channel, %state, "focus changed");
                            },
                        )
                        .await;
                }
                let handler = Arc::new(ReplayHandler {
                    focus: client.focus().clone(),
                    channel: focus_channel,
                });
                let info = DirectiveTypeInfo::new(namespace, name, policy);
                if let Err(e) = client.directives().add_handler(info, handler).await {
                    tracing::warn!(error = %e, "registration rejected");
                }
            }
            ReplayOp::Directive(directive) => {
                client.directives().submit(directive).await?;
                submitted += 1;
            }
            ReplayOp::Cancel { dialog_request_id } => {
                client.directives().cancel_dialog(&dialog_request_id).await?;
            }
        }
    }
    Ok(submitted)
}
