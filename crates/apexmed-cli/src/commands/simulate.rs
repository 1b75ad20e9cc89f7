use std::sync::Arc;
use std::time::Duration;

use apexmed_core::{
    AdFormat, AdapterError, AdapterId, BidDocument, ContainerId, ContainerRegistry, FeatureFlags,
    HostParts, HttpError, LifecycleEvent, MediationRuntime, MemoryStore, PlacementId,
    ReqwestHttpClient, RemoteConfigBundle, RenderAction, RenderRequest, RuntimeSettings,
    ScriptedBidSource, UiThread,
};
use serde_json::{json, Value};

use crate::cli::{FormatArg, RenderArg, SimulateArgs};
use crate::error::CliError;

use super::CommandResult;

const SIMULATOR_CONTAINER: &str = "simulator";

pub async fn run(args: &SimulateArgs, settings: RuntimeSettings) -> Result<CommandResult, CliError> {
    let placement = PlacementId::parse(&args.placement)?;
    let latency = Duration::from_millis(args.latency_ms);
    let sources = args
        .sources
        .iter()
        .map(|raw| parse_source(raw, latency))
        .collect::<Result<Vec<_>, _>>()?;

    let ui = Arc::new(UiThread::spawn("apexmed-ui")?);
    let containers = Arc::new(ContainerRegistry::new());
    let host = HostParts::new(
        Arc::new(MemoryStore::new()),
        Arc::new(ReqwestHttpClient::new()),
        containers.clone(),
        ui.clone(),
    );
    let runtime = MediationRuntime::init(settings, host)?;
    runtime.config().offer(RemoteConfigBundle::new(1, 100).with_features(FeatureFlags {
        metrics_enabled: true,
        ..FeatureFlags::default()
    }))?;
    for source in sources {
        runtime.register_source(source);
    }

    let load = runtime.load(&placement, to_format(args.format)).await;
    let load_data = match &load {
        Ok(receipt) => json!({
            "status": "filled",
            "adapter": receipt.bid.adapter.as_str(),
            "bidId": receipt.bid.bid_id,
            "cpm": receipt.bid.cpm,
            "candidates": receipt.candidates,
            "attempts": receipt.attempts,
            "hedged": receipt.hedged,
        }),
        Err(error) => json!({
            "status": "failed",
            "reason": error.reason(),
            "message": error.to_string(),
        }),
    };

    let mut failed = load.is_err();
    let show_data = if args.load_only || load.is_err() {
        Value::Null
    } else {
        let container = ContainerId::from(SIMULATOR_CONTAINER);
        containers.register(container.clone());
        containers.emit(&container, LifecycleEvent::Started);
        containers.emit(&container, LifecycleEvent::Resumed);

        match runtime
            .show(Some(&container), &placement, render_action(args.render))
            .await
        {
            Ok(receipt) => json!({
                "status": "completed",
                "requestId": receipt.request_id,
                "bidId": receipt.bid_id,
                "adapter": receipt.adapter.as_str(),
                "elapsedMs": receipt.elapsed.as_millis() as u64,
            }),
            Err(error) => {
                failed = true;
                json!({
                    "status": "failed",
                    "reason": error.reason(),
                })
            }
        }
    };

    let data = json!({
        "placement": placement.as_str(),
        "bucket": runtime.config().bucket(),
        "load": load_data,
        "show": show_data,
        "metrics": serde_json::to_value(runtime.metrics().snapshot())?,
    });
    runtime.shutdown();
    ui.shutdown();

    Ok(if failed {
        CommandResult::failed(data)
    } else {
        CommandResult::ok(data)
    })
}

/// Parse `NAME=BEHAVIOR` into a scripted adapter.
fn parse_source(raw: &str, latency: Duration) -> Result<Arc<ScriptedBidSource>, CliError> {
    let (name, behavior) = raw
        .split_once('=')
        .ok_or_else(|| CliError::Command(format!("source '{raw}' must be NAME=BEHAVIOR")))?;
    let adapter = AdapterId::parse(name)?;
    let source = Arc::new(ScriptedBidSource::new(adapter.clone()).with_latency(latency));

    let failure = match behavior.trim() {
        "nofill" => Some(AdapterError::NoFill),
        "timeout" => Some(AdapterError::Transport(HttpError::timeout("scripted timeout"))),
        "network" => Some(AdapterError::Transport(HttpError::connect("scripted connection reset"))),
        other => match other.strip_prefix("vendor:") {
            Some(code) => {
                let code = code
                    .parse::<i64>()
                    .map_err(|e| CliError::Command(format!("source '{raw}': bad vendor code: {e}")))?;
                Some(AdapterError::vendor(code, "scripted vendor error"))
            }
            None => None,
        },
    };

    match failure {
        // Scripted twice so a retry sees the same failure.
        Some(error) => {
            source.push(Err(error.clone()));
            source.push(Err(error));
        }
        None => {
            let cpm = behavior
                .trim()
                .parse::<f64>()
                .map_err(|_| CliError::Command(format!("source '{raw}': unknown behavior '{behavior}'")))?;
            source.push(Ok(BidDocument {
                bid_id: format!("{}-sim", adapter.as_str()),
                adapter: adapter.clone(),
                cpm,
                ttl_seconds: 300,
                creative_ref: format!("{}-creative", adapter.as_str()),
                tracking_urls: Vec::new(),
            }));
        }
    }
    Ok(source)
}

fn to_format(format: FormatArg) -> AdFormat {
    match format {
        FormatArg::Banner => AdFormat::Banner,
        FormatArg::Interstitial => AdFormat::Interstitial,
        FormatArg::Rewarded => AdFormat::Rewarded,
        FormatArg::Native => AdFormat::Native,
    }
}

fn render_action(render: RenderArg) -> RenderAction {
    match render {
        RenderArg::Complete => Box::new(|request: RenderRequest| request.completion.complete()),
        RenderArg::Fail => {
            Box::new(|request: RenderRequest| request.completion.fail("simulated render failure"))
        }
        RenderArg::Drop => Box::new(|request: RenderRequest| drop(request)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(sources: &[&str], render: RenderArg) -> SimulateArgs {
        SimulateArgs {
            placement: String::from("rewarded_main"),
            format: FormatArg::Rewarded,
            sources: sources.iter().map(|s| (*s).to_owned()).collect(),
            latency_ms: 0,
            render,
            load_only: false,
        }
    }

    #[test]
    fn source_behaviors_parse() {
        assert!(parse_source("unity=2.5", Duration::ZERO).is_ok());
        assert!(parse_source("pangle=nofill", Duration::ZERO).is_ok());
        assert!(parse_source("vungle=vendor:1022", Duration::ZERO).is_ok());
        assert!(parse_source("vungle", Duration::ZERO).is_err());
        assert!(parse_source("vungle=sometimes", Duration::ZERO).is_err());
        assert!(parse_source("=2.0", Duration::ZERO).is_err());
    }

    #[tokio::test]
    async fn highest_bid_is_loaded_and_shown() {
        let result = run(
            &args(&["unity=2.5", "pangle=4.0", "vungle=nofill"], RenderArg::Complete),
            RuntimeSettings::default(),
        )
        .await
        .expect("simulation runs");

        assert!(!result.failed);
        assert_eq!(result.data["load"]["adapter"], "pangle");
        assert_eq!(result.data["show"]["status"], "completed");
        assert_eq!(result.data["metrics"]["counters"]["requests_total"], 3);
        assert_eq!(result.data["metrics"]["counters"]["presentation.completed"], 1);
    }

    #[tokio::test]
    async fn render_failure_marks_the_run_failed() {
        let result = run(&args(&["unity=1.0"], RenderArg::Fail), RuntimeSettings::default())
            .await
            .expect("simulation runs");

        assert!(result.failed);
        assert_eq!(result.data["show"]["reason"], "render_failed");
    }

    #[tokio::test]
    async fn all_no_fill_skips_the_show() {
        let result = run(&args(&["unity=nofill"], RenderArg::Complete), RuntimeSettings::default())
            .await
            .expect("simulation runs");

        assert!(result.failed);
        assert_eq!(result.data["load"]["reason"], "no_fill");
        assert!(result.data["show"].is_null());
    }
}
