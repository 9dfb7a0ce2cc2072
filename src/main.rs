use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use portsweep::config::{self, Overrides, Settings};
use portsweep::export::{self, ExportFormat};
use portsweep::ports::{parse_port_list, PortSpec};
use portsweep::scanner;
use portsweep::server::{self, ServerConfig};
use portsweep::services;
use portsweep::types::{ScanRequest, ScanSummary, ScanUpdate};

/// portsweep: batched TCP/UDP port scanner with a streaming web API.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "portsweep",
    version,
    about = "Batched async TCP/UDP port scanner with a streaming web API.",
    long_about = None
)]
struct Cli {
    /// Target IP address (IPv4 or IPv6 literal).
    #[arg(long)]
    target: Option<String>,

    /// Ports: comma list and/or inclusive ranges (e.g. 22,80,8000-8100).
    #[arg(long, default_value = "1-1024")]
    ports: String,

    /// Well-known port group to scan instead of --ports (repeatable), e.g. "Email".
    #[arg(long = "group")]
    groups: Vec<String>,

    /// Protocol to probe: tcp, udp or both.
    #[arg(long, default_value = "tcp")]
    protocol: String,

    /// Per-probe timeout in milliseconds (100-10000).
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Ports probed concurrently per batch.
    #[arg(long = "batch-size", conflicts_with = "workers")]
    batch_size: Option<usize>,

    /// Use a worker pool of this size instead of sequential batches.
    #[arg(long)]
    workers: Option<usize>,

    /// Write results to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Output format for --output: json or csv. Defaults to the file extension, else json.
    #[arg(long)]
    format: Option<String>,

    /// Start the embedded HTTP UI/API server.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Address for the HTTP server.
    #[arg(long)]
    bind: Option<String>,

    /// Directory with the static UI files.
    #[arg(long = "ui-dir")]
    ui_dir: Option<PathBuf>,

    /// YAML config file. If omitted, ./portsweep.yaml is used when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    let file_cfg = config::load_config(cli.config.as_deref())?;
    let settings = Settings::resolve(
        file_cfg,
        Overrides {
            bind: cli.bind.clone(),
            ui_dir: cli.ui_dir.clone(),
            batch_size: cli.batch_size,
            workers: cli.workers,
            timeout_ms: cli.timeout_ms,
        },
    )
    .context("invalid settings")?;

    if cli.target.is_none() && !cli.serve_ui {
        bail!("nothing to do: pass --target to scan and/or --serve-ui to start the server");
    }

    println!("portsweep configuration:");
    println!("  target       : {}", cli.target.as_deref().unwrap_or("<none>"));
    if cli.groups.is_empty() {
        println!("  ports        : {}", cli.ports);
    } else {
        println!("  groups       : {}", cli.groups.join(", "));
    }
    println!("  protocol     : {}", cli.protocol);
    println!("  schedule     : {:?}", settings.schedule);
    println!("  timeout_ms   : {}", settings.timeout_ms);
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("  serve_ui     : {}", cli.serve_ui);

    // Start embedded UI server if requested (non-blocking background task)
    if cli.serve_ui {
        let bind = settings.bind.clone();
        let server_cfg = ServerConfig::from(&settings);
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, server_cfg).await {
                eprintln!("HTTP UI server error: {e}");
            }
        });
        println!("UI server starting at http://{} (Ctrl+C to stop)", settings.bind);
    }

    if let Some(target) = cli.target.as_deref() {
        let spec = if cli.groups.is_empty() {
            PortSpec::List(parse_port_list(&cli.ports)?.into_iter().map(u32::from).collect())
        } else {
            PortSpec::Groups(cli.groups.clone())
        };
        let req = ScanRequest::new(target, &spec, &cli.protocol, Some(settings.timeout_ms))?;
        let format = output_format(cli.format.as_deref(), cli.output.as_deref())?;

        let cancel = CancellationToken::new();
        let cancel_ctrlc = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel_ctrlc.cancel();
        });

        let (tx, mut rx) = mpsc::channel::<ScanUpdate>(16);
        let printer = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let p = update.progress;
                eprint!("\rscanned {}/{} ({:>3}%)", p.scanned, p.total, p.percentage);
            }
            eprintln!();
        });
        let summary = scanner::scan_with_progress(&req, settings.schedule, cancel, tx).await?;
        let _ = printer.await;

        print_results_table(&summary);
        if let Some(path) = cli.output.as_deref() {
            if let Err(e) = write_results(path, &summary, format) {
                eprintln!("Failed to write {} to {}: {:#}", format, path.display(), e);
            } else {
                println!("Wrote {} results to {}", format, path.display());
            }
        }
    }

    // If UI is running, keep the process alive until Ctrl+C.
    if cli.serve_ui {
        println!("Press Ctrl+C to stop the server...");
        let _ = tokio::signal::ctrl_c().await;
    }

    Ok(())
}

fn output_format(explicit: Option<&str>, path: Option<&Path>) -> Result<ExportFormat> {
    if let Some(f) = explicit {
        return Ok(f.parse()?);
    }
    let by_ext = path
        .and_then(|p| p.extension())
        .and_then(|e| e.to_str())
        .and_then(|e| e.parse().ok());
    Ok(by_ext.unwrap_or(ExportFormat::Json))
}

/// Print ports that answered (or could have); closed and filtered ports are
/// only counted.
fn print_results_table(summary: &ScanSummary) {
    use portsweep::types::PortStatus;

    let shown: Vec<_> = summary
        .outcomes
        .iter()
        .filter(|o| matches!(o.status, PortStatus::Open | PortStatus::OpenFiltered))
        .collect();

    let port_w = 5usize;
    let proto_w = 5usize;
    let status_w = "Open|Filtered".len();
    let mut service_w = "service".len();
    for o in &shown {
        service_w = service_w.max(services::service_name(o.protocol, o.port).len());
    }

    let c = &summary.counts;
    println!(
        "\n{} {}: scanned {} ports, open {}, closed {}, filtered {}, open|filtered {}, errors {}",
        summary.target,
        if summary.completed { "done" } else { "cancelled" },
        summary.total_scanned,
        c.open,
        c.closed,
        c.filtered,
        c.open_filtered,
        c.error
    );
    if shown.is_empty() {
        return;
    }
    println!(
        "{:>port_w$}  {:<proto_w$}  {:<status_w$}  {:<service_w$}",
        "port", "proto", "status", "service"
    );
    println!(
        "{:-<port_w$}  {:-<proto_w$}  {:-<status_w$}  {:-<service_w$}",
        "", "", "", ""
    );
    for o in shown {
        println!(
            "{:>port_w$}  {:<proto_w$}  {:<status_w$}  {:<service_w$}",
            o.port,
            o.protocol.as_str(),
            o.status.as_str(),
            services::service_name(o.protocol, o.port)
        );
    }
}

fn write_results(path: &Path, summary: &ScanSummary, format: ExportFormat) -> Result<()> {
    let doc = export::export_summary(summary, format)?;
    fs::write(path, doc).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_flag_beats_file_extension() {
        let csv = Path::new("out.csv");
        assert_eq!(output_format(None, Some(csv)).unwrap(), ExportFormat::Csv);
        assert_eq!(output_format(Some("json"), Some(csv)).unwrap(), ExportFormat::Json);
        assert_eq!(output_format(None, Some(Path::new("out.txt"))).unwrap(), ExportFormat::Json);
        assert!(output_format(Some("xml"), None).is_err());
    }
}
