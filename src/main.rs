mod acquisition;
mod app;
mod artifact;
mod channels;
mod charts;
mod config;
mod control;
mod error;
mod feedback;
mod hrv;
mod packet;
mod phase;
mod pipeline;
mod recorder;
mod timeseries;
mod transport;

use app::AtaraxiaMonitor;
use channels::SharedChannels;
use clap::Parser;
use config::Config;
use control::ControlListener;
use error::AppError;
use iced::Theme;
use pipeline::Pipeline;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use transport::UdpReceiver;

/// Physiological sensor monitor: live acquisition by default, or an offline
/// debrief chart for a recorded session log.
#[derive(Parser)]
#[command(name = "ataraxia-monitor", version)]
struct Cli {
    /// Render the debrief chart for a session log and exit
    #[arg(long = "generate-graph", value_name = "CSV")]
    generate_graph: Option<PathBuf>,
}

fn main() -> ExitCode {
    // On Windows, force wgpu to use Vulkan backend instead of DirectX 12
    #[cfg(target_os = "windows")]
    std::env::set_var("WGPU_BACKEND", "vulkan");

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // clap prints usage and exits for any other argument combination
    let cli = Cli::parse();
    let result = match cli.generate_graph {
        Some(csv) => run_offline(&csv),
        None => run_live(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_offline(csv: &Path) -> Result<(), AppError> {
    let config = Config::load().unwrap_or_else(|e| {
        log::warn!("{}; using default chart settings", e);
        Config::default()
    });
    let output = feedback::generate(csv, &config.chart)?;
    println!("Chart saved to {}", output.display());
    Ok(())
}

fn run_live() -> Result<(), AppError> {
    let config = Config::load()?;
    let schema = config.sensor.schema;
    let listen_addr = config.network.listen_addr();

    let receiver = UdpReceiver::bind(&listen_addr)?;
    log::info!("Listening for {} datagrams on {}", schema.label(), receiver.local_addr()?);

    let channels = SharedChannels::new(&config.buffers);
    let pipeline = Pipeline::new(&config, channels.clone(), Instant::now())?;

    let (event_sender, event_receiver) = crossbeam_channel::unbounded();
    let control = if config.network.enable_control_channel {
        let listener = ControlListener::new(&config.network, &config.session, event_sender);
        Some(listener.spawn().map_err(AppError::Spawn)?)
    } else {
        None
    };
    let acquisition = acquisition::spawn(receiver, pipeline, event_receiver, config.timing.clone())
        .map_err(AppError::Spawn)?;

    let render_interval = config.timing.render_interval();
    let view = iced::application(
        "Ataraxia Monitor: Physiological Signal Viewer",
        AtaraxiaMonitor::update,
        AtaraxiaMonitor::view,
    )
    .subscription(AtaraxiaMonitor::subscription)
    .theme(|_| Theme::Light)
    .window_size((1200.0, 800.0))
    .run_with(move || AtaraxiaMonitor::new(channels, schema, listen_addr, render_interval));

    // Window closed (or never opened): close the socket, then the control link
    acquisition.shutdown();
    if let Some(control) = control {
        control.shutdown();
    }

    view.map_err(|e| AppError::View(e.to_string()))
}
