use ripple_glove::control::{ControlContext, LinkFactory};
use ripple_glove::link::SensorLink;
#[cfg(feature = "hardware")]
use ripple_glove::link::SerialLink;
use ripple_glove::server::WsServer;
use ripple_glove::session::Session;
use ripple_glove::simulator::GloveSimulator;
use ripple_glove::synth;
use ripple_glove::types::Command;

use clap::Parser;
use crossbeam_channel::unbounded;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

#[derive(Parser)]
#[command(name = "ripple-glove")]
#[command(about = "Flex-sensor glove music engine")]
struct Cli {
    /// Run against the built-in glove simulator (no hardware required)
    #[arg(long, default_value_t = true)]
    simulate: bool,

    /// Serial port for the glove MCU (e.g., /dev/ttyUSB0)
    #[arg(long, default_value = "/dev/ttyUSB0")]
    port: String,

    /// Serial baud rate
    #[arg(long, default_value_t = 921_600)]
    baud: u32,

    /// HTTP/WebSocket bind address
    #[arg(long, default_value = "0.0.0.0:8000")]
    addr: String,

    /// Initial activation threshold on the normalized drop
    #[arg(long, default_value_t = 0.15)]
    threshold: f32,

    /// UI page to serve at /; its sibling files are served as static assets
    #[arg(long)]
    ui: Option<PathBuf>,

    /// Connect to the glove immediately instead of waiting for a command
    #[arg(long)]
    connect: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let simulate = cli.simulate;
    #[cfg(not(feature = "hardware"))]
    let simulate = if simulate {
        true
    } else {
        error!("Hardware mode requires the 'hardware' feature. Falling back to simulator.");
        true
    };

    info!("═══════════════════════════════════════════════");
    info!("  RIPPLE GLOVE v{}", env!("CARGO_PKG_VERSION"));
    info!("  Input: {}", if simulate { "SIMULATOR" } else { "SERIAL" });
    info!("  UI: http://{}", cli.addr.replace("0.0.0.0", "localhost"));
    info!("═══════════════════════════════════════════════");

    let session = Arc::new(Session::new());
    if (0.0..1.0).contains(&cli.threshold) && cli.threshold > 0.0 {
        session.state.lock().unwrap().threshold = cli.threshold;
    } else {
        error!("Ignoring out-of-range --threshold {}", cli.threshold);
    }

    let (synth_handle, renderer) = synth::engine(synth::SAMPLE_RATE);

    // ─── Audio output ───────────────────────────────────────────────
    #[cfg(feature = "audio")]
    let _audio = match ripple_glove::audio_out::AudioOutput::start(renderer) {
        Ok(out) => Some(out),
        Err(e) => {
            error!("Audio output unavailable: {} — running silent", e);
            None
        }
    };
    // Without a device, drain the renderer at wall-clock rate so the
    // control side behaves identically
    #[cfg(not(feature = "audio"))]
    thread::Builder::new()
        .name("null-audio".into())
        .spawn(move || {
            let mut renderer = renderer;
            let mut block = [0.0f32; synth::BLOCK_SIZE];
            let block_time = std::time::Duration::from_secs_f64(
                synth::BLOCK_SIZE as f64 / synth::SAMPLE_RATE as f64,
            );
            loop {
                renderer.render(&mut block);
                thread::sleep(block_time);
            }
        })
        .expect("spawn null audio");

    // ─── Engine channels ────────────────────────────────────────────
    let (command_tx, command_rx) = unbounded::<Command>();
    let (notif_tx, notif_rx) = unbounded();

    let factory: LinkFactory = if simulate {
        Box::new(|| Ok(Box::new(GloveSimulator::new()) as Box<dyn SensorLink>))
    } else {
        #[cfg(feature = "hardware")]
        {
            let port = cli.port.clone();
            let baud = cli.baud;
            Box::new(move || {
                SerialLink::open(&port, baud).map(|l| Box::new(l) as Box<dyn SensorLink>)
            })
        }
        #[cfg(not(feature = "hardware"))]
        Box::new(|| Err("hardware support not compiled in".to_string()))
    };

    // ─── Control loop ───────────────────────────────────────────────
    let ctl_session = session.clone();
    let ctl_notif = notif_tx.clone();
    thread::Builder::new()
        .name("control".into())
        .spawn(move || {
            ControlContext::new(ctl_session, synth_handle, ctl_notif, factory).run(command_rx);
        })
        .expect("spawn control");

    if cli.connect {
        let _ = command_tx.send(Command::Connect);
    }

    // ─── Server (blocks the main thread) ────────────────────────────
    WsServer::new(notif_rx, command_tx, session, cli.addr.clone(), cli.ui.clone()).run();
}
