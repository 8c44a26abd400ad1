use anyhow::Result;
use std::io::{self, Write};

use posecam::command::Command;
use posecam::config::{Config, InputMode, SendMode};
use posecam::controller::{self, ControllerHandle};
use posecam::osc::ControlListener;

const CONFIG_PATH: &str = "posecam.toml";

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)?;

    log::info!("[main] posecam {}", env!("GIT_VERSION"));
    log::info!(
        "[main] input={} model={} osc={} mode={} video={} fps_limit={}",
        config.input.mode,
        config.detector.model,
        config.osc_target(),
        config.telemetry.send_mode,
        config.video.bind_addr,
        config.app.fps_limit,
    );

    let listen_port = config.control.listen_port;
    let (handle, join) = controller::spawn(config)?;

    // Remote producer: OSC control messages on the fixed port
    ControlListener::new(listen_port, handle.sender())
        .bind()?
        .spawn()?;

    // Local producer: interactive console on this thread
    print_help();
    console_loop(&handle)?;

    handle.send(Command::Shutdown);
    if join.join().is_err() {
        log::error!("[main] controller thread panicked");
    }
    Ok(())
}

fn print_help() {
    println!("=== posecam console ===");
    println!("  start | stop | pause      - control the pipeline");
    println!("  input webcam|file         - select the input source");
    println!("  cam <index>               - webcam device index");
    println!("  file <path>               - video file path");
    println!("  loop on|off               - loop file playback");
    println!("  model <id>                - movenet | yolo-pose | synthetic (while stopped)");
    println!("  osc start|stop            - telemetry channel");
    println!("  osc ip <addr>             - telemetry destination address");
    println!("  osc port <port>           - telemetry destination port");
    println!("  mode bundle|legacy        - telemetry encoding");
    println!("  video start|stop          - video channel");
    println!("  overlay on|off            - skeleton overlay on published frames");
    println!("  status                    - print the current snapshot");
    println!("  q                         - quit");
    println!();
}

fn console_loop(handle: &ControllerHandle) -> Result<()> {
    loop {
        print!("> ");
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // stdin closed (e.g. piped input ran out): keep serving remote
            // commands until the controller shuts down
            loop {
                std::thread::sleep(std::time::Duration::from_secs(1));
            }
        }
        let parts: Vec<&str> = input.trim().split_whitespace().collect();

        match parts.as_slice() {
            [] => continue,
            ["start"] => handle.send(Command::Start),
            ["stop"] => handle.send(Command::Stop),
            ["pause"] => handle.send(Command::Pause),
            ["input", mode] => match InputMode::parse(mode) {
                Some(mode) => handle.send(Command::SelectInput(mode)),
                None => println!("unknown input mode: {mode}"),
            },
            ["cam", index] => match index.parse() {
                Ok(index) => handle.send(Command::SetCamera(index)),
                Err(_) => println!("invalid camera index: {index}"),
            },
            ["file", path] => handle.send(Command::SetFile((*path).to_string())),
            ["loop", flag] => match parse_flag(flag) {
                Some(enabled) => handle.send(Command::SetLoop(enabled)),
                None => println!("expected on|off"),
            },
            ["model", id] => handle.send(Command::SetModel((*id).to_string())),
            ["osc", "start"] => handle.send(Command::StartOsc),
            ["osc", "stop"] => handle.send(Command::StopOsc),
            ["osc", "ip", ip] => handle.send(Command::SetOscIp((*ip).to_string())),
            ["osc", "port", port] => match port.parse() {
                Ok(port) => handle.send(Command::SetOscPort(port)),
                Err(_) => println!("invalid port: {port}"),
            },
            ["mode", mode] => match SendMode::parse(mode) {
                Some(mode) => handle.send(Command::SetSendMode(mode)),
                None => println!("unknown send mode: {mode}"),
            },
            ["video", "start"] => handle.send(Command::StartVideo),
            ["video", "stop"] => handle.send(Command::StopVideo),
            ["overlay", flag] => match parse_flag(flag) {
                Some(enabled) => handle.send(Command::SetDrawOverlay(enabled)),
                None => println!("expected on|off"),
            },
            ["status"] => print_status(handle),
            ["q"] | ["quit"] => {
                println!("shutting down");
                return Ok(());
            }
            _ => println!("unknown command: {}", input.trim()),
        }
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s {
        "on" => Some(true),
        "off" => Some(false),
        _ => None,
    }
}

fn print_status(handle: &ControllerHandle) {
    let status = handle.status();
    println!("state: {}", status.state);
    println!("frame: {}", status.frame_count);
    println!(
        "input: {} (cam {}, file {})",
        status.config.input.mode,
        status.config.input.camera_id,
        status.config.input.video_file.as_deref().unwrap_or("-"),
    );
    println!("model: {}", status.config.detector.model);
    println!(
        "osc:   {} -> {} ({})",
        if status.osc_active { "on" } else { "off" },
        status.config.osc_target(),
        status.config.telemetry.send_mode,
    );
    println!(
        "video: {} '{}' on {} (overlay {})",
        if status.video_active { "on" } else { "off" },
        status.config.video.stream_name,
        status.config.video.bind_addr,
        if status.config.video.draw_overlay { "on" } else { "off" },
    );
    println!(
        "errors: config={} detector={} sink={}",
        status.counters.config_errors,
        status.counters.detector_errors,
        status.counters.sink_errors,
    );
    if let Some(warning) = &status.last_warning {
        println!("warning: {warning}");
    }
}
