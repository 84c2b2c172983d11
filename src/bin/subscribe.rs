//! Subscriber daemon: connects to the MQTT broker, forwards `bhaptics/bpm`
//! and `bhaptics/run` messages into the controller core, and drives a local
//! haptic actuator. This binary is the runnable shell around the core
//! described in SPEC_FULL.md; the vendor SDK binding is out of scope, so it
//! drives [`bhaptics_controller::LoggingActuator`] instead.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet};

use bhaptics_controller::controller::{self, Command};
use bhaptics_controller::{BrokerConfig, ConfigStore, LoggingActuator, SystemClock};

const DEFAULT_BROKER: &str = "mqtt-web.makinteract.com";
const DEFAULT_PORT: u16 = 1883;
const DEFAULT_KEEPALIVE_SECS: u16 = 60;
const DEFAULT_QOS: u8 = 1;
const DEFAULT_BPM: u32 = 120;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const ENV_FILE: &str = ".env";

#[derive(Parser, Debug)]
#[command(
    name = "bhaptics-subscribe",
    about = "Subscribe to bHaptics control topics and drive a local haptic device."
)]
struct Args {
    /// MQTT broker host or URL.
    #[arg(long, default_value = DEFAULT_BROKER)]
    broker: String,

    /// MQTT broker port.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// MQTT keepalive in seconds.
    #[arg(long, default_value_t = DEFAULT_KEEPALIVE_SECS)]
    keepalive: u16,

    /// MQTT QoS level for both subscriptions.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2), default_value_t = DEFAULT_QOS)]
    qos: u8,

    /// MQTT username.
    #[arg(long)]
    username: Option<String>,

    /// MQTT password.
    #[arg(long)]
    password: Option<String>,

    /// Initial BPM before any bhaptics/bpm message arrives.
    #[arg(long, default_value_t = DEFAULT_BPM)]
    default_bpm: u32,

    /// Override the directory holding config.json (tests / multi-instance runs).
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Path to a `.env` file to load credentials from.
    #[arg(long, default_value = ENV_FILE)]
    env_file: PathBuf,
}

fn main() {
    env_logger::init();
    std::process::exit(run());
}

fn run() -> i32 {
    let args = Args::parse();

    let credentials = match bhaptics_controller::broker::load_credentials(&args.env_file) {
        Ok(credentials) => credentials,
        Err(err) => {
            log::error!("{err}");
            return 1;
        }
    };

    let (host, port) = match bhaptics_controller::broker::parse_broker(&args.broker, args.port) {
        Ok(pair) => pair,
        Err(err) => {
            log::error!("{err}");
            return 1;
        }
    };
    let broker_config = BrokerConfig {
        host: host.clone(),
        port,
        keepalive_secs: args.keepalive,
        qos: args.qos,
        username: args.username.clone(),
        password: args.password.clone(),
    };
    log::info!(
        "broker={}:{} keepalive={}s qos={}",
        broker_config.host,
        broker_config.port,
        broker_config.keepalive_secs,
        broker_config.qos
    );

    let config_store = match open_config_store(args.config_dir.as_deref()) {
        Ok(store) => Arc::new(store),
        Err(err) => {
            log::error!("failed to open config store: {err}");
            return 1;
        }
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to start runtime");

    rt.block_on(async move {
        let handle = controller::spawn(
            config_store,
            Box::new(LoggingActuator::new()),
            Arc::new(SystemClock),
            credentials,
            args.default_bpm,
        );

        let mut options = MqttOptions::new("bhaptics-subscribe", host, port);
        options.set_keep_alive(Duration::from_secs(args.keepalive as u64));
        if let Some(username) = args.username.clone() {
            options.set_credentials(username, args.password.clone().unwrap_or_default());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 32);
        let qos = bhaptics_controller::broker::qos_from_u8(args.qos);

        if let Err(err) = tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut event_loop))
            .await
            .unwrap_or(Err("timeout waiting for MQTT connection".to_string()))
        {
            log::error!("{err}");
            return 1;
        }
        log::info!("connected to broker");

        if let Err(err) = client
            .subscribe(
                bhaptics_controller::message_adapter::BPM_TOPIC,
                qos,
            )
            .await
        {
            log::error!("failed to subscribe to bpm topic: {err}");
            return 1;
        }
        if let Err(err) = client
            .subscribe(
                bhaptics_controller::message_adapter::RUN_TOPIC,
                qos,
            )
            .await
        {
            log::error!("failed to subscribe to run topic: {err}");
            return 1;
        }

        let shutdown = install_shutdown_signal();

        loop {
            tokio::select! {
                biased;

                _ = shutdown.notified() => {
                    log::info!("shutdown requested, closing controller");
                    let _ = handle.submit(Command::Close).await;
                    break;
                }

                event = event_loop.poll() => {
                    match event {
                        Ok(Event::Incoming(Packet::Publish(publish))) => {
                            handle_publish(&handle, &publish.topic, &publish.payload);
                        }
                        Ok(_) => {}
                        Err(err) => {
                            log::warn!("MQTT connection error: {err}");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        }

        0
    })
}

/// Parses and enqueues a single publish synchronously, so back-to-back
/// messages land on the controller's channel in the order the broker
/// delivered them. Only the reply-await (and its timeout logging) is handed
/// off to a spawned task.
fn handle_publish(handle: &controller::ControllerHandle, topic: &str, payload: &[u8]) {
    let Ok(text) = std::str::from_utf8(payload) else {
        log::warn!("dropping non-UTF-8 payload on {topic}");
        return;
    };
    match bhaptics_controller::message_adapter::parse_message(topic, text) {
        Ok(Some(command)) => match handle.try_enqueue(command) {
            Ok(pending) => {
                tokio::spawn(async move {
                    if let Err(err) = pending.wait(controller::DEFAULT_COMMAND_TIMEOUT).await {
                        log::warn!("command timed out: {err}");
                    }
                });
            }
            Err(err) => log::warn!("failed to enqueue command from {topic}: {err}"),
        },
        Ok(None) => log::debug!("dropping message on unknown topic {topic:?}"),
        Err(err) => log::warn!("dropping unparseable message on {topic}: {err}"),
    }
}

async fn wait_for_connack(event_loop: &mut rumqttc::EventLoop) -> Result<(), String> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == rumqttc::ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(format!("MQTT connect failed: {:?}", ack.code))
                };
            }
            Ok(_) => continue,
            Err(err) => return Err(format!("MQTT connect failed: {err}")),
        }
    }
}

fn open_config_store(config_dir: Option<&std::path::Path>) -> std::io::Result<ConfigStore> {
    let result = match config_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            ConfigStore::open(dir.join("config.json"))
        }
        None => ConfigStore::open_default(),
    };
    result.map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))
}

/// Bridges the synchronous `ctrlc` handler and SIGTERM into a single async
/// notification the main select loop can await.
fn install_shutdown_signal() -> Arc<tokio::sync::Notify> {
    let notify = Arc::new(tokio::sync::Notify::new());

    let ctrlc_notify = notify.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        ctrlc_notify.notify_one();
    }) {
        log::warn!("failed to install Ctrl-C handler: {err}");
    }

    #[cfg(unix)]
    {
        let sigterm_notify = notify.clone();
        tokio::spawn(async move {
            let Ok(mut sigterm) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            else {
                return;
            };
            sigterm.recv().await;
            sigterm_notify.notify_one();
        });
    }

    notify
}
