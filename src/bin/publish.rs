//! Minimal CLI publisher: sends the same wire payloads a GUI publisher would,
//! so the subscriber binary can be exercised end-to-end without the original
//! Tk publisher UI (out of scope for this crate — see SPEC_FULL.md §1).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};

use bhaptics_controller::message_adapter::{BPM_TOPIC, RUN_TOPIC};

const DEFAULT_BROKER: &str = "mqtt-web.makinteract.com";
const DEFAULT_PORT: u16 = 1883;
const DEFAULT_KEEPALIVE_SECS: u16 = 60;
const DEFAULT_QOS: u8 = 1;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "bhaptics-publish",
    about = "Publish bHaptics control values to MQTT topics."
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

    /// MQTT QoS level.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=2), default_value_t = DEFAULT_QOS)]
    qos: u8,

    /// Publish with the retained flag.
    #[arg(long)]
    retain: bool,

    /// MQTT username.
    #[arg(long)]
    username: Option<String>,

    /// MQTT password.
    #[arg(long)]
    password: Option<String>,

    /// Value for bhaptics/bpm.
    #[arg(long)]
    bpm: Option<i64>,

    /// Publish a start target as floor(current_time) + delay_s seconds.
    #[arg(long = "delay-s")]
    delay_s: Option<f64>,

    /// Run command: 0 = stop now, 1 = start using the resolved target timestamp.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
    run: Option<u8>,
}

fn main() {
    env_logger::init();
    std::process::exit(run());
}

fn run() -> i32 {
    let args = Args::parse();

    if args.bpm.is_none() && args.run.is_none() && args.delay_s.is_none() {
        eprintln!("error: at least one of --bpm, --run, or --delay-s is required");
        return 1;
    }
    if let Some(bpm) = args.bpm {
        if bpm <= 0 {
            eprintln!("error: --bpm must be a positive integer");
            return 1;
        }
    }
    if let Some(delay_s) = args.delay_s {
        if delay_s < 0.0 {
            eprintln!("error: --delay-s must be >= 0");
            return 1;
        }
    }
    if args.delay_s.is_some() && args.run == Some(0) {
        eprintln!("error: --delay-s cannot be used with --run 0");
        return 1;
    }

    let (host, port) = match bhaptics_controller::broker::parse_broker(&args.broker, args.port) {
        Ok(pair) => pair,
        Err(err) => {
            eprintln!("error: {err}");
            return 1;
        }
    };

    let qos = bhaptics_controller::broker::qos_from_u8(args.qos);
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to start runtime");

    rt.block_on(async move {
        let mut options = MqttOptions::new("bhaptics-publish", host, port);
        options.set_keep_alive(Duration::from_secs(args.keepalive as u64));
        if let Some(username) = args.username.clone() {
            options.set_credentials(username, args.password.clone().unwrap_or_default());
        }

        let (client, mut event_loop) = AsyncClient::new(options, 10);

        if let Err(err) = tokio::time::timeout(CONNECT_TIMEOUT, wait_for_connack(&mut event_loop))
            .await
            .unwrap_or(Err("timeout waiting for MQTT connection".to_string()))
        {
            eprintln!("error: {err}");
            return 1;
        }

        // Keep the event loop alive for the duration of the publish calls;
        // rumqttc drives outgoing packets through this task.
        let drive = tokio::spawn(async move {
            loop {
                if event_loop.poll().await.is_err() {
                    break;
                }
            }
        });

        if let Some(bpm) = args.bpm {
            if let Err(err) = publish_value(&client, BPM_TOPIC, bpm, qos, args.retain).await {
                eprintln!("error: {err}");
                drive.abort();
                return 1;
            }
            println!("published {BPM_TOPIC}={bpm}");
        }

        let should_publish_start = args.run == Some(1) || (args.run.is_none() && args.delay_s.is_some());
        if args.run == Some(0) {
            if let Err(err) = publish_value(&client, RUN_TOPIC, 0, qos, args.retain).await {
                eprintln!("error: {err}");
                drive.abort();
                return 1;
            }
            println!("published {RUN_TOPIC}=0");
        } else if should_publish_start {
            let payload = resolve_run_payload(args.delay_s);
            if let Err(err) = publish_value(&client, RUN_TOPIC, payload, qos, args.retain).await {
                eprintln!("error: {err}");
                drive.abort();
                return 1;
            }
            println!(
                "published {RUN_TOPIC} target_ts_ms={payload} (delay_s={})",
                args.delay_s.unwrap_or(0.0)
            );
        }

        let _ = client.disconnect().await;
        drive.abort();
        0
    })
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

async fn publish_value(
    client: &AsyncClient,
    topic: &str,
    value: i64,
    qos: QoS,
    retain: bool,
) -> Result<(), String> {
    client
        .publish(topic, qos, retain, value.to_string())
        .await
        .map_err(|err| format!("failed to publish {topic}: {err}"))
}

/// `run=0` maps to a literal stop payload; otherwise resolve the start target:
/// current epoch-ms with no delay, or `floor(now/1000)*1000 + round(delay_s*1000)`
/// when a delay was given, so two independently-launched publishers floor-align.
fn resolve_run_payload(delay_s: Option<f64>) -> i64 {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    match delay_s {
        None => now_ms,
        Some(delay_s) => (now_ms / 1000) * 1000 + (delay_s * 1000.0).round() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_run_payload_without_delay_is_current_time() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as i64;
        let payload = resolve_run_payload(None);
        assert!(payload >= before);
    }

    #[test]
    fn resolve_run_payload_with_delay_floors_to_second() {
        let payload = resolve_run_payload(Some(2.5));
        assert_eq!(payload % 500, 0);
    }
}
