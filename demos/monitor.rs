use std::env;
use std::time::Duration;

use tuya_cloud::{CloudClient, Credentials, Event, MessageLogMode};

#[tokio::main]
async fn main() -> tuya_cloud::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let log_path = args
        .iter()
        .position(|a| a == "--log")
        .and_then(|i| args.get(i + 1));

    let mut builder = CloudClient::builder()
        .credentials(Credentials::from_env()?)
        .resync_interval(Duration::from_secs(60))
        .on_event(|event| match event {
            Event::DeviceUpdated { device } => {
                println!(
                    "[{}] {} ({}/{}) {}",
                    device.id,
                    device.name,
                    device.dev_type,
                    device.category,
                    if device.online { "online" } else { "offline" },
                );
            }
            Event::DataPointChanged {
                device_id,
                code,
                old,
                new,
            } => match old {
                Some(old) => println!("[{device_id}] {code}: {old} -> {new}"),
                None => println!("[{device_id}] {code}: {new}"),
            },
            Event::OnlineChanged { device_id, online } => {
                println!("[{device_id}] online: {online}");
            }
        });

    if let Some(path) = log_path {
        builder = builder.message_log(MessageLogMode::Diffed, path.as_str());
    }

    let client = builder.build()?;

    println!("Connecting...");
    let devices = client.connect().await?;
    println!("Connected, {} devices. Watching for changes...", devices.len());

    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        if !client.is_resyncing() {
            eprintln!("Resync stopped, reconnecting...");
            if let Err(e) = client.connect().await {
                eprintln!("Connect error: {e}");
            }
        }
    }
}
