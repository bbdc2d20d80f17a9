use futures_util::StreamExt;
use obs_websocket_bridge::catalog::requests::GetVersion;
use obs_websocket_bridge::config::Config;
use obs_websocket_bridge::{
    Engine, FileStore, OpCode, PayloadRegistry, StatusProbe, WebSocketTransport,
};
use serde_json::json;
use std::sync::Arc;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    if let Some(ref command) = std::env::args().nth(1) {
        if command == "config-init" {
            return handle_config_init();
        }
        if command == "store-set" {
            return handle_store_set(&config);
        }
        if command == "store-get" {
            return handle_store_get(&config);
        }
        if command == "store-list" {
            return handle_store_list(&config);
        }
        if command == "version" {
            return handle_version(&config).await;
        }
        if command == "status" {
            return handle_status(&config).await;
        }
        if command == "request" {
            return handle_request(&config).await;
        }
        if command == "watch" {
            return handle_watch(&config).await;
        }
        return Err(format!("unknown command: {command}").into());
    }

    let engine = connect(&config, PayloadRegistry::with_builtin()).await?;
    let mut events = engine.operation(OpCode::Event)?;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            next = events.next() => match next {
                Some(Ok(data)) => {
                    if let obs_websocket_bridge::codec::OpData::Event(event) = &*data {
                        tracing::info!(
                            event_type = %event.event_type,
                            intent = %event.event_intent,
                            "event"
                        );
                    }
                }
                Some(Err(err)) => return Err(err.into()),
                None => break,
            },
            _ = &mut shutdown => {
                tracing::info!("shutdown: ctrl-c");
                break;
            }
        }
    }

    drop(events);
    engine.disconnect().await;
    Ok(())
}

async fn connect(
    config: &Config,
    registry: PayloadRegistry,
) -> Result<Engine, Box<dyn std::error::Error>> {
    let store = Arc::new(FileStore::new(config.store.path.as_deref())?);
    let params = config.connection_params(&store)?;
    let engine = Engine::builder(Arc::new(WebSocketTransport::new()))
        .store(store)
        .registry(registry)
        .handshake_timeout(config.handshake_timeout())
        .params(params)
        .build();
    let identified = engine.connect().await?;
    tracing::debug!(
        rpc_version = identified.negotiated_rpc_version,
        "connected"
    );
    Ok(engine)
}

fn handle_config_init() -> Result<(), Box<dyn std::error::Error>> {
    let path = Config::default_path();
    Config::write_default(&path)?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn handle_store_set(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(2);
    let key = args.next().ok_or("missing key")?;
    let value = args.next().ok_or("missing value")?;

    let store = FileStore::new(config.store.path.as_deref())?;
    store.set(&key, &value)?;

    println!("Stored key: {}", key);
    Ok(())
}

fn handle_store_get(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(2);
    let key = args.next().ok_or("missing key")?;

    let store = FileStore::new(config.store.path.as_deref())?;
    let value = store.get(&key)?;

    println!("{}", value);
    Ok(())
}

fn handle_store_list(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let store = FileStore::new(config.store.path.as_deref())?;
    for key in store.list_keys() {
        println!("{}", key);
    }
    Ok(())
}

async fn handle_version(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let engine = connect(config, PayloadRegistry::with_builtin()).await?;
    let version = engine.send_request(&GetVersion).await;
    engine.disconnect().await;
    let version = version?;

    println!("OBS {}", version.obs_version);
    println!("obs-websocket {}", version.obs_web_socket_version);
    println!("rpc version {}", version.rpc_version);
    if !version.platform_description.is_empty() {
        println!("platform {}", version.platform_description);
    }
    Ok(())
}

async fn handle_status(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let engine = connect(config, PayloadRegistry::with_builtin()).await?;
    let frame = StatusProbe::new(engine.clone()).collect().await;
    engine.disconnect().await;

    println!("{}", serde_json::to_string_pretty(&frame?)?);
    Ok(())
}

async fn handle_request(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(2);
    let request_type = args
        .next()
        .ok_or("missing request type (usage: request <RequestType> [json])")?;
    let request_data = match args.next() {
        Some(raw) => Some(serde_json::from_str::<serde_json::Value>(&raw)?),
        None => None,
    };

    let engine = connect(config, PayloadRegistry::with_builtin()).await?;
    let response = engine.send_request_raw(&request_type, request_data).await;
    engine.disconnect().await;

    match response? {
        Some(data) => println!("{}", serde_json::to_string_pretty(&data)?),
        None => println!("ok"),
    }
    Ok(())
}

async fn handle_watch(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let event_types: Vec<String> = std::env::args().skip(2).collect();
    if event_types.is_empty() {
        return Err("missing event type (usage: watch <EventType>...)".into());
    }

    let mut registry = PayloadRegistry::with_builtin();
    for event_type in &event_types {
        if !registry.has_event(event_type) {
            registry.register_raw_event(event_type.as_str());
        }
    }

    let engine = connect(config, registry).await?;
    let names: Vec<&str> = event_types.iter().map(String::as_str).collect();
    let mut events = engine.listen_for_events(&names)?;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let outcome = loop {
        tokio::select! {
            next = events.next() => match next {
                Some(Ok(event)) => {
                    let line = json!({
                        "eventType": event.event_type,
                        "eventIntent": event.intent.bits(),
                        "eventData": event.data,
                    });
                    println!("{}", line);
                }
                Some(Err(err)) => break Err(err),
                None => break Ok(()),
            },
            _ = &mut shutdown => {
                tracing::info!("shutdown: ctrl-c");
                break Ok(());
            }
        }
    };

    drop(events);
    engine.disconnect().await;
    outcome.map_err(Into::into)
}
