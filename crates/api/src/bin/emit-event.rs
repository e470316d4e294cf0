#!/usr/bin/env cargo
//! Event and token utility for the helpdesk realtime service
//!
//! Publishes a single domain event onto the conversation topic, or mints an
//! access token a WebSocket client can connect with. Reads the same
//! environment as the server (`JWT_SECRET`, `RABBITMQ_URL`, ...).
//!
//! Usage:
//!   cargo run --bin emit-event -- publish message.received acme '{"conversation_id":"c-1"}'
//!   cargo run --bin emit-event -- token agent-1 acme agent
//!
//! Example output (token):
//!   eyJ0eXAiOiJKV1QiLCJhbGciOiJIUzI1NiJ9...

use std::env;

use helpdesk_api::{auth::JwtManager, AmqpBroker, AmqpPublisher, Config};
use helpdesk_shared::{routing_keys, EventEnvelope, UserRole};
use serde_json::Value;

fn usage() -> ! {
    eprintln!("Usage:");
    eprintln!("  emit-event publish <type> <tenant_id> [json-object]");
    eprintln!("  emit-event token <user_id> <tenant_id> [role]");
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args: Vec<String> = env::args().skip(1).collect();

    match args.first().map(String::as_str) {
        Some("publish") if args.len() >= 3 => {
            publish(&args[1], &args[2], args.get(3).map(String::as_str)).await
        }
        Some("token") if args.len() >= 3 => {
            token(&args[1], &args[2], args.get(3).map(String::as_str).unwrap_or("agent"))
        }
        _ => usage(),
    }
}

async fn publish(event_type: &str, tenant_id: &str, payload: Option<&str>) -> anyhow::Result<()> {
    if !routing_keys::is_known(event_type) {
        anyhow::bail!(
            "Unknown event type '{}'; expected one of: {}",
            event_type,
            routing_keys::ALL.join(", ")
        );
    }

    let config = Config::from_env()?;

    let payload: Value = match payload {
        Some(raw) => serde_json::from_str(raw)?,
        None => Value::Null,
    };
    let envelope = EventEnvelope::new(event_type, tenant_id, &payload)?;

    let broker = AmqpBroker::connect(&config.rabbitmq_url, &config.realtime_exchange).await?;
    let publisher = AmqpPublisher::new(&broker, config.realtime_exchange.clone()).await?;
    publisher.publish(&envelope).await?;

    println!(
        "Published {} for tenant '{}' to {}",
        envelope.event_type, envelope.tenant_id, config.realtime_exchange
    );
    Ok(())
}

fn token(user_id: &str, tenant_id: &str, role: &str) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let role: UserRole = serde_json::from_value(Value::String(role.to_string()))?;

    let jwt = JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours);
    let token = jwt.generate_access_token(user_id, tenant_id, "", role)?;

    if tenant_id.is_empty() {
        eprintln!("Warning: token has no tenant; it only receives untagged events");
    }

    println!("{}", token);
    Ok(())
}
