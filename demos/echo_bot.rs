//! Echo bot - replies to every incoming message.
//!
//! This example demonstrates:
//! - Building a client with a stored auth token
//! - Registering message handlers with filters
//! - Watching connection events
//!
//! # Running
//!
//! ```sh
//! WEBMAX_TOKEN=... RUST_LOG=webmax_client=debug cargo run --example echo_bot
//! ```

use webmax_client::{Client, ConnectionEvent, Filter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let token = std::env::var("WEBMAX_TOKEN")?;

    let client = Client::builder()
        .token(token)
        // Answer "ping" with a reply linked to the original message
        .on_message(Filter::text("ping"), |client, message| async move {
            message.reply(&client, "pong").await?;
            Ok(())
        })
        // Echo anything else that did not come from us
        .on_message(Filter::me().negate(), |client, message| async move {
            if !message.is_empty() {
                message.answer(&client, &message.text).await?;
            }
            Ok(())
        })
        .on_connect(|client| async move {
            if let Some(me) = client.me() {
                println!("logged in as {}", me.contact.display_name().unwrap_or("?"));
            }
            Ok(())
        })
        .start()
        .await?;

    let mut events = client.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ConnectionEvent::HandlerFailed { handler, error } = event {
                eprintln!("{} failed: {}", handler, error);
            }
        }
    });

    let reason = client.wait_for_shutdown().await;
    println!("connection closed: {}", reason);

    Ok(())
}
