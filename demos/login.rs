//! Interactive login - obtains an auth token by phone number.
//!
//! The server sends a verification code by SMS; the example reads it from
//! stdin, retrying on a wrong code, and prints the resulting token.
//!
//! # Running
//!
//! ```sh
//! cargo run --example login -- +79990000000
//! ```

use tokio::io::{AsyncBufReadExt, BufReader};
use webmax_client::Client;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let phone = std::env::args()
        .nth(1)
        .ok_or("usage: login <phone>")?;

    let client = Client::builder().phone(phone.clone()).build();
    let verify_token = client.start_auth(&phone).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("enter the code:");
        let Some(code) = lines.next_line().await? else {
            return Err("stdin closed".into());
        };

        match client.check_code(&verify_token, code.trim()).await {
            Ok(user) => {
                println!("logged in as user {}", user.id());
                break;
            }
            Err(e) if e.is_wrong_code() => println!("wrong code, try again"),
            Err(e) => return Err(e.into()),
        }
    }

    if let Some(token) = client.token() {
        println!("token: {}", token);
    }
    client.stop().await;

    Ok(())
}
