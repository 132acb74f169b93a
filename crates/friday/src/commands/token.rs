//! LiveKit join token.

use anyhow::{bail, Result};

use friday_core::livekit::LiveKitGateway;
use friday_core::Config;

pub async fn execute(room: &str, identity: Option<&str>, config: &Config) -> Result<()> {
    let gateway = LiveKitGateway::new(&config.livekit);
    if !gateway.is_configured() {
        bail!("LiveKit is not configured (missing {})", gateway.missing_settings().join(", "));
    }

    let token = gateway.agent_token(room, identity)?;
    println!("{}", token);
    Ok(())
}
