use async_trait::async_trait;

use frontdesk_core::domain::agent::Channel;

/// Delivers replies for channels that answer asynchronously.
#[async_trait]
pub trait OutboundDispatcher: Send + Sync {
    async fn send(&self, channel: Channel, to: &str, body: &str) -> Result<(), String>;
}

/// Records replies in the log stream; no provider delivery.
#[derive(Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl OutboundDispatcher for LoggingDispatcher {
    async fn send(&self, channel: Channel, to: &str, body: &str) -> Result<(), String> {
        tracing::info!(
            event_name = "channel.outbound.queued",
            channel = channel.as_str(),
            to = %whatsapp_address(channel, to),
            length = body.chars().count(),
            "outbound reply dispatched"
        );
        Ok(())
    }
}

/// WhatsApp numbers carry a `whatsapp:` scheme on the wire.
pub fn whatsapp_address(channel: Channel, to: &str) -> String {
    if channel == Channel::Whatsapp && !to.starts_with("whatsapp:") {
        format!("whatsapp:{to}")
    } else {
        to.to_string()
    }
}

#[cfg(test)]
pub mod testing {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use frontdesk_core::domain::agent::Channel;

    use super::OutboundDispatcher;

    /// Forwards every send to a channel the test can await.
    pub struct ChannelDispatcher {
        pub sender: mpsc::UnboundedSender<(Channel, String, String)>,
    }

    #[async_trait]
    impl OutboundDispatcher for ChannelDispatcher {
        async fn send(&self, channel: Channel, to: &str, body: &str) -> Result<(), String> {
            self.sender
                .send((channel, to.to_string(), body.to_string()))
                .map_err(|error| error.to_string())
        }
    }
}
