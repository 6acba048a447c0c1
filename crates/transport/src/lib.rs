pub mod events;
pub mod evolution;
pub mod session;

pub use events::{
    parse_webhook, IgnoredReason, InboundEnvelope, InboundMedia, WebhookError, WebhookEvent,
};
pub use evolution::{ChatApi, ConnectionState, EvolutionClient};
pub use session::{ReconnectPolicy, SessionHealth, SessionRegistry};
