//! API layer - HTTP endpoint handlers organized by domain.

mod campaigns;
mod health;
mod messages;
mod metrics;
mod routes;

pub use campaigns::{send_campaign, CampaignResponse};
pub use health::{health, stats, HealthResponse, StatsResponse};
pub use messages::{
    create_message, get_message, list_messages, requeue_messages, resend_message, MessageQuery,
};
pub use metrics::prometheus_metrics;
pub use routes::{api_routes, public_routes};
