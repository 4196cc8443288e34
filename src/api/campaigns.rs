//! Campaign endpoint.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::campaign::{Campaign, FanoutReport};
use crate::error::Result;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    pub campaign: Campaign,
    pub report: FanoutReport,
}

/// POST /api/v1/campaigns - fan a campaign out into queued messages
pub async fn send_campaign(
    State(state): State<AppState>,
    Json(mut campaign): Json<Campaign>,
) -> Result<(StatusCode, Json<CampaignResponse>)> {
    let report = state.fanout.send(&mut campaign).await?;
    Ok((StatusCode::CREATED, Json(CampaignResponse { campaign, report })))
}
