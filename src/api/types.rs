// ABOUTME: Wire types returned by the racing data service.
// ABOUTME: Only the fields the sync engine persists are modeled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A club and its member list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClubRoster {
    pub club_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub riders: Vec<ClubMember>,
}

impl ClubRoster {
    pub fn rider_ids(&self) -> Vec<u64> {
        self.riders.iter().map(|r| r.rider_id).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClubMember {
    pub rider_id: u64,
    #[serde(default)]
    pub name: String,
}

/// Rider profile snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiderProfile {
    pub rider_id: u64,
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default, alias = "zpCategory")]
    pub category: Option<String>,
    #[serde(default, alias = "zpFTP")]
    pub ftp: Option<f64>,
    #[serde(default)]
    pub weight: Option<f64>,
}

/// An event discovered through the upcoming-events endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpcomingEvent {
    #[serde(alias = "eventId")]
    pub id: u64,
    #[serde(default, alias = "name")]
    pub title: String,
    #[serde(alias = "eventStart")]
    pub start: DateTime<Utc>,
}

/// A rider signed up for an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSignup {
    pub rider_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
}

/// One finisher row of an event result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventResult {
    pub rider_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub position: Option<u32>,
    /// Race time in seconds.
    #[serde(default)]
    pub time: Option<f64>,
    #[serde(default)]
    pub average_wkg: Option<f64>,
}
