use serde::{Deserialize, Serialize};

pub const PLACEHOLDER: &str = "TBD";

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ExtractionSource {
    Ai,
    #[default]
    Heuristic,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct EventInfo {
    pub title: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub venue_name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zip_code: Option<String>,
    pub building: Option<String>,
    pub campus: Option<String>,
    pub landmarks: Option<String>,
    pub full_location: Option<String>,
    pub agenda: Vec<String>,
    pub description: Option<String>,
    pub event_type: Option<String>,
    pub speakers: Vec<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub website: Option<String>,
    pub parking_info: Option<String>,
    pub transportation: Option<String>,
    // heuristic matches, kept as location fallbacks
    pub dates: Vec<String>,
    pub times: Vec<String>,
    pub addresses: Vec<String>,
    pub agenda_content: Option<String>,
    pub location_content: Option<String>,
    pub ai_response: Option<String>,
    pub source: ExtractionSource,
}

impl EventInfo {
    pub fn title_or(&self, fallback: &str) -> String {
        or_placeholder(&self.title, fallback)
    }

    pub fn date_or_tbd(&self) -> String {
        or_placeholder(&self.date, PLACEHOLDER)
    }

    pub fn start_or_tbd(&self) -> String {
        or_placeholder(&self.start_time, PLACEHOLDER)
    }

    pub fn end_or_tbd(&self) -> String {
        or_placeholder(&self.end_time, PLACEHOLDER)
    }

    pub fn venue_or_tbd(&self) -> String {
        or_placeholder(&self.venue_name, PLACEHOLDER)
    }

    pub fn has_title(&self) -> bool {
        present(&self.title).is_some()
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmailSource {
    Listed,
    Website,
    Guessed,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Restaurant {
    pub name: String,
    pub address: Option<String>,
    pub full_address: Option<String>,
    pub place_id: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub rating: Option<f64>,
    pub price_level: Option<u8>,
    pub types: Vec<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub maps_url: Option<String>,
    pub opening_hours: Vec<String>,
    pub email: Option<String>,
    pub email_source: Option<EmailSource>,
}

impl Restaurant {
    pub fn best_address(&self) -> Option<&str> {
        present(&self.full_address).or_else(|| present(&self.address))
    }

    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            "Restaurant"
        } else {
            self.name.trim()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DraftEmail {
    pub restaurant_index: usize,
    pub subject: String,
    pub body: String,
    pub recipient: Option<String>,
    pub recipient_edited: bool,
}

impl DraftEmail {
    pub fn has_recipient(&self) -> bool {
        self.recipient
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SendOutcome {
    pub restaurant: String,
    pub recipient: Option<String>,
    pub success: bool,
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageStatus {
    Done,
    Degraded,
    Skipped,
    Failed,
}

#[derive(Serialize, Clone, Debug)]
pub struct StageNote {
    pub stage: &'static str,
    pub status: StageStatus,
    pub detail: String,
}

pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn or_placeholder(value: &Option<String>, fallback: &str) -> String {
    present(value)
        .map(str::to_string)
        .unwrap_or_else(|| fallback.to_string())
}
