use std::fmt;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::json;
use thiserror::Error;

use crate::config;
use crate::models::{present, EventInfo, Restaurant, PLACEHOLDER};
use crate::utils;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("composer unavailable: {0}")]
    Unavailable(String),
    #[error("composer returned an empty answer")]
    Empty,
}

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:1234/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TEMPERATURE: f32 = 0.3;
const DEFAULT_MAX_TOKENS: u32 = 4000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);

pub const PROMPT_TEXT_LIMIT: usize = 15_000;
const RELATED_PROMPT_LIMIT: usize = 4_000;

/// Which model and endpoint the composer will call. Reachability is only
/// known once a request is made.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmTarget {
    pub model: String,
    pub endpoint: String,
}

impl LlmTarget {
    pub fn from_env() -> Option<Self> {
        if !enabled_by_env() {
            return None;
        }
        Some(Self {
            model: std::env::var("LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            endpoint: std::env::var("LLM_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string()),
        })
    }
}

impl fmt::Display for LlmTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.model, self.endpoint)
    }
}

pub struct LLMComposer {
    model: String,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
    max_tokens: u32,
    client: Client,
}

impl LLMComposer {
    pub fn from_env() -> Option<Self> {
        let Some(LlmTarget { model, endpoint: base_url }) = LlmTarget::from_env() else {
            tracing::info!("LLM disabled by environment, using fallbacks");
            return None;
        };

        let client = match Client::builder().timeout(REQUEST_TIMEOUT).build() {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(error = %err, "unable to build LLM client, using fallbacks");
                return None;
            }
        };

        Some(Self {
            model,
            base_url,
            api_key: config::non_empty_var("LLM_API_KEY"),
            temperature: config::parsed_var("LLM_TEMPERATURE").unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: config::parsed_var("LLM_MAX_TOKENS").unwrap_or(DEFAULT_MAX_TOKENS),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn extract_event(&self, page_text: &str, basic: &EventInfo) -> Result<String, ComposeError> {
        let prompt = build_extraction_prompt(page_text, basic);
        tracing::debug!(chars = prompt.len(), model = %self.model, "sending extraction prompt");
        self.chat(EXTRACTION_SYSTEM, &prompt)
    }

    pub fn draft_email(
        &self,
        event: &EventInfo,
        restaurant: &Restaurant,
        party_size: u32,
    ) -> Result<String, ComposeError> {
        let prompt = build_draft_prompt(event, restaurant, party_size);
        self.chat(DRAFT_SYSTEM, &prompt)
    }

    fn chat(&self, system: &str, user: &str) -> Result<String, ComposeError> {
        let base = self.base_url.trim_end_matches('/');
        let url = format!("{}/chat/completions", base);

        let payload = json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
        });

        let mut request = self.client.post(url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .map_err(|err| ComposeError::Unavailable(err.to_string()))?;

        let status = response.status();
        let text_body = response
            .text()
            .map_err(|err| ComposeError::Unavailable(err.to_string()))?;

        if !status.is_success() {
            return Err(ComposeError::Unavailable(format!(
                "HTTP {}: {}",
                status,
                utils::truncate_chars(&text_body, 300)
            )));
        }

        let value: serde_json::Value = serde_json::from_str(&text_body)
            .map_err(|err| ComposeError::Unavailable(err.to_string()))?;

        answer_content(&value).ok_or(ComposeError::Empty)
    }
}

fn enabled_by_env() -> bool {
    !config::non_empty_var("LLM_DISABLED")
        .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn answer_content(value: &serde_json::Value) -> Option<String> {
    value
        .get("choices")
        .and_then(|choices| choices.as_array())
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

const EXTRACTION_SYSTEM: &str = "You are an expert event information extraction system. You read web page text and return one valid JSON object describing the main event. Location details matter most because they are used to find nearby restaurants.";

const DRAFT_SYSTEM: &str = "You write short, professional and polite emails to restaurants asking to book a table for a group attending an event. Use only the facts provided.";

fn build_extraction_prompt(page_text: &str, basic: &EventInfo) -> String {
    let basic_json = serde_json::to_string_pretty(&json!({
        "title": basic.title,
        "dates": basic.dates,
        "times": basic.times,
        "addresses": basic.addresses,
    }))
    .unwrap_or_default();

    let mut sections = vec![format!(
        "Web page content:\n{}",
        utils::truncate_chars(page_text, PROMPT_TEXT_LIMIT)
    )];
    if let Some(agenda) = present(&basic.agenda_content) {
        sections.push(format!(
            "Agenda page content:\n{}",
            utils::truncate_chars(agenda, RELATED_PROMPT_LIMIT)
        ));
    }
    if let Some(location) = present(&basic.location_content) {
        sections.push(format!(
            "Location page content:\n{}",
            utils::truncate_chars(location, RELATED_PROMPT_LIMIT)
        ));
    }

    format!(
        r#"{content}

Previously extracted basic info:
{basic_json}

Extract every available detail about the event: title, date in YYYY-MM-DD format, start and end time in HH:MM format, event type, description, agenda items with times, speakers, contact details, parking and public transport.

Location is critical. Look for the venue name, street address, building or room, campus, city, state, zip code, country and nearby landmarks, even when they are scattered across the page or only in the footer.

Return a valid JSON object with exactly these keys:
{{
  "title": "Complete event title",
  "date": "YYYY-MM-DD or date range",
  "start_time": "HH:MM",
  "end_time": "HH:MM",
  "venue_name": "Full venue/facility name",
  "address": "Complete street address",
  "city": "City name",
  "state": "State/Province",
  "country": "Country",
  "zip_code": "Postal code",
  "building": "Building or room details",
  "campus": "Campus or complex name",
  "landmarks": "Nearby landmarks or cross streets",
  "full_location": "Most complete location string for mapping",
  "agenda": ["Agenda items with times"],
  "description": "Event description",
  "event_type": "Type of event",
  "speakers": ["Speaker names"],
  "contact_email": "Contact email",
  "contact_phone": "Contact phone",
  "website": "Event website",
  "parking_info": "Parking details",
  "transportation": "Public transport info"
}}

Rules:
- Use null when a field cannot be determined, never an empty string.
- Make full_location the most complete location string you can build.
- If several events are listed, describe the main or featured one.
- Return the JSON object only, with no extra text.
"#,
        content = sections.join("\n\n"),
        basic_json = basic_json,
    )
}

fn restaurant_address(restaurant: &Restaurant) -> &str {
    restaurant.best_address().unwrap_or(PLACEHOLDER)
}

fn build_draft_prompt(event: &EventInfo, restaurant: &Restaurant, party_size: u32) -> String {
    format!(
        "Draft an email to book a table at a restaurant for an event.\n\nEvent information:\n- Event: {title}\n- Date: {date}\n- Time: {start} - {end}\n- Location: {venue}\n\nRestaurant information:\n- Name: {name}\n- Address: {address}\n\nBooking details:\n- Party size: {party_size} people\n- Preferred time: based on the event schedule\n\nThe email needs a professional subject line, a polite greeting, a brief explanation of the event, a specific booking request with a preferred time, a request for confirmation and a professional closing.\n\nFormat it as a complete email starting with a line \"Subject: ...\", then \"Dear {name} Team,\", the body and a signature.\n",
        title = event.title_or("Event"),
        date = event.date_or_tbd(),
        start = event.start_or_tbd(),
        end = event.end_or_tbd(),
        venue = event.venue_or_tbd(),
        name = restaurant.display_name(),
        address = restaurant_address(restaurant),
        party_size = party_size,
    )
}

pub fn basic_email_template(event: &EventInfo, restaurant: &Restaurant, party_size: u32) -> String {
    let date = event.date_or_tbd();
    format!(
        "Subject: Table Reservation Request for {party_size} - {date}

Dear {name} Team,

I hope this email finds you well. I am writing to inquire about making a reservation at your restaurant.

Event Details:
- Event: {title}
- Date: {date}
- Event Time: {start} - {end}
- Event Location: {venue}

Reservation Request:
- Party size: {party_size} people
- Preferred dining time: [Please suggest based on event schedule]
- Date: {date}

We are attending the above event and would love to dine at your establishment. Could you please let me know if you have availability and what times would work best?

Please feel free to contact me at your earliest convenience to confirm the reservation details.

Thank you for your time and consideration.

Best regards,
[Your Name]
[Your Phone Number]
[Your Email Address]
",
        party_size = party_size,
        date = date,
        name = restaurant.display_name(),
        title = event.title_or("Special Event"),
        start = event.start_or_tbd(),
        end = event.end_or_tbd(),
        venue = event.venue_or_tbd(),
    )
}

/// Splits drafted text on its `Subject:` line. Text without one keeps the
/// whole answer as the body.
pub fn split_draft(text: &str, restaurant_name: &str) -> (String, String) {
    let mut subject: Option<String> = None;
    let mut body_lines: Vec<&str> = Vec::new();

    for line in text.lines() {
        if subject.is_none() {
            let bare = line.trim().trim_start_matches(['*', '#', ' ']);
            if let Some(rest) = bare.strip_prefix("Subject:") {
                subject = Some(rest.trim().trim_end_matches('*').trim().to_string());
                body_lines.clear();
                continue;
            }
        }
        body_lines.push(line);
    }

    let subject = subject
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("Table Reservation Request - {restaurant_name}"));
    (subject, body_lines.join("\n").trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> EventInfo {
        EventInfo {
            title: Some("Annual Tech Conference".to_string()),
            date: Some("2024-03-15".to_string()),
            start_time: Some("09:00".to_string()),
            venue_name: Some("Moscone Center".to_string()),
            ..EventInfo::default()
        }
    }

    fn sample_restaurant() -> Restaurant {
        Restaurant {
            name: "Blue Plate".to_string(),
            address: Some("3218 Mission St".to_string()),
            ..Restaurant::default()
        }
    }

    #[test]
    fn template_fills_placeholders() {
        let draft = basic_email_template(&sample_event(), &sample_restaurant(), 6);
        assert!(draft.starts_with("Subject: Table Reservation Request for 6 - 2024-03-15"));
        assert!(draft.contains("Dear Blue Plate Team,"));
        assert!(draft.contains("- Event Time: 09:00 - TBD"));
        assert!(draft.contains("- Party size: 6 people"));
    }

    #[test]
    fn template_without_event_data_uses_tbd() {
        let draft = basic_email_template(&EventInfo::default(), &Restaurant::default(), 2);
        assert!(draft.contains("- Event: Special Event"));
        assert!(draft.contains("- Date: TBD"));
        assert!(draft.contains("Dear Restaurant Team,"));
    }

    #[test]
    fn splits_subject_from_body() {
        let text = "Sure! Here is your email:\n\n**Subject: Dinner for 4 on March 15**\n\nDear Blue Plate Team,\n\nWe would like a table.\n";
        let (subject, body) = split_draft(text, "Blue Plate");
        assert_eq!(subject, "Dinner for 4 on March 15");
        assert!(body.starts_with("Dear Blue Plate Team,"));
        assert!(!body.contains("Sure!"));
    }

    #[test]
    fn missing_subject_uses_default() {
        let (subject, body) = split_draft("Dear team,\nA table please.", "Blue Plate");
        assert_eq!(subject, "Table Reservation Request - Blue Plate");
        assert_eq!(body, "Dear team,\nA table please.");
    }

    #[test]
    fn template_round_trips_through_split() {
        let draft = basic_email_template(&sample_event(), &sample_restaurant(), 4);
        let (subject, body) = split_draft(&draft, "Blue Plate");
        assert_eq!(subject, "Table Reservation Request for 4 - 2024-03-15");
        assert!(body.starts_with("Dear Blue Plate Team,"));
        assert!(body.ends_with("[Your Email Address]"));
    }

    #[test]
    fn reads_first_choice_content() {
        let value = json!({
            "choices": [{ "message": { "role": "assistant", "content": "  {\"title\": \"x\"} " } }]
        });
        assert_eq!(answer_content(&value).as_deref(), Some("{\"title\": \"x\"}"));
        assert_eq!(answer_content(&json!({ "choices": [] })), None);
    }

    #[test]
    fn extraction_prompt_caps_page_text() {
        let text = "a".repeat(PROMPT_TEXT_LIMIT + 500);
        let prompt = build_extraction_prompt(&text, &EventInfo::default());
        assert!(!prompt.contains(&"a".repeat(PROMPT_TEXT_LIMIT + 1)));
        assert!(prompt.contains("\"full_location\""));
    }
}
