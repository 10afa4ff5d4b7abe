use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::models::{EventInfo, ExtractionSource};
use crate::scraping::base;

static TITLE_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "h1",
        ".event-title",
        ".title",
        "[class*=\"title\"]",
        "[class*=\"event\"]",
        "title",
    ]
    .iter()
    .map(|css| Selector::parse(css).expect("title selector"))
    .collect()
});

static DATE_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4}\b",
        r"(?i)\b(?:January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}\b",
        r"(?i)\b\d{1,2}\s+(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+\d{4}\b",
    ]
    .iter()
    .map(|re| Regex::new(re).expect("date regex"))
    .collect()
});

static TIME_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"(?i)\b\d{1,2}:\d{2}\s*(?:AM|PM)\b", r"\b\d{1,2}:\d{2}\b"]
        .iter()
        .map(|re| Regex::new(re).expect("time regex"))
        .collect()
});

static ADDRESS_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\b\d+\s+[A-Za-z\s]+(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Drive|Dr|Lane|Ln|Way|Court|Ct)\b",
        r"\b[A-Za-z\s]+,\s*[A-Z]{2}\s+\d{5}\b",
    ]
    .iter()
    .map(|re| Regex::new(re).expect("address regex"))
    .collect()
});

static JSON_SPAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("json span regex"));

const EMPTY_MARKERS: [&str; 6] = ["null", "none", "n/a", "na", "unknown", "tbd"];

pub fn extract_basic_info(html: &str, text: &str) -> EventInfo {
    let document = Html::parse_document(html);
    let mut info = EventInfo {
        source: ExtractionSource::Heuristic,
        ..EventInfo::default()
    };

    info.title = TITLE_SELECTORS
        .iter()
        .find_map(|selector| base::first_text(&document, selector));

    info.dates = first_matching(&DATE_RES, text);
    info.times = first_matching(&TIME_RES, text);
    info.addresses = first_matching(&ADDRESS_RES, text)
        .into_iter()
        .map(|address| base::clean_text(&address))
        .collect();

    info.date = info
        .dates
        .first()
        .map(|raw| normalize_date(raw).unwrap_or_else(|| raw.clone()));
    info.start_time = info.times.first().cloned();
    info.end_time = info.times.get(1).cloned();

    info
}

fn first_matching(patterns: &[Regex], text: &str) -> Vec<String> {
    for pattern in patterns {
        let mut found: Vec<String> = Vec::new();
        for m in pattern.find_iter(text) {
            let value = m.as_str().trim().to_string();
            if !found.contains(&value) {
                found.push(value);
            }
        }
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

pub fn normalize_date(raw: &str) -> Option<String> {
    let cleaned = base::clean_text(raw).replace('-', "/");
    // chrono's %Y happily reads "24" as year 24.
    let numeric = match cleaned.rsplit('/').next() {
        Some(year) if cleaned.contains('/') && year.len() == 2 => "%m/%d/%y",
        _ => "%m/%d/%Y",
    };
    let formats = [
        numeric,
        "%B %d, %Y",
        "%B %d %Y",
        "%d %B %Y",
        "%b %d, %Y",
        "%d %b %Y",
    ];
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(&cleaned, fmt).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AiEvent {
    #[serde(deserialize_with = "lenient_string")]
    title: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    date: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    start_time: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    end_time: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    venue_name: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    address: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    city: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    state: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    country: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    zip_code: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    building: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    campus: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    landmarks: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    full_location: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    agenda: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    description: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    event_type: Option<String>,
    #[serde(deserialize_with = "lenient_list")]
    speakers: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    contact_email: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    contact_phone: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    website: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    parking_info: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    transportation: Option<String>,
}

/// Reads the first `{...}` span of a model answer. On success the model's
/// fields win and the heuristic lists are carried along; on failure the
/// heuristic record comes back with the raw answer attached.
pub fn merge_ai_response(raw: &str, heuristic: &EventInfo) -> Result<EventInfo, EventInfo> {
    let degraded = || EventInfo {
        ai_response: Some(raw.to_string()),
        ..heuristic.clone()
    };

    let Some(span) = JSON_SPAN_RE.find(raw) else {
        tracing::warn!(chars = raw.len(), "no JSON object in model answer");
        return Err(degraded());
    };

    let parsed: AiEvent = match serde_json::from_str(span.as_str()) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(error = %err, "model answer is not valid event JSON");
            return Err(degraded());
        }
    };

    Ok(EventInfo {
        title: parsed.title,
        date: parsed.date,
        start_time: parsed.start_time,
        end_time: parsed.end_time,
        venue_name: parsed.venue_name,
        address: parsed.address,
        city: parsed.city,
        state: parsed.state,
        country: parsed.country,
        zip_code: parsed.zip_code,
        building: parsed.building,
        campus: parsed.campus,
        landmarks: parsed.landmarks,
        full_location: parsed.full_location,
        agenda: parsed.agenda,
        description: parsed.description,
        event_type: parsed.event_type,
        speakers: parsed.speakers,
        contact_email: parsed.contact_email,
        contact_phone: parsed.contact_phone,
        website: parsed.website,
        parking_info: parsed.parking_info,
        transportation: parsed.transportation,
        dates: heuristic.dates.clone(),
        times: heuristic.times.clone(),
        addresses: heuristic.addresses.clone(),
        agenda_content: heuristic.agenda_content.clone(),
        location_content: heuristic.location_content.clone(),
        ai_response: None,
        source: ExtractionSource::Ai,
    })
}

fn scalar_text(value: Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => items
            .into_iter()
            .filter_map(scalar_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(_, v)| scalar_text(v))
            .collect::<Vec<_>>()
            .join(" "),
        Value::Null => return None,
    };
    let text = base::clean_text(&text);
    let lowered = text.to_lowercase();
    if text.is_empty() || EMPTY_MARKERS.iter().any(|marker| *marker == lowered) {
        None
    } else {
        Some(text)
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(scalar_text))
}

fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Array(items)) => items.into_iter().filter_map(scalar_text).collect(),
        Some(other) => scalar_text(other).into_iter().collect(),
        None => Vec::new(),
    };
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PLACEHOLDER;

    const SAMPLE_HTML: &str = r#"
    <html>
    <head><title>Tech Conference 2024</title></head>
    <body>
        <h1>Annual Tech Conference 2024</h1>
        <p>Date: March 15, 2024</p>
        <p>Time: 9:00 AM - 5:00 PM</p>
        <p>Location: Convention Center, 123 Main St, San Francisco, CA 94102</p>
        <div class="agenda">
            <h2>Agenda</h2>
            <ul>
                <li>9:00 AM - Opening Keynote</li>
                <li>11:00 AM - AI Workshop</li>
            </ul>
        </div>
    </body>
    </html>
    "#;

    fn heuristic(html: &str) -> EventInfo {
        let text = base::page_text(&Html::parse_document(html));
        extract_basic_info(html, &text)
    }

    #[test]
    fn extracts_title_date_time_and_address() {
        let info = heuristic(SAMPLE_HTML);
        assert_eq!(info.source, ExtractionSource::Heuristic);
        assert_eq!(info.title.as_deref(), Some("Annual Tech Conference 2024"));
        assert_eq!(info.dates, vec!["March 15, 2024".to_string()]);
        assert_eq!(info.date.as_deref(), Some("2024-03-15"));
        assert_eq!(info.start_time.as_deref(), Some("9:00 AM"));
        assert_eq!(info.end_time.as_deref(), Some("5:00 PM"));
        assert_eq!(info.times.len(), 3, "duplicates collapse: {:?}", info.times);
        assert_eq!(info.addresses.first().map(String::as_str), Some("123 Main St"));
    }

    #[test]
    fn missing_fields_render_as_placeholders() {
        let html = "<html><body><p>Something is happening somewhere soon, stay tuned for more details.</p></body></html>";
        let info = heuristic(html);
        assert!(info.title.is_none());
        assert_eq!(info.date_or_tbd(), PLACEHOLDER);
        assert_eq!(info.start_or_tbd(), PLACEHOLDER);
        assert_eq!(info.end_or_tbd(), PLACEHOLDER);
        assert_eq!(info.venue_or_tbd(), PLACEHOLDER);
        assert!(info.addresses.is_empty());
    }

    #[test]
    fn falls_back_to_document_title() {
        let info = heuristic("<html><head><title>Harvest Fair</title></head><body><p>x</p></body></html>");
        assert_eq!(info.title.as_deref(), Some("Harvest Fair"));
    }

    #[test]
    fn normalizes_common_date_shapes() {
        assert_eq!(normalize_date("03/15/2024").as_deref(), Some("2024-03-15"));
        assert_eq!(normalize_date("3-15-2024").as_deref(), Some("2024-03-15"));
        assert_eq!(normalize_date("15 Mar 2024").as_deref(), Some("2024-03-15"));
        assert_eq!(normalize_date("15 September 2024").as_deref(), Some("2024-09-15"));
        assert_eq!(normalize_date("someday"), None);
    }

    #[test]
    fn two_digit_years_land_in_this_century() {
        assert_eq!(normalize_date("03/15/24").as_deref(), Some("2024-03-15"));
        assert_eq!(normalize_date("3-15-24").as_deref(), Some("2024-03-15"));

        let html = "<html><body><h1>Spring Meetup</h1><p>Join us on 03/15/24 downtown.</p></body></html>";
        assert_eq!(heuristic(html).date.as_deref(), Some("2024-03-15"));
    }

    #[test]
    fn merges_model_json_wrapped_in_prose() {
        let base_info = heuristic(SAMPLE_HTML);
        let raw = r#"Here is the data:
```json
{
  "title": "Annual Tech Conference",
  "date": "2024-03-15",
  "start_time": "09:00",
  "end_time": null,
  "venue_name": "Convention Center",
  "address": "123 Main St",
  "city": "San Francisco",
  "state": "CA",
  "zip_code": 94102,
  "full_location": "Convention Center, 123 Main St, San Francisco, CA 94102",
  "agenda": ["9:00 AM - Opening Keynote", null, "11:00 AM - AI Workshop"],
  "speakers": "Ada Lovelace",
  "contact_email": "N/A"
}
```"#;
        let info = merge_ai_response(raw, &base_info).expect("valid json");
        assert_eq!(info.source, ExtractionSource::Ai);
        assert_eq!(info.title.as_deref(), Some("Annual Tech Conference"));
        assert_eq!(info.end_time, None);
        assert_eq!(info.zip_code.as_deref(), Some("94102"));
        assert_eq!(info.agenda.len(), 2);
        assert_eq!(info.speakers, vec!["Ada Lovelace".to_string()]);
        assert_eq!(info.contact_email, None);
        assert_eq!(info.addresses, base_info.addresses);
        assert!(info.ai_response.is_none());
    }

    #[test]
    fn malformed_model_answer_keeps_heuristics() {
        let base_info = heuristic(SAMPLE_HTML);
        let raw = "I could not find any event { title: broken";
        let info = merge_ai_response(raw, &base_info).expect_err("not json");
        assert_eq!(info.source, ExtractionSource::Heuristic);
        assert_eq!(info.title, base_info.title);
        assert_eq!(info.ai_response.as_deref(), Some(raw));

        let unparsable = merge_ai_response("{ not: json }", &base_info).expect_err("bad json");
        assert_eq!(unparsable.date, base_info.date);
    }
}
