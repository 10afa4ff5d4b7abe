use anyhow::Result;

use crate::config::Settings;
use crate::contact;
use crate::extract;
use crate::llm::{self, LLMComposer};
use crate::models::{DraftEmail, EventInfo, Restaurant, StageNote, StageStatus};
use crate::places::PlacesClient;
use crate::scraping::{self, PageFetcher};

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub url: String,
    pub event: EventInfo,
    pub restaurants: Vec<Restaurant>,
    pub drafts: Vec<DraftEmail>,
    pub notes: Vec<StageNote>,
}

/// Holds blocking clients; build and use it inside `spawn_blocking`.
pub struct EventAgent {
    fetchers: Vec<Box<dyn PageFetcher>>,
    llm: Option<LLMComposer>,
    places: Option<PlacesClient>,
    max_restaurants: usize,
    max_drafts: usize,
}

fn note(stage: &'static str, status: StageStatus, detail: impl Into<String>) -> StageNote {
    StageNote {
        stage,
        status,
        detail: detail.into(),
    }
}

impl EventAgent {
    pub fn new(settings: &Settings) -> Self {
        let places = match PlacesClient::new(settings.maps_api_key.clone()) {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::warn!(error = %err, "restaurant search disabled");
                None
            }
        };
        Self::with_parts(
            scraping::default_fetchers(settings.browser),
            LLMComposer::from_env(),
            places,
            settings,
        )
    }

    pub fn with_parts(
        fetchers: Vec<Box<dyn PageFetcher>>,
        llm: Option<LLMComposer>,
        places: Option<PlacesClient>,
        settings: &Settings,
    ) -> Self {
        Self {
            fetchers,
            llm,
            places,
            max_restaurants: settings.max_restaurants,
            max_drafts: settings.max_drafts,
        }
    }

    /// Runs every stage. Only a failed page fetch is an error; later stages
    /// degrade and say so in the report notes.
    pub fn process_event(&self, url: &str, party_size: u32, radius_m: u32) -> Result<PipelineReport> {
        let mut notes = Vec::new();

        let page = scraping::fetch_page(url, &self.fetchers)?;
        notes.push(note(
            "fetch",
            StageStatus::Done,
            format!("{} characters via {}", page.text.chars().count(), page.fetched_with),
        ));

        let related = match self.fetchers.last() {
            Some(fetcher) => scraping::explore_related(&page, fetcher.as_ref()),
            None => scraping::RelatedContent::default(),
        };
        let found: Vec<&str> = [
            related.agenda.as_ref().map(|_| "agenda"),
            related.location.as_ref().map(|_| "location"),
        ]
        .into_iter()
        .flatten()
        .collect();
        notes.push(if found.is_empty() {
            note("explore", StageStatus::Skipped, "no agenda or location pages found")
        } else {
            note("explore", StageStatus::Done, format!("added {} page text", found.join(" and ")))
        });

        let mut basic = extract::extract_basic_info(&page.html, &page.text);
        basic.agenda_content = related.agenda;
        basic.location_content = related.location;
        let (event, extract_note) = self.extract_event(&page.text, basic);
        notes.push(extract_note);

        let (mut restaurants, search_note) = self.search(&event, radius_m);
        notes.push(search_note);

        if !restaurants.is_empty() {
            let enriched = enrich_contacts(&mut restaurants, contact::find_contact_email);
            notes.push(note(
                "enrich",
                StageStatus::Done,
                format!("{enriched} of {} restaurants have an email address", restaurants.len()),
            ));
        }

        let (drafts, draft_note) = self.draft_emails(&event, &restaurants, party_size);
        notes.push(draft_note);

        Ok(PipelineReport {
            url: page.url,
            event,
            restaurants,
            drafts,
            notes,
        })
    }

    fn extract_event(&self, page_text: &str, basic: EventInfo) -> (EventInfo, StageNote) {
        let Some(llm) = self.llm.as_ref() else {
            return (
                basic,
                note("extract", StageStatus::Skipped, "AI unavailable, basic extraction used"),
            );
        };

        tracing::info!(model = llm.model(), "extracting event fields with AI");
        match llm.extract_event(page_text, &basic) {
            Ok(answer) => match extract::merge_ai_response(&answer, &basic) {
                Ok(event) => {
                    let detail = match event.title.as_deref() {
                        Some(title) => format!("AI extracted \"{title}\""),
                        None => "AI extraction returned no title".to_string(),
                    };
                    (event, note("extract", StageStatus::Done, detail))
                }
                Err(fallback) => (
                    fallback,
                    note(
                        "extract",
                        StageStatus::Degraded,
                        "AI answer was not valid JSON, basic extraction used",
                    ),
                ),
            },
            Err(err) => {
                tracing::warn!(error = %err, "AI extraction failed");
                (
                    basic,
                    note(
                        "extract",
                        StageStatus::Degraded,
                        format!("{err}, basic extraction used"),
                    ),
                )
            }
        }
    }

    fn search(&self, event: &EventInfo, radius_m: u32) -> (Vec<Restaurant>, StageNote) {
        let Some(places) = self.places.as_ref() else {
            return (
                Vec::new(),
                note("search", StageStatus::Skipped, "GOOGLE_MAPS_API_KEY is not configured"),
            );
        };

        match places.search_restaurants(event, radius_m, self.max_restaurants) {
            Ok(result) => match (result.location, result.method) {
                (None, _) => (
                    Vec::new(),
                    note("search", StageStatus::Skipped, "no location information found in event data"),
                ),
                (Some(location), method) => {
                    let count = result.restaurants.len();
                    let status = if count == 0 {
                        StageStatus::Degraded
                    } else {
                        StageStatus::Done
                    };
                    let detail = format!(
                        "{count} restaurants near \"{location}\" ({})",
                        method.unwrap_or("search")
                    );
                    (result.restaurants, note("search", status, detail))
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "restaurant search failed");
                (Vec::new(), note("search", StageStatus::Failed, err.to_string()))
            }
        }
    }

    pub fn draft_emails(
        &self,
        event: &EventInfo,
        restaurants: &[Restaurant],
        party_size: u32,
    ) -> (Vec<DraftEmail>, StageNote) {
        if restaurants.is_empty() {
            return (
                Vec::new(),
                note("draft", StageStatus::Skipped, "no restaurants to write to"),
            );
        }

        let mut fallbacks = 0;
        let drafts: Vec<DraftEmail> = restaurants
            .iter()
            .take(self.max_drafts)
            .enumerate()
            .map(|(index, restaurant)| {
                let text = match self.llm.as_ref().map(|llm| llm.draft_email(event, restaurant, party_size)) {
                    Some(Ok(text)) => text,
                    Some(Err(err)) => {
                        tracing::warn!(restaurant = %restaurant.name, error = %err, "AI draft failed");
                        fallbacks += 1;
                        llm::basic_email_template(event, restaurant, party_size)
                    }
                    None => {
                        fallbacks += 1;
                        llm::basic_email_template(event, restaurant, party_size)
                    }
                };
                let (subject, body) = llm::split_draft(&text, restaurant.display_name());
                DraftEmail {
                    restaurant_index: index,
                    subject,
                    body,
                    recipient: restaurant.email.clone(),
                    recipient_edited: false,
                }
            })
            .collect();

        let status = if fallbacks == 0 {
            StageStatus::Done
        } else {
            StageStatus::Degraded
        };
        let detail = format!("{} drafts, {fallbacks} from the template", drafts.len());
        (drafts, note("draft", status, detail))
    }
}

pub fn enrich_contacts<F>(restaurants: &mut [Restaurant], lookup: F) -> usize
where
    F: Fn(&Restaurant) -> Option<(String, crate::models::EmailSource)>,
{
    for restaurant in restaurants.iter_mut() {
        if let Some((email, source)) = lookup(restaurant) {
            restaurant.email = Some(email);
            restaurant.email_source = Some(source);
        }
    }
    restaurants.iter().filter(|r| r.email.is_some()).count()
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::models::{EmailSource, ExtractionSource};

    const EVENT_HTML: &str = r#"
    <html><head><title>Open Source Summit</title></head>
    <body>
      <h1>Open Source Summit 2025</h1>
      <p>Join us on June 23, 2025 from 9:00 AM to 5:30 PM for a day of talks.</p>
      <p>Venue: 500 Harbor Drive, San Diego, CA 92101</p>
      <a href="/schedule">Schedule</a>
    </body></html>
    "#;

    struct StaticFetcher(&'static str);

    impl PageFetcher for StaticFetcher {
        fn name(&self) -> &'static str {
            "http"
        }

        fn fetch(&self, url: &str) -> Result<String> {
            if url.ends_with("/schedule") {
                return Ok("<html><body><p>9:00 AM Keynote</p></body></html>".to_string());
            }
            Ok(self.0.to_string())
        }
    }

    struct DownFetcher;

    impl PageFetcher for DownFetcher {
        fn name(&self) -> &'static str {
            "http"
        }

        fn fetch(&self, _url: &str) -> Result<String> {
            Err(anyhow!("connection refused"))
        }
    }

    fn agent(fetcher: Box<dyn PageFetcher>) -> EventAgent {
        EventAgent::with_parts(vec![fetcher], None, None, &Settings::default())
    }

    #[test]
    fn runs_offline_with_fallbacks() {
        let report = agent(Box::new(StaticFetcher(EVENT_HTML)))
            .process_event("summit.example.com/2025", 4, 2000)
            .expect("pipeline runs");

        assert_eq!(report.url, "https://summit.example.com/2025");
        assert_eq!(report.event.source, ExtractionSource::Heuristic);
        assert_eq!(report.event.title.as_deref(), Some("Open Source Summit 2025"));
        assert_eq!(report.event.date.as_deref(), Some("2025-06-23"));
        assert_eq!(
            report.event.agenda_content.as_deref(),
            Some("9:00 AM Keynote")
        );
        assert!(report.restaurants.is_empty());
        assert!(report.drafts.is_empty());

        let stages: Vec<(&str, StageStatus)> =
            report.notes.iter().map(|n| (n.stage, n.status)).collect();
        assert_eq!(
            stages,
            vec![
                ("fetch", StageStatus::Done),
                ("explore", StageStatus::Done),
                ("extract", StageStatus::Skipped),
                ("search", StageStatus::Skipped),
                ("draft", StageStatus::Skipped),
            ]
        );
    }

    #[test]
    fn fetch_failure_stops_the_run() {
        let err = agent(Box::new(DownFetcher))
            .process_event("https://summit.example.com", 4, 2000)
            .expect_err("fetch fails");
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn drafts_use_template_and_known_recipients() {
        let restaurants: Vec<Restaurant> = (0..7)
            .map(|i| Restaurant {
                name: format!("Place {i}"),
                email: (i % 2 == 0).then(|| format!("book@place{i}.example")),
                ..Restaurant::default()
            })
            .collect();
        let event = EventInfo {
            title: Some("Open Source Summit".to_string()),
            ..EventInfo::default()
        };

        let (drafts, draft_note) =
            agent(Box::new(DownFetcher)).draft_emails(&event, &restaurants, 3);
        assert_eq!(drafts.len(), 5);
        assert_eq!(draft_note.status, StageStatus::Degraded);
        assert_eq!(drafts[0].subject, "Table Reservation Request for 3 - TBD");
        assert!(drafts[1].body.starts_with("Dear Place 1 Team,"));
        assert_eq!(drafts[0].recipient.as_deref(), Some("book@place0.example"));
        assert_eq!(drafts[1].recipient, None);
        assert_eq!(drafts[4].restaurant_index, 4);
    }

    #[test]
    fn enrichment_counts_found_addresses() {
        let mut restaurants = vec![
            Restaurant { name: "A".to_string(), ..Restaurant::default() },
            Restaurant { name: "B".to_string(), ..Restaurant::default() },
        ];
        let found = enrich_contacts(&mut restaurants, |r| {
            (r.name == "A").then(|| ("info@a.example".to_string(), EmailSource::Guessed))
        });
        assert_eq!(found, 1);
        assert_eq!(restaurants[0].email_source, Some(EmailSource::Guessed));
        assert!(restaurants[1].email.is_none());
    }
}
