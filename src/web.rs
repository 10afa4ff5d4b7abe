use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::config::{BrowserMode, ConfigStore, Settings};
use crate::llm;
use crate::mailer::{self, SenderConfig, SmtpMailer};
use crate::models::{DraftEmail, SendOutcome};
use crate::pipeline::EventAgent;
use crate::scraping::base;
use crate::session::{Flash, SessionStore};
use crate::views::{self, Capabilities, IndexForm, PARTY_SIZE_RANGE, RADIUS_CHOICES};

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^https?://(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+[A-Z]{2,6}\.?|localhost|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?::\d+)?(?:/?|[/?]\S+)$",
    )
    .expect("url regex")
});

pub struct AppState {
    pub settings: Settings,
    pub sessions: SessionStore,
    pub config: ConfigStore,
    pub llm: Option<llm::LlmTarget>,
}

impl AppState {
    pub fn new(settings: Settings, config: ConfigStore) -> Self {
        let sessions = SessionStore::new(settings.session_ttl_minutes);
        Self {
            settings,
            sessions,
            config,
            llm: llm::LlmTarget::from_env(),
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            ai: self.llm.clone(),
            maps: self.settings.maps_api_key.is_some(),
            browser: cfg!(feature = "browser") && self.settings.browser == BrowserMode::Auto,
            sender_email: self.config.read().sender_email,
        }
    }
}

type SharedState = Arc<AppState>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/process", post(process))
        .route("/health", get(health))
        .route("/sessions/:id", get(show_session))
        .route("/sessions/:id/sender", post(save_sender))
        .route("/sessions/:id/sender/test", post(test_sender))
        .route("/sessions/:id/drafts/:n", post(update_draft))
        .route("/sessions/:id/drafts/:n/send", post(send_one))
        .route("/sessions/:id/send-all", post(send_all))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub fn validate_url(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }
    let normalized = base::normalize_url(trimmed);
    URL_RE.is_match(&normalized).then_some(normalized)
}

fn session_url(id: &str) -> String {
    format!("/sessions/{id}")
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html(views::not_found_page())).into_response()
}

async fn index(State(state): State<SharedState>) -> Html<String> {
    Html(views::index_page(
        &IndexForm::default(),
        None,
        &state.capabilities(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ProcessForm {
    url: String,
    #[serde(default)]
    party_size: Option<String>,
    #[serde(default)]
    radius_m: Option<String>,
}

fn clamp_party_size(raw: Option<&str>) -> u32 {
    raw.and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(views::DEFAULT_PARTY_SIZE)
        .clamp(PARTY_SIZE_RANGE.0, PARTY_SIZE_RANGE.1)
}

fn clamp_radius(raw: Option<&str>) -> u32 {
    let wanted = raw
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(views::DEFAULT_RADIUS_M);
    RADIUS_CHOICES
        .iter()
        .copied()
        .min_by_key(|choice| choice.abs_diff(wanted))
        .unwrap_or(views::DEFAULT_RADIUS_M)
}

async fn process(State(state): State<SharedState>, Form(form): Form<ProcessForm>) -> Response {
    let party_size = clamp_party_size(form.party_size.as_deref());
    let radius_m = clamp_radius(form.radius_m.as_deref());
    let echo = IndexForm {
        url: form.url.clone(),
        party_size,
        radius_m,
    };

    let Some(url) = validate_url(&form.url) else {
        let page = views::index_page(
            &echo,
            Some("Please enter a valid URL starting with http:// or https://"),
            &state.capabilities(),
        );
        return (StatusCode::UNPROCESSABLE_ENTITY, Html(page)).into_response();
    };

    tracing::info!(%url, party_size, radius_m, "processing event");
    let settings = state.settings.clone();
    let run_url = url.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        EventAgent::new(&settings).process_event(&run_url, party_size, radius_m)
    })
    .await;

    let report = match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(err)) => {
            tracing::warn!(%url, error = %format!("{err:#}"), "event processing failed");
            let message = format!("Failed to extract event information: {err:#}");
            let page = views::index_page(&echo, Some(&message), &state.capabilities());
            return (StatusCode::BAD_GATEWAY, Html(page)).into_response();
        }
        Err(join_err) => {
            tracing::error!(error = %join_err, "pipeline task panicked");
            let page = views::index_page(
                &echo,
                Some("An internal error occurred while processing the event."),
                &state.capabilities(),
            );
            return (StatusCode::INTERNAL_SERVER_ERROR, Html(page)).into_response();
        }
    };

    let saved = state.config.read();
    let id = state.sessions.create(report, party_size, radius_m);
    state.sessions.update(&id, |session| {
        session.sender_email = saved.sender_email;
        session.provider = saved.email_provider;
        session.flash = Some(Flash::Info(
            "Event processing completed successfully!".to_string(),
        ));
    });
    Redirect::to(&session_url(&id)).into_response()
}

async fn show_session(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let flash = state.sessions.take_flash(&id);
    match state.sessions.get(&id) {
        Some(session) => Html(views::session_page(&session, flash.as_ref())).into_response(),
        None => not_found(),
    }
}

#[derive(Debug, Deserialize)]
pub struct SenderForm {
    #[serde(default)]
    sender_email: String,
    #[serde(default)]
    provider: String,
    #[serde(default)]
    password: String,
}

fn remember_sender(state: &AppState, id: &str, form: &SenderForm) -> Result<SenderConfig, String> {
    let sanitized = mailer::sanitize_ascii(&form.sender_email);
    let provider = form.provider.parse().ok();
    state.sessions.update(id, |session| {
        session.sender_email = Some(sanitized.clone()).filter(|s| !s.is_empty());
        session.provider = provider;
    });

    let sender = SenderConfig::new(&form.sender_email, &form.password, &form.provider)
        .map_err(|err| err.to_string())?;
    state.sessions.update(id, |session| session.sender = Some(sender.clone()));

    let persisted = state.config.update(|config| {
        config.sender_email = Some(sender.email.clone());
        config.email_provider = Some(sender.provider);
    });
    if let Err(err) = persisted {
        tracing::warn!(error = %err, "unable to persist sender preferences");
    }
    Ok(sender)
}

async fn save_sender(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Form(form): Form<SenderForm>,
) -> Response {
    if state.sessions.get(&id).is_none() {
        return not_found();
    }
    let flash = match remember_sender(&state, &id, &form) {
        Ok(sender) => Flash::Info(format!("Sender saved: {} via {}", sender.email, sender.provider.label())),
        Err(message) => Flash::Error(message),
    };
    state.sessions.update(&id, |session| session.flash = Some(flash));
    Redirect::to(&session_url(&id)).into_response()
}

async fn test_sender(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Form(form): Form<SenderForm>,
) -> Response {
    if state.sessions.get(&id).is_none() {
        return not_found();
    }
    let flash = match remember_sender(&state, &id, &form) {
        Ok(sender) => {
            let result = tokio::task::spawn_blocking(move || {
                let transport = SmtpMailer::connect(&sender)?;
                mailer::validate_config(&transport)
            })
            .await;
            match result {
                Ok(Ok(message)) => Flash::Info(message),
                Ok(Err(err)) => Flash::Error(err.to_string()),
                Err(join_err) => Flash::Error(format!("configuration test failed: {join_err}")),
            }
        }
        Err(message) => Flash::Error(message),
    };
    state.sessions.update(&id, |session| session.flash = Some(flash));
    Redirect::to(&session_url(&id)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct DraftForm {
    #[serde(default)]
    recipient: String,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
}

fn apply_draft_edit(state: &AppState, id: &str, n: usize, form: &DraftForm) -> Option<()> {
    state
        .sessions
        .update(id, |session| {
            let report = &mut session.report;
            let draft = report.drafts.get_mut(n)?;
            let recipient = mailer::sanitize_ascii(&form.recipient);
            let recipient = (!recipient.is_empty()).then_some(recipient);
            let enriched = report
                .restaurants
                .get(draft.restaurant_index)
                .and_then(|r| r.email.clone());
            draft.recipient_edited = recipient.is_some() && recipient != enriched;
            draft.recipient = recipient;
            if !form.subject.trim().is_empty() {
                draft.subject = mailer::sanitize_input(&form.subject);
            }
            draft.body = form.body.replace("\r\n", "\n");
            Some(())
        })
        .flatten()
}

async fn update_draft(
    State(state): State<SharedState>,
    Path((id, n)): Path<(String, usize)>,
    Form(form): Form<DraftForm>,
) -> Response {
    if apply_draft_edit(&state, &id, n, &form).is_none() {
        return not_found();
    }
    state.sessions.update(&id, |session| {
        session.flash = Some(Flash::Info(format!("Draft {} saved.", n + 1)));
    });
    Redirect::to(&session_url(&id)).into_response()
}

async fn send_one(
    State(state): State<SharedState>,
    Path((id, n)): Path<(String, usize)>,
    Form(form): Form<DraftForm>,
) -> Response {
    if apply_draft_edit(&state, &id, n, &form).is_none() {
        return not_found();
    }
    let Some(session) = state.sessions.get(&id) else {
        return not_found();
    };
    let Some(sender) = session.sender.clone() else {
        state.sessions.update(&id, |session| {
            session.flash = Some(Flash::Error(
                "Please configure your sender email and password first.".to_string(),
            ));
        });
        return Redirect::to(&session_url(&id)).into_response();
    };

    let draft = session.report.drafts[n].clone();
    let restaurant = session
        .report
        .restaurants
        .get(draft.restaurant_index)
        .map(|r| r.display_name().to_string())
        .unwrap_or_else(|| format!("Restaurant {}", n + 1));

    let result = tokio::task::spawn_blocking(move || match SmtpMailer::connect(&sender) {
        Ok(transport) => mailer::send_draft(&transport, &sender, &draft, restaurant),
        Err(err) => SendOutcome {
            restaurant,
            recipient: draft.recipient.clone(),
            success: false,
            message: err.to_string(),
        },
    })
    .await;

    record_outcomes(&state, &id, result.map(|outcome| vec![outcome]));
    Redirect::to(&session_url(&id)).into_response()
}

async fn send_all(State(state): State<SharedState>, Path(id): Path<String>) -> Response {
    let Some(session) = state.sessions.get(&id) else {
        return not_found();
    };
    let Some(sender) = session.sender.clone() else {
        state.sessions.update(&id, |session| {
            session.flash = Some(Flash::Error(
                "Please configure your sender email and password first.".to_string(),
            ));
        });
        return Redirect::to(&session_url(&id)).into_response();
    };

    let drafts: Vec<DraftEmail> = session
        .report
        .drafts
        .iter()
        .filter(|draft| draft.has_recipient())
        .cloned()
        .collect();
    if drafts.is_empty() {
        state.sessions.update(&id, |session| {
            session.flash = Some(Flash::Error(
                "No drafts have a recipient address yet.".to_string(),
            ));
        });
        return Redirect::to(&session_url(&id)).into_response();
    }
    let restaurants = session.report.restaurants.clone();
    tracing::info!(session = %id, drafts = drafts.len(), "sending booking emails");
    let result = tokio::task::spawn_blocking(move || match SmtpMailer::connect(&sender) {
        Ok(transport) => mailer::send_batch(&transport, &sender, &drafts, &restaurants),
        Err(err) => {
            let message = err.to_string();
            drafts
                .iter()
                .map(|draft| SendOutcome {
                    restaurant: restaurants
                        .get(draft.restaurant_index)
                        .map(|r| r.display_name().to_string())
                        .unwrap_or_default(),
                    recipient: draft.recipient.clone(),
                    success: false,
                    message: message.clone(),
                })
                .collect()
        }
    })
    .await;

    record_outcomes(&state, &id, result);
    Redirect::to(&session_url(&id)).into_response()
}

fn record_outcomes(
    state: &AppState,
    id: &str,
    result: Result<Vec<SendOutcome>, tokio::task::JoinError>,
) {
    let flash = match result {
        Ok(outcomes) => {
            let sent = outcomes.iter().filter(|o| o.success).count();
            let total = outcomes.len();
            let flash = match outcomes.as_slice() {
                [single] if single.success => Flash::Info(single.message.clone()),
                [single] => Flash::Error(single.message.clone()),
                _ if sent == total => Flash::Info(format!("All {total} emails sent successfully!")),
                _ => Flash::Error(format!("{sent} out of {total} emails sent successfully.")),
            };
            state.sessions.update(id, |session| session.outcomes.extend(outcomes));
            flash
        }
        Err(join_err) => {
            tracing::error!(error = %join_err, "send task panicked");
            Flash::Error("An internal error occurred while sending.".to_string())
        }
    };
    state.sessions.update(id, |session| session.flash = Some(flash));
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    ai: bool,
    ai_model: Option<String>,
    ai_endpoint: Option<String>,
    maps: bool,
    browser: bool,
    sessions: usize,
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let caps = state.capabilities();
    Json(HealthResponse {
        status: "ok",
        ai: caps.ai.is_some(),
        ai_model: caps.ai.as_ref().map(|t| t.model.clone()),
        ai_endpoint: caps.ai.map(|t| t.endpoint),
        maps: caps.maps,
        browser: caps.browser,
        sessions: state.sessions.len(),
    })
}
