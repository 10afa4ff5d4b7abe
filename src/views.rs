use std::fmt::Write as _;

use crate::llm::LlmTarget;
use crate::mailer::EmailProvider;
use crate::models::{EmailSource, EventInfo, Restaurant, StageStatus};
use crate::session::{Flash, Session};
use crate::utils::escape_html as esc;

pub const PARTY_SIZE_RANGE: (u32, u32) = (1, 20);
pub const DEFAULT_PARTY_SIZE: u32 = 4;
pub const RADIUS_CHOICES: [u32; 10] = [500, 1000, 1500, 2000, 2500, 3000, 3500, 4000, 4500, 5000];
pub const DEFAULT_RADIUS_M: u32 = 2000;

#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub ai: Option<LlmTarget>,
    pub maps: bool,
    pub browser: bool,
    pub sender_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IndexForm {
    pub url: String,
    pub party_size: u32,
    pub radius_m: u32,
}

impl Default for IndexForm {
    fn default() -> Self {
        Self {
            url: String::new(),
            party_size: DEFAULT_PARTY_SIZE,
            radius_m: DEFAULT_RADIUS_M,
        }
    }
}

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0; color: #1f2933; background: #f7f8fa; }
header { background: #1f77b4; color: #fff; padding: 1rem 2rem; }
header a { color: #fff; text-decoration: none; }
main { max-width: 1100px; margin: 0 auto; padding: 1rem 2rem 3rem; }
section { background: #fff; border-radius: 8px; padding: 1rem 1.5rem; margin: 1rem 0; box-shadow: 0 1px 2px rgba(0,0,0,.08); }
h2 { color: #ff7f0e; margin-top: 0; }
table { border-collapse: collapse; width: 100%; font-size: .9rem; }
th, td { text-align: left; padding: .4rem .5rem; border-bottom: 1px solid #e4e7eb; vertical-align: top; }
label { display: block; margin: .5rem 0 .2rem; font-weight: 600; }
input[type=text], input[type=email], input[type=password], input[type=url], select, textarea { width: 100%; padding: .4rem; box-sizing: border-box; }
textarea { min-height: 16rem; font-family: ui-monospace, monospace; }
button { margin-top: .6rem; padding: .4rem 1rem; }
.flash-info, .ok { color: #155724; background: #d4edda; padding: .6rem 1rem; border-radius: 6px; }
.flash-error, .fail { color: #721c24; background: #f8d7da; padding: .6rem 1rem; border-radius: 6px; }
.warn { color: #856404; background: #fff3cd; padding: .6rem 1rem; border-radius: 6px; }
.metrics { display: flex; gap: 2rem; }
.metric b { display: block; font-size: 1.6rem; }
.cols { display: grid; grid-template-columns: 1fr 1fr; gap: 1.5rem; }
details { margin: .8rem 0; }
.muted { color: #7b8794; font-size: .85rem; }
"#;

pub fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>{STYLE}</style>
</head>
<body>
<header><a href="/"><strong>Event Agent</strong></a> &middot; event page to restaurant booking emails</header>
<main>
{body}
</main>
</body>
</html>"#,
        title = esc(title),
    )
}

fn yes_no(flag: bool, yes: &str, no: &str) -> String {
    if flag {
        format!(r#"<span class="ok">{}</span>"#, esc(yes))
    } else {
        format!(r#"<span class="warn">{}</span>"#, esc(no))
    }
}

pub fn index_page(form: &IndexForm, warning: Option<&str>, caps: &Capabilities) -> String {
    let mut body = String::new();

    if let Some(message) = warning {
        let _ = write!(body, r#"<p class="warn">{}</p>"#, esc(message));
    }

    let radius_options: String = RADIUS_CHOICES
        .iter()
        .map(|meters| {
            let selected = if *meters == form.radius_m { " selected" } else { "" };
            format!(
                r#"<option value="{meters}"{selected}>{:.1} km</option>"#,
                *meters as f64 / 1000.0
            )
        })
        .collect();

    let _ = write!(
        body,
        r#"<section>
<h2>Event URL</h2>
<form method="post" action="/process">
<label for="url">Event page</label>
<input type="text" id="url" name="url" placeholder="https://example.com/event-page" value="{url}" required>
<div class="cols">
<div>
<label for="party_size">Party size</label>
<input type="number" id="party_size" name="party_size" min="{min}" max="{max}" value="{party}">
</div>
<div>
<label for="radius_m">Restaurant search radius</label>
<select id="radius_m" name="radius_m">{radius_options}</select>
</div>
</div>
<button type="submit">Process event</button>
<p class="muted">Scraping, extraction, restaurant search and drafting can take a minute.</p>
</form>
</section>"#,
        url = esc(&form.url),
        min = PARTY_SIZE_RANGE.0,
        max = PARTY_SIZE_RANGE.1,
        party = form.party_size,
    );

    let sender = match caps.sender_email.as_deref() {
        Some(email) => format!(r#"<span class="ok">{}</span>"#, esc(email)),
        None => r#"<span class="warn">configure it on the results page</span>"#.to_string(),
    };
    let _ = write!(
        body,
        r#"<section>
<h2>Status</h2>
<table>
<tr><th>AI extraction and drafting</th><td>{ai}</td></tr>
<tr><th>Restaurant search</th><td>{maps}</td></tr>
<tr><th>Headless browser</th><td>{browser}</td></tr>
<tr><th>Sender email</th><td>{sender}</td></tr>
</table>
<p class="muted">Only use publicly available event pages.</p>
</section>"#,
        ai = match &caps.ai {
            Some(target) => format!(
                r#"<span class="ok">{}</span> <span class="muted">(reachability is checked on each run)</span>"#,
                esc(&target.to_string())
            ),
            None => yes_no(false, "", "disabled, basic extraction and template emails"),
        },
        maps = yes_no(caps.maps, "enabled", "GOOGLE_MAPS_API_KEY is not set"),
        browser = yes_no(caps.browser, "enabled", "off, plain HTTP only"),
    );

    layout("Event Agent", &body)
}

pub fn not_found_page() -> String {
    layout(
        "Session not found",
        r#"<section><h2>Session not found</h2><p>This session expired or never existed. <a href="/">Process an event</a> to start again.</p></section>"#,
    )
}

pub fn session_page(session: &Session, flash: Option<&Flash>) -> String {
    let report = &session.report;
    let mut body = String::new();

    match flash {
        Some(Flash::Info(message)) => {
            let _ = write!(body, r#"<p class="flash-info">{}</p>"#, esc(message));
        }
        Some(Flash::Error(message)) => {
            let _ = write!(body, r#"<p class="flash-error">{}</p>"#, esc(message));
        }
        None => {}
    }

    let _ = write!(
        body,
        r#"<section>
<h2>Summary</h2>
<p class="muted">Source: <a href="{url}" rel="noreferrer">{url}</a> &middot; party of {party} &middot; {radius:.1} km radius</p>
<div class="metrics">
<div class="metric">Event found<b>{found}</b></div>
<div class="metric">Restaurants found<b>{restaurants}</b></div>
<div class="metric">Emails drafted<b>{drafts}</b></div>
</div>
{notes}
</section>"#,
        url = esc(&report.url),
        party = session.party_size,
        radius = session.radius_m as f64 / 1000.0,
        found = if report.event.has_title() { "&#10004;" } else { "&#10008;" },
        restaurants = report.restaurants.len(),
        drafts = report.drafts.len(),
        notes = stage_log(session),
    );

    body.push_str(&event_section(&report.event));
    body.push_str(&restaurants_section(&report.restaurants));
    body.push_str(&sender_section(session));
    body.push_str(&drafts_section(session));
    body.push_str(&results_section(session));

    layout(&report.event.title_or("Event results"), &body)
}

fn stage_log(session: &Session) -> String {
    let rows: String = session
        .report
        .notes
        .iter()
        .map(|note| {
            let (class, label) = match note.status {
                StageStatus::Done => ("ok", "done"),
                StageStatus::Degraded => ("warn", "fallback"),
                StageStatus::Skipped => ("muted", "skipped"),
                StageStatus::Failed => ("fail", "failed"),
            };
            format!(
                r#"<tr><td>{}</td><td><span class="{class}">{label}</span></td><td>{}</td></tr>"#,
                esc(note.stage),
                esc(&note.detail)
            )
        })
        .collect();
    format!(r#"<details><summary>Pipeline log</summary><table>{rows}</table></details>"#)
}

fn row(label: &str, value: Option<&str>) -> String {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(value) => format!("<tr><th>{}</th><td>{}</td></tr>", esc(label), esc(value)),
        None => String::new(),
    }
}

fn event_section(event: &EventInfo) -> String {
    let time = if event.start_time.is_some() || event.end_time.is_some() {
        Some(format!("{} - {}", event.start_or_tbd(), event.end_or_tbd()))
    } else {
        None
    };

    let details = [
        row("Title", event.title.as_deref()),
        row("Date", event.date.as_deref()),
        row("Time", time.as_deref()),
        row("Type", event.event_type.as_deref()),
        row("Contact", event.contact_email.as_deref()),
        row("Phone", event.contact_phone.as_deref()),
    ]
    .concat();
    let location = [
        row("Venue", event.venue_name.as_deref()),
        row("Address", event.address.as_deref()),
        row("City", event.city.as_deref()),
        row("State", event.state.as_deref()),
        row("Building", event.building.as_deref()),
        row("Landmarks", event.landmarks.as_deref()),
        row("Parking", event.parking_info.as_deref()),
        row("Transit", event.transportation.as_deref()),
        row("Full location", event.full_location.as_deref()),
    ]
    .concat();

    let mut html = format!(
        r#"<section>
<h2>Event information</h2>
<div class="cols">
<div><h3>Event details</h3><table>{details}</table></div>
<div><h3>Location details</h3><table>{location}</table></div>
</div>"#
    );

    if !event.agenda.is_empty() {
        let items: String = event
            .agenda
            .iter()
            .map(|item| format!("<li>{}</li>", esc(item)))
            .collect();
        let _ = write!(html, "<h3>Agenda</h3><ol>{items}</ol>");
    }
    if !event.speakers.is_empty() {
        let _ = write!(html, "<h3>Speakers</h3><p>{}</p>", esc(&event.speakers.join(", ")));
    }
    if let Some(description) = event.description.as_deref() {
        let _ = write!(html, "<h3>Description</h3><p>{}</p>", esc(description));
    }
    if let Some(raw) = event.ai_response.as_deref() {
        let _ = write!(
            html,
            "<details><summary>Unparsed AI answer</summary><pre>{}</pre></details>",
            esc(raw)
        );
    }
    html.push_str("</section>");
    html
}

fn email_marker(restaurant: &Restaurant) -> String {
    match (&restaurant.email, restaurant.email_source) {
        (Some(email), Some(EmailSource::Guessed)) => {
            format!(r#"{} <span class="muted">(guessed)</span>"#, esc(email))
        }
        (Some(email), _) => esc(email),
        (None, _) if restaurant.website.is_some() => "website only".to_string(),
        (None, _) => "&mdash;".to_string(),
    }
}

fn restaurants_section(restaurants: &[Restaurant]) -> String {
    if restaurants.is_empty() {
        return r#"<section><h2>Nearby restaurants</h2><p class="warn">No restaurants found in the area.</p></section>"#.to_string();
    }

    let rows: String = restaurants
        .iter()
        .map(|r| {
            let name = match r.maps_url.as_deref() {
                Some(url) => format!(r#"<a href="{}" rel="noreferrer">{}</a>"#, esc(url), esc(r.display_name())),
                None => esc(r.display_name()),
            };
            let website = match r.website.as_deref() {
                Some(url) => format!(r#"<a href="{0}" rel="noreferrer">{0}</a>"#, esc(url)),
                None => "&mdash;".to_string(),
            };
            format!(
                "<tr><td>{name}</td><td>{rating}</td><td>{price}</td><td>{address}</td><td>{phone}</td><td>{email}</td><td>{website}</td></tr>",
                rating = r.rating.map(|v| format!("{v:.1}")).unwrap_or_else(|| "N/A".to_string()),
                price = "$".repeat(r.price_level.unwrap_or(1).max(1) as usize),
                address = esc(r.best_address().unwrap_or("N/A")),
                phone = esc(r.phone.as_deref().unwrap_or("N/A")),
                email = email_marker(r),
            )
        })
        .collect();

    let with_email = restaurants.iter().filter(|r| r.email.is_some()).count();
    let summary = if with_email > 0 {
        format!(
            r#"<p class="ok">Found {with_email} restaurant(s) with email addresses; they are pre-filled in the drafts below.</p>"#
        )
    } else {
        r#"<p class="warn">No restaurant emails found automatically. Enter them in the drafts below.</p>"#.to_string()
    };

    format!(
        r#"<section>
<h2>Nearby restaurants</h2>
<table>
<tr><th>Name</th><th>Rating</th><th>Price</th><th>Address</th><th>Phone</th><th>Email</th><th>Website</th></tr>
{rows}
</table>
{summary}
</section>"#
    )
}

fn sender_section(session: &Session) -> String {
    let current = session.provider.unwrap_or(EmailProvider::Gmail);
    let options: String = EmailProvider::all()
        .iter()
        .map(|provider| {
            let selected = if *provider == current { " selected" } else { "" };
            format!(
                r#"<option value="{}"{selected}>{}</option>"#,
                provider.key(),
                esc(provider.label())
            )
        })
        .collect();
    let status = if session.sender.is_some() {
        r#"<p class="ok">Sender ready. The password is kept in memory for this session only.</p>"#
    } else {
        r#"<p class="muted">For Gmail, enable 2FA and use an App Password, not your regular password.</p>"#
    };

    format!(
        r#"<section>
<h2>Email configuration</h2>
<form method="post" action="/sessions/{id}/sender">
<div class="cols">
<div>
<label for="sender_email">Your email</label>
<input type="email" id="sender_email" name="sender_email" value="{email}" placeholder="you@example.com">
</div>
<div>
<label for="provider">Provider</label>
<select id="provider" name="provider">{options}</select>
</div>
</div>
<label for="password">Password or app password</label>
<input type="password" id="password" name="password" autocomplete="off">
<button type="submit">Save sender</button>
<button type="submit" formaction="/sessions/{id}/sender/test">Test email configuration</button>
</form>
{status}
</section>"#,
        id = esc(&session.id),
        email = esc(session.sender_email.as_deref().unwrap_or_default()),
    )
}

fn drafts_section(session: &Session) -> String {
    let report = &session.report;
    if report.drafts.is_empty() {
        return r#"<section><h2>Draft booking emails</h2><p class="warn">No draft emails generated.</p></section>"#.to_string();
    }

    let mut html = String::from("<section><h2>Draft booking emails</h2>");
    let mut ready: Vec<String> = Vec::new();
    let mut missing: Vec<String> = Vec::new();

    for (n, draft) in report.drafts.iter().enumerate() {
        let name = report
            .restaurants
            .get(draft.restaurant_index)
            .map(|r| r.display_name().to_string())
            .unwrap_or_else(|| format!("Restaurant {}", n + 1));
        let recipient = draft.recipient.as_deref().unwrap_or_default();
        match draft.recipient.as_deref().filter(|_| draft.has_recipient()) {
            Some(email) => {
                let marker = if draft.recipient_edited { "entered" } else { "found" };
                ready.push(format!("<li>{} &rarr; {} <span class=\"muted\">({marker})</span></li>", esc(&name), esc(email)));
            }
            None => missing.push(format!("<li>{}</li>", esc(&name))),
        }

        let _ = write!(
            html,
            r#"<details{open}>
<summary>Email for {name}</summary>
<form method="post" action="/sessions/{id}/drafts/{n}">
<label for="recipient-{n}">Restaurant email</label>
<input type="email" id="recipient-{n}" name="recipient" value="{recipient}" placeholder="reservations@restaurant.com">
<label for="subject-{n}">Subject</label>
<input type="text" id="subject-{n}" name="subject" value="{subject}">
<label for="body-{n}">Body</label>
<textarea id="body-{n}" name="body">{body}</textarea>
<button type="submit">Save changes</button>
<button type="submit" formaction="/sessions/{id}/drafts/{n}/send">Send this email</button>
</form>
</details>"#,
            open = if n == 0 { " open" } else { "" },
            name = esc(&name),
            id = esc(&session.id),
            recipient = esc(recipient),
            subject = esc(&draft.subject),
            body = esc(&draft.body),
        );
    }

    html.push_str("<h3>Bulk sending</h3><div class=\"cols\">");
    let _ = write!(
        html,
        "<div><strong>Ready to send</strong><ul>{}</ul></div><div><strong>Need email addresses</strong><ul>{}</ul></div></div>",
        ready.concat(),
        missing.concat()
    );
    if ready.is_empty() {
        html.push_str(r#"<p class="muted">Enter restaurant email addresses above to enable bulk sending.</p>"#);
    } else {
        let _ = write!(
            html,
            r#"<form method="post" action="/sessions/{id}/send-all"><button type="submit">Send {count} email(s)</button></form>"#,
            id = esc(&session.id),
            count = ready.len(),
        );
    }
    html.push_str("</section>");
    html
}

fn results_section(session: &Session) -> String {
    if session.outcomes.is_empty() {
        return String::new();
    }
    let sent = session.outcomes.iter().filter(|o| o.success).count();
    let total = session.outcomes.len();
    let headline = if sent == total {
        format!(r#"<p class="ok">All {total} emails sent successfully.</p>"#)
    } else if sent > 0 {
        format!(r#"<p class="warn">{sent} out of {total} emails sent successfully.</p>"#)
    } else {
        r#"<p class="fail">No emails were sent successfully.</p>"#.to_string()
    };
    let items: String = session
        .outcomes
        .iter()
        .map(|outcome| {
            let class = if outcome.success { "ok" } else { "fail" };
            format!(
                r#"<li><span class="{class}">{}</span> {}</li>"#,
                esc(&outcome.restaurant),
                esc(&outcome.message)
            )
        })
        .collect();
    format!(r#"<section><h2>Email sending results</h2>{headline}<ul>{items}</ul></section>"#)
}
