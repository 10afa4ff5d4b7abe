use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;

use crate::models::{present, EventInfo, Restaurant};

const PLACES_BASE: &str = "https://maps.googleapis.com/maps/api";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);
const DETAIL_FIELDS: &str = "formatted_phone_number,website,opening_hours,formatted_address,url";

const MAX_CACHED_DETAILS: usize = 500;

static DETAILS_CACHE: Lazy<Mutex<HashMap<String, PlaceDetails>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, thiserror::Error)]
pub enum PlacesError {
    #[error("GOOGLE_MAPS_API_KEY is not configured")]
    MissingKey,
    #[error("http error: {0}")]
    Http(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("places API returned {status}: {message}")]
    Status { status: String, message: String },
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<PlaceDoc>,
}

#[derive(Debug, Deserialize)]
struct PlaceDoc {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    vicinity: Option<String>,
    #[serde(default)]
    formatted_address: Option<String>,
    #[serde(default)]
    place_id: Option<String>,
    #[serde(default)]
    geometry: Option<Geometry>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    price_level: Option<u8>,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    results: Vec<GeocodeDoc>,
}

#[derive(Debug, Deserialize)]
struct GeocodeDoc {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    result: Option<PlaceDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaceDetails {
    #[serde(default)]
    pub formatted_phone_number: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub formatted_address: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub opening_hours: Option<OpeningHours>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpeningHours {
    #[serde(default)]
    pub weekday_text: Vec<String>,
}

#[derive(Debug, Default)]
pub struct SearchResult {
    pub location: Option<String>,
    pub method: Option<&'static str>,
    pub restaurants: Vec<Restaurant>,
}

pub struct PlacesClient {
    api_key: String,
    client: Client,
}

impl PlacesClient {
    pub fn new(api_key: Option<String>) -> Result<Self, PlacesError> {
        let api_key = api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or(PlacesError::MissingKey)?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| PlacesError::Http(err.to_string()))?;
        Ok(Self { api_key, client })
    }

    /// Text search first, geocode + nearby search second. Details are merged
    /// into each kept result; a failed details call leaves the record as is.
    pub fn search_restaurants(
        &self,
        event: &EventInfo,
        radius_m: u32,
        limit: usize,
    ) -> Result<SearchResult, PlacesError> {
        let Some(location) = pick_location(event) else {
            tracing::warn!("no usable location in event data");
            return Ok(SearchResult::default());
        };
        tracing::info!(%location, radius_m, "searching restaurants");

        let (method, mut restaurants) = match self.text_search(&location) {
            Ok(found) if !found.is_empty() => ("text search", found),
            Ok(_) => ("nearby search", self.geocoded_nearby(&location, radius_m)?),
            Err(err) => {
                tracing::warn!(error = %err, "text search failed, trying geocode");
                ("nearby search", self.geocoded_nearby(&location, radius_m)?)
            }
        };
        restaurants.truncate(limit);

        for restaurant in restaurants.iter_mut() {
            let Some(place_id) = restaurant.place_id.clone() else {
                continue;
            };
            match self.details(&place_id) {
                Ok(details) => apply_details(restaurant, &details),
                Err(err) => {
                    tracing::debug!(%place_id, error = %err, "place details skipped");
                }
            }
        }

        tracing::info!(count = restaurants.len(), method, "restaurants found");
        Ok(SearchResult {
            location: Some(location),
            method: Some(method),
            restaurants,
        })
    }

    fn geocoded_nearby(&self, location: &str, radius_m: u32) -> Result<Vec<Restaurant>, PlacesError> {
        match self.geocode(location)? {
            Some(point) => {
                tracing::debug!(lat = point.lat, lng = point.lng, "geocoded event location");
                self.nearby_search(point, radius_m)
            }
            None => Ok(Vec::new()),
        }
    }

    pub fn text_search(&self, location: &str) -> Result<Vec<Restaurant>, PlacesError> {
        let url = self.endpoint(
            "place/textsearch/json",
            &[
                ("query", format!("restaurants near {location}")),
                ("type", "restaurant".to_string()),
                ("language", "en".to_string()),
            ],
        )?;
        parse_search_response(&self.get(url)?)
    }

    pub fn nearby_search(&self, point: LatLng, radius_m: u32) -> Result<Vec<Restaurant>, PlacesError> {
        let url = self.endpoint(
            "place/nearbysearch/json",
            &[
                ("location", format!("{},{}", point.lat, point.lng)),
                ("radius", radius_m.to_string()),
                ("type", "restaurant".to_string()),
                ("language", "en".to_string()),
            ],
        )?;
        parse_search_response(&self.get(url)?)
    }

    pub fn geocode(&self, location: &str) -> Result<Option<LatLng>, PlacesError> {
        let url = self.endpoint("geocode/json", &[("address", location.to_string())])?;
        parse_geocode_response(&self.get(url)?)
    }

    pub fn details(&self, place_id: &str) -> Result<PlaceDetails, PlacesError> {
        if let Some(cached) = DETAILS_CACHE
            .lock()
            .map_err(|_| PlacesError::Http("details cache poisoned".to_string()))?
            .get(place_id)
            .cloned()
        {
            return Ok(cached);
        }

        let url = self.endpoint(
            "place/details/json",
            &[
                ("place_id", place_id.to_string()),
                ("fields", DETAIL_FIELDS.to_string()),
            ],
        )?;
        let details = parse_details_response(&self.get(url)?)?;

        if let Ok(mut cache) = DETAILS_CACHE.lock() {
            cache_details(&mut cache, place_id, details.clone());
        }
        Ok(details)
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, PlacesError> {
        let mut url = Url::parse(&format!("{PLACES_BASE}/{path}"))
            .map_err(|err| PlacesError::Http(err.to_string()))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("key", &self.api_key);
        }
        Ok(url)
    }

    fn get(&self, url: Url) -> Result<String, PlacesError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| PlacesError::Http(err.without_url().to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| PlacesError::Http(err.without_url().to_string()))?;
        if !status.is_success() {
            return Err(PlacesError::Http(format!("status {}", status)));
        }
        Ok(text)
    }
}

fn check_status(status: &str, message: Option<String>) -> Result<bool, PlacesError> {
    match status {
        "OK" => Ok(true),
        "ZERO_RESULTS" => Ok(false),
        other => Err(PlacesError::Status {
            status: other.to_string(),
            message: message.unwrap_or_else(|| hint_for_status(other).to_string()),
        }),
    }
}

fn hint_for_status(status: &str) -> &'static str {
    match status {
        "REQUEST_DENIED" => "check the API key and that the Places API is enabled with billing",
        "OVER_QUERY_LIMIT" => "quota exceeded",
        "INVALID_REQUEST" => "the location could not be used for a search",
        _ => "unexpected response",
    }
}

fn parse_search_response(text: &str) -> Result<Vec<Restaurant>, PlacesError> {
    let payload: SearchResponse =
        serde_json::from_str(text).map_err(|err| PlacesError::Parse(err.to_string()))?;
    if !check_status(&payload.status, payload.error_message)? {
        return Ok(Vec::new());
    }
    Ok(payload
        .results
        .into_iter()
        .filter_map(restaurant_from_place)
        .collect())
}

fn parse_geocode_response(text: &str) -> Result<Option<LatLng>, PlacesError> {
    let payload: GeocodeResponse =
        serde_json::from_str(text).map_err(|err| PlacesError::Parse(err.to_string()))?;
    if !check_status(&payload.status, payload.error_message)? {
        return Ok(None);
    }
    Ok(payload
        .results
        .into_iter()
        .next()
        .map(|doc| doc.geometry.location))
}

fn parse_details_response(text: &str) -> Result<PlaceDetails, PlacesError> {
    let payload: DetailsResponse =
        serde_json::from_str(text).map_err(|err| PlacesError::Parse(err.to_string()))?;
    check_status(&payload.status, payload.error_message)?;
    Ok(payload.result.unwrap_or_default())
}

fn restaurant_from_place(place: PlaceDoc) -> Option<Restaurant> {
    let name = place.name.filter(|n| !n.trim().is_empty())?;
    let point = place.geometry.map(|g| g.location);
    Some(Restaurant {
        name,
        address: place.vicinity.or(place.formatted_address),
        place_id: place.place_id,
        lat: point.map(|p| p.lat),
        lng: point.map(|p| p.lng),
        rating: place.rating,
        price_level: place.price_level,
        types: place.types,
        ..Restaurant::default()
    })
}

pub fn apply_details(restaurant: &mut Restaurant, details: &PlaceDetails) {
    if details.formatted_phone_number.is_some() {
        restaurant.phone = details.formatted_phone_number.clone();
    }
    if details.website.is_some() {
        restaurant.website = details.website.clone();
    }
    if details.formatted_address.is_some() {
        restaurant.full_address = details.formatted_address.clone();
    }
    if details.url.is_some() {
        restaurant.maps_url = details.url.clone();
    }
    if let Some(hours) = &details.opening_hours {
        restaurant.opening_hours = hours.weekday_text.clone();
    }
}

fn full_address(event: &EventInfo) -> Option<String> {
    let mut parts: Vec<&str> = [&event.address, &event.city, &event.state, &event.zip_code]
        .into_iter()
        .filter_map(present)
        .collect();
    if let Some(country) = present(&event.country) {
        if !country.eq_ignore_ascii_case("usa") {
            parts.push(country);
        }
    }
    (!parts.is_empty()).then(|| parts.join(", "))
}

fn city_state(event: &EventInfo) -> Option<String> {
    match (present(&event.city), present(&event.state)) {
        (Some(city), Some(state)) => Some(format!("{city}, {state}")),
        (Some(city), None) => Some(city.to_string()),
        _ => None,
    }
}

fn venue_location(event: &EventInfo) -> Option<String> {
    let venue = present(&event.venue_name)?;
    let context: Vec<&str> = [&event.city, &event.state]
        .into_iter()
        .filter_map(present)
        .collect();
    if context.is_empty() {
        Some(venue.to_string())
    } else {
        Some(format!("{venue}, {}", context.join(", ")))
    }
}

pub fn location_candidates(event: &EventInfo) -> Vec<Option<String>> {
    let owned = |value: &Option<String>| present(value).map(str::to_string);
    vec![
        owned(&event.full_location),
        full_address(event),
        owned(&event.address),
        venue_location(event),
        owned(&event.venue_name),
        city_state(event),
        owned(&event.city),
        event.addresses.first().cloned(),
        owned(&event.campus),
        owned(&event.building),
    ]
}

pub fn pick_location(event: &EventInfo) -> Option<String> {
    location_candidates(event)
        .into_iter()
        .flatten()
        .map(|candidate| candidate.trim().to_string())
        .find(|candidate| candidate.chars().count() > 3)
}

fn cache_details(cache: &mut HashMap<String, PlaceDetails>, place_id: &str, details: PlaceDetails) {
    if cache.len() >= MAX_CACHED_DETAILS && !cache.contains_key(place_id) {
        if let Some(evicted) = cache.keys().next().cloned() {
            cache.remove(&evicted);
        }
    }
    cache.insert(place_id.to_string(), details);
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_JSON: &str = r#"{
      "html_attributions": [],
      "results": [
        {
          "name": "Zuni Café",
          "formatted_address": "1658 Market St, San Francisco, CA 94102, United States",
          "geometry": { "location": { "lat": 37.7737, "lng": -122.4216 } },
          "place_id": "ChIJ-zuni",
          "rating": 4.5,
          "price_level": 3,
          "types": ["restaurant", "food", "point_of_interest"]
        },
        {
          "name": "Tiny Taqueria",
          "vicinity": "22 Valencia St",
          "formatted_address": "22 Valencia St, San Francisco",
          "place_id": "ChIJ-tiny",
          "types": ["restaurant"]
        },
        { "vicinity": "nameless" }
      ],
      "status": "OK"
    }"#;

    #[test]
    fn maps_search_results_preserving_fields() {
        let restaurants = parse_search_response(SAMPLE_JSON).expect("parse sample");
        assert_eq!(restaurants.len(), 2);

        let zuni = &restaurants[0];
        assert_eq!(zuni.name, "Zuni Café");
        assert_eq!(
            zuni.address.as_deref(),
            Some("1658 Market St, San Francisco, CA 94102, United States")
        );
        assert_eq!(zuni.place_id.as_deref(), Some("ChIJ-zuni"));
        assert_eq!(zuni.lat, Some(37.7737));
        assert_eq!(zuni.lng, Some(-122.4216));
        assert_eq!(zuni.rating, Some(4.5));
        assert_eq!(zuni.price_level, Some(3));
        assert_eq!(zuni.types.len(), 3);

        let tiny = &restaurants[1];
        assert_eq!(tiny.address.as_deref(), Some("22 Valencia St"));
        assert_eq!(tiny.rating, None);
        assert_eq!(tiny.lat, None);
    }

    #[test]
    fn zero_results_is_empty_not_error() {
        let restaurants =
            parse_search_response(r#"{"results": [], "status": "ZERO_RESULTS"}"#).expect("ok");
        assert!(restaurants.is_empty());
    }

    #[test]
    fn denied_status_is_an_error() {
        let err = parse_search_response(
            r#"{"results": [], "status": "REQUEST_DENIED", "error_message": "The provided API key is invalid."}"#,
        )
        .expect_err("denied");
        assert!(err.to_string().contains("REQUEST_DENIED"));
        assert!(err.to_string().contains("API key is invalid"));
    }

    #[test]
    fn geocode_reads_first_location() {
        let point = parse_geocode_response(
            r#"{"status": "OK", "results": [{"geometry": {"location": {"lat": 40.7, "lng": -74.0}}}]}"#,
        )
        .expect("geocode");
        assert_eq!(point, Some(LatLng { lat: 40.7, lng: -74.0 }));
    }

    #[test]
    fn details_fill_contact_fields() {
        let details = parse_details_response(
            r#"{
              "status": "OK",
              "result": {
                "formatted_phone_number": "(415) 552-2522",
                "website": "https://zunicafe.com/",
                "formatted_address": "1658 Market St, San Francisco, CA 94102, USA",
                "url": "https://maps.google.com/?cid=1",
                "opening_hours": { "open_now": true, "weekday_text": ["Monday: Closed", "Tuesday: 11:30 AM - 9:00 PM"] }
              }
            }"#,
        )
        .expect("details");
        let mut restaurant = Restaurant {
            name: "Zuni Café".to_string(),
            address: Some("1658 Market St".to_string()),
            ..Restaurant::default()
        };
        apply_details(&mut restaurant, &details);
        assert_eq!(restaurant.phone.as_deref(), Some("(415) 552-2522"));
        assert_eq!(restaurant.website.as_deref(), Some("https://zunicafe.com/"));
        assert_eq!(restaurant.maps_url.as_deref(), Some("https://maps.google.com/?cid=1"));
        assert_eq!(restaurant.opening_hours.len(), 2);
        assert_eq!(
            restaurant.best_address(),
            Some("1658 Market St, San Francisco, CA 94102, USA")
        );
    }

    #[test]
    fn full_location_wins() {
        let event = EventInfo {
            full_location: Some("Moscone Center, 747 Howard St, San Francisco, CA".to_string()),
            address: Some("747 Howard St".to_string()),
            ..EventInfo::default()
        };
        assert_eq!(
            pick_location(&event).as_deref(),
            Some("Moscone Center, 747 Howard St, San Francisco, CA")
        );
    }

    #[test]
    fn assembles_address_and_skips_usa() {
        let event = EventInfo {
            address: Some("747 Howard St".to_string()),
            city: Some("San Francisco".to_string()),
            state: Some("CA".to_string()),
            zip_code: Some("94103".to_string()),
            country: Some("USA".to_string()),
            ..EventInfo::default()
        };
        assert_eq!(
            pick_location(&event).as_deref(),
            Some("747 Howard St, San Francisco, CA, 94103")
        );
    }

    #[test]
    fn venue_gets_city_context() {
        let event = EventInfo {
            venue_name: Some("Moscone Center".to_string()),
            city: Some("San Francisco".to_string()),
            ..EventInfo::default()
        };
        // the assembled address is just the city here, which still wins
        assert_eq!(pick_location(&event).as_deref(), Some("San Francisco"));
        assert_eq!(
            venue_location(&event).as_deref(),
            Some("Moscone Center, San Francisco")
        );
    }

    #[test]
    fn short_candidates_are_skipped() {
        let event = EventInfo {
            city: Some("NY".to_string()),
            addresses: vec!["123 Main St".to_string()],
            ..EventInfo::default()
        };
        assert_eq!(pick_location(&event).as_deref(), Some("123 Main St"));
        assert_eq!(pick_location(&EventInfo::default()), None);
    }

    #[test]
    fn details_cache_stays_bounded() {
        let mut cache = HashMap::new();
        for n in 0..MAX_CACHED_DETAILS + 25 {
            cache_details(&mut cache, &format!("place-{n}"), PlaceDetails::default());
        }
        assert_eq!(cache.len(), MAX_CACHED_DETAILS);
        assert!(cache.contains_key(&format!("place-{}", MAX_CACHED_DETAILS + 24)));

        cache_details(&mut cache, "place-0-refresh", PlaceDetails {
            website: Some("https://bistro.example".to_string()),
            ..PlaceDetails::default()
        });
        assert_eq!(cache.len(), MAX_CACHED_DETAILS);
    }
}
