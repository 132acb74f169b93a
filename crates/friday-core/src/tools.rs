//! In-process tools offered next to the Home Assistant ones.
//!
//! Every handler answers with text. Failures become friendly messages the
//! agent can read out, flagged as errors, and never abort the session.

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Disks, System};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::mcp::CallToolResult;
use crate::registry::{Capability, CapabilityRegistry, ToolHandler};

const GEOCODE_CACHE_SIZE: usize = 100;
const SEARCH_MIN_CHARS: usize = 10;
const SEARCH_MAX_CHARS: usize = 1000;
const GEOCODE_TIMEOUT: Duration = Duration::from_secs(10);
const FORECAST_TIMEOUT: Duration = Duration::from_secs(15);
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// WMO weather interpretation codes used by Open-Meteo
const WEATHER_CODES: &[(u16, &str)] = &[
    (0, "Clear sky"),
    (1, "Mainly clear"),
    (2, "Partly cloudy"),
    (3, "Overcast"),
    (45, "Foggy"),
    (48, "Depositing rime fog"),
    (51, "Light drizzle"),
    (53, "Moderate drizzle"),
    (55, "Dense drizzle"),
    (61, "Slight rain"),
    (63, "Moderate rain"),
    (65, "Heavy rain"),
    (71, "Slight snow"),
    (73, "Moderate snow"),
    (75, "Heavy snow"),
    (77, "Snow grains"),
    (80, "Slight rain showers"),
    (81, "Moderate rain showers"),
    (82, "Violent rain showers"),
    (85, "Slight snow showers"),
    (86, "Heavy snow showers"),
    (95, "Thunderstorm"),
    (96, "Thunderstorm with slight hail"),
    (99, "Thunderstorm with heavy hail"),
];

/// Human description of a weather code
pub fn weather_description(code: u16) -> String {
    WEATHER_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, d)| d.to_string())
        .unwrap_or_else(|| format!("Unknown (code: {})", code))
}

/// Base URLs of the public services the tools call
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub nominatim: String,
    pub open_meteo: String,
    pub duckduckgo: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            nominatim: "https://nominatim.openstreetmap.org/search".to_string(),
            open_meteo: "https://api.open-meteo.com/v1/forecast".to_string(),
            duckduckgo: "https://api.duckduckgo.com/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GeoLocation {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

#[derive(Debug, Deserialize)]
struct Forecast {
    current_weather: CurrentWeather,
}

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    temperature: f64,
    windspeed: f64,
    winddirection: f64,
    weathercode: u16,
}

/// Bounded geocoding cache, oldest entry evicted first
#[derive(Default)]
struct GeoCache {
    entries: HashMap<String, GeoLocation>,
    order: VecDeque<String>,
}

impl GeoCache {
    fn get(&self, key: &str) -> Option<GeoLocation> {
        self.entries.get(key).copied()
    }

    fn insert(&mut self, key: String, location: GeoLocation) {
        if self.entries.insert(key.clone(), location).is_none() {
            self.order.push_back(key);
        }
        while self.order.len() > GEOCODE_CACHE_SIZE {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

enum FetchError {
    Timeout,
    Status(u16),
    Other(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = e.status() {
            FetchError::Status(status.as_u16())
        } else {
            FetchError::Other(e.to_string())
        }
    }
}

/// Weather, time, web search and host status
pub struct LocalTools {
    http: reqwest::Client,
    endpoints: Endpoints,
    geocache: Mutex<GeoCache>,
}

impl LocalTools {
    pub fn new() -> Result<Self> {
        Self::with_endpoints(Endpoints::default())
    }

    pub fn with_endpoints(endpoints: Endpoints) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("friday-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoints,
            geocache: Mutex::new(GeoCache::default()),
        })
    }

    /// Current weather for a city
    pub async fn weather(&self, city: &str) -> std::result::Result<String, String> {
        let location = match self.geocode(city).await {
            Ok(Some(loc)) => loc,
            Ok(None) => {
                return Err(format!(
                    "Could not find location: {}. Please check the spelling or try a different city name.",
                    city
                ));
            }
            Err(e) => return Err(weather_failure(city, e)),
        };

        match self.forecast(location).await {
            Ok(current) => Ok(format!(
                "Weather in {}: {}, {}°C, wind {} km/h at {}°",
                city,
                weather_description(current.weathercode),
                current.temperature,
                current.windspeed,
                current.winddirection
            )),
            Err(e) => Err(weather_failure(city, e)),
        }
    }

    /// Current time, locally or in an IANA zone
    pub fn time(&self, location: Option<&str>) -> std::result::Result<String, String> {
        let result = time_in(location, Utc::now());
        if let Ok(ref text) = result {
            info!("Time result: {}", text);
        }
        result
    }

    /// DuckDuckGo instant answer lookup
    pub async fn search(&self, query: &str) -> std::result::Result<String, String> {
        let response = self
            .http
            .get(&self.endpoints.duckduckgo)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("no_html", "1"),
                ("skip_disambig", "1"),
            ])
            .timeout(SEARCH_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let body: Value = match response {
            Ok(r) => r.json().await.map_err(|e| search_failure(query, &e.to_string()))?,
            Err(e) => return Err(search_failure(query, &e.to_string())),
        };

        let text = finish_search(query, &summarize_instant_answer(&body));
        info!("Search completed for '{}'", query);
        Ok(text)
    }

    /// CPU, memory and root disk usage
    pub async fn system_status(&self) -> std::result::Result<String, String> {
        let mut sys = System::new();
        sys.refresh_cpu_usage();
        tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
        sys.refresh_cpu_usage();
        sys.refresh_memory();

        let cpu = sys.global_cpu_usage();
        let memory = percent(sys.used_memory(), sys.total_memory());

        let disks = Disks::new_with_refreshed_list();
        let root = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == std::path::Path::new("/"))
            .or_else(|| disks.list().first());
        let Some(root) = root else {
            warn!("No disks reported");
            return Err("System status unavailable".to_string());
        };
        let disk = percent(
            root.total_space().saturating_sub(root.available_space()),
            root.total_space(),
        );

        Ok(format!(
            "System Status: CPU {:.1}%, Memory {:.1}% used, Disk {:.1}% used",
            cpu, memory, disk
        ))
    }

    async fn geocode(&self, address: &str) -> std::result::Result<Option<GeoLocation>, FetchError> {
        let key = address.trim().to_lowercase();
        if let Some(hit) = self.geocache.lock().await.get(&key) {
            return Ok(Some(hit));
        }

        let places: Vec<NominatimPlace> = self
            .http
            .get(&self.endpoints.nominatim)
            .query(&[("q", address), ("format", "json"), ("limit", "1")])
            .timeout(GEOCODE_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };
        let location = match (place.lat.parse(), place.lon.parse()) {
            (Ok(lat), Ok(lon)) => GeoLocation { lat, lon },
            _ => {
                return Err(FetchError::Other(format!(
                    "unparseable coordinates {},{}",
                    place.lat, place.lon
                )));
            }
        };

        self.geocache.lock().await.insert(key, location);
        Ok(Some(location))
    }

    async fn forecast(&self, location: GeoLocation) -> std::result::Result<CurrentWeather, FetchError> {
        let forecast: Forecast = self
            .http
            .get(&self.endpoints.open_meteo)
            .query(&[
                ("latitude", location.lat.to_string()),
                ("longitude", location.lon.to_string()),
                ("current_weather", "true".to_string()),
                ("timezone", "auto".to_string()),
            ])
            .timeout(FORECAST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(forecast.current_weather)
    }
}

fn weather_failure(city: &str, error: FetchError) -> String {
    match error {
        FetchError::Timeout => format!("Weather service timeout for {}. Please try again.", city),
        FetchError::Status(status) => {
            error!("HTTP error {} for {}", status, city);
            format!("Weather service error for {}. Please try again later.", city)
        }
        FetchError::Other(e) => {
            error!("Unexpected error getting weather for {}: {}", city, e);
            format!("Could not retrieve weather for {}. Please try again.", city)
        }
    }
}

fn search_failure(query: &str, error: &str) -> String {
    error!("Error searching the web for '{}': {}", query, error);
    format!(
        "Search error for '{}'. Please try again or rephrase your query.",
        query
    )
}

fn time_in(location: Option<&str>, now: DateTime<Utc>) -> std::result::Result<String, String> {
    match location.map(str::trim).filter(|l| !l.is_empty()) {
        None => {
            let local = now.with_timezone(&Local);
            Ok(format!(
                "Current local time: {}",
                local.format("%Y-%m-%d %H:%M:%S %:z")
            ))
        }
        Some(zone) => match zone.parse::<Tz>() {
            Ok(tz) => Ok(format!(
                "Current time in {}: {}",
                zone,
                now.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S %Z")
            )),
            Err(_) => {
                error!("Invalid timezone {}", zone);
                Err(format!(
                    "Invalid timezone: {}. Please use IANA format like 'America/New_York' or 'Europe/London'.",
                    zone
                ))
            }
        },
    }
}

/// Flatten an instant-answer document into plain text
fn summarize_instant_answer(body: &Value) -> String {
    let mut parts: Vec<String> = ["Answer", "AbstractText", "Definition"]
        .iter()
        .filter_map(|k| body[*k].as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    if let Some(topics) = body["RelatedTopics"].as_array() {
        parts.extend(
            topics
                .iter()
                .filter_map(|t| t["Text"].as_str())
                .filter(|s| !s.trim().is_empty())
                .take(5)
                .map(String::from),
        );
    }

    parts.join("\n")
}

fn finish_search(query: &str, text: &str) -> String {
    let text = text.trim();
    if text.chars().count() < SEARCH_MIN_CHARS {
        return format!(
            "No relevant results found for '{}'. Please try a different search term.",
            query
        );
    }
    if text.chars().count() > SEARCH_MAX_CHARS {
        let truncated: String = text.chars().take(SEARCH_MAX_CHARS).collect();
        return format!("{}...", truncated);
    }
    text.to_string()
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn text_handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<String, String>> + Send + 'static,
{
    let handler: ToolHandler = Arc::new(move |args| {
        let fut = f(args);
        Box::pin(async move {
            match fut.await {
                Ok(text) => CallToolResult::text_result(text, false),
                Err(text) => CallToolResult::text_result(text, true),
            }
        })
    });
    handler
}

fn string_arg(args: &Value, key: &str) -> String {
    args[key].as_str().unwrap_or_default().to_string()
}

/// Register the local tools; already registered names are left alone
pub async fn register_local_tools(registry: &CapabilityRegistry, tools: Arc<LocalTools>) -> Result<()> {
    let weather = Arc::clone(&tools);
    let time = Arc::clone(&tools);
    let search = Arc::clone(&tools);
    let status = tools;

    let entries: Vec<(Capability, ToolHandler)> = vec![
        (
            Capability::local(
                "get_weather",
                "Get the current weather for a given city.",
                json!({
                    "type": "object",
                    "properties": {
                        "city": {"type": "string", "description": "The city name to get weather for"}
                    },
                    "required": ["city"]
                }),
            ),
            text_handler(move |args| {
                let tools = Arc::clone(&weather);
                async move { tools.weather(&string_arg(&args, "city")).await }
            }),
        ),
        (
            Capability::local(
                "get_time_smart",
                "Get the current time. Local time if no location is given, otherwise the time in that IANA timezone.",
                json!({
                    "type": "object",
                    "properties": {
                        "location": {
                            "type": "string",
                            "description": "IANA timezone such as 'America/New_York' or 'Europe/London'"
                        }
                    }
                }),
            ),
            text_handler(move |args| {
                let tools = Arc::clone(&time);
                async move { tools.time(args["location"].as_str()) }
            }),
        ),
        (
            Capability::local(
                "search_web",
                "Search the web for current information.",
                json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string", "description": "The search query to look up"}
                    },
                    "required": ["query"]
                }),
            ),
            text_handler(move |args| {
                let tools = Arc::clone(&search);
                async move { tools.search(&string_arg(&args, "query")).await }
            }),
        ),
        (
            Capability::local(
                "get_system_status",
                "Get CPU, memory and disk usage of the host running the agent.",
                json!({"type": "object", "properties": {}}),
            ),
            text_handler(move |_| {
                let tools = Arc::clone(&status);
                async move { tools.system_status().await }
            }),
        ),
    ];

    for (capability, handler) in entries {
        if registry.contains(&capability.name).await {
            continue;
        }
        registry.register(capability, Some(handler)).await?;
    }
    Ok(())
}
