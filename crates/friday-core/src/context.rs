//! Home Assistant live context.
//!
//! `GetLiveContext` answers with a JSON envelope whose `result` holds a
//! prose header followed by a YAML list of every exposed entity. This
//! module unwraps the envelope and turns the list into [`Entity`] values.

use serde::{Deserialize, Serialize};
use serde_yaml::Value as Yaml;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Entity category derived from its domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Light,
    Switch,
    Sensor,
    BinarySensor,
    Climate,
    Cover,
    Fan,
    Lock,
    MediaPlayer,
    Scene,
    Script,
    Automation,
    Other,
}

impl EntityKind {
    /// Accepts a bare domain (`light`) or an entity id (`light.kitchen`)
    pub fn from_domain(domain: &str) -> Self {
        let domain = domain.split('.').next().unwrap_or_default().trim();
        match domain.to_ascii_lowercase().as_str() {
            "light" => Self::Light,
            "switch" => Self::Switch,
            "sensor" => Self::Sensor,
            "binary_sensor" => Self::BinarySensor,
            "climate" => Self::Climate,
            "cover" => Self::Cover,
            "fan" => Self::Fan,
            "lock" => Self::Lock,
            "media_player" => Self::MediaPlayer,
            "scene" => Self::Scene,
            "script" => Self::Script,
            "automation" => Self::Automation,
            _ => Self::Other,
        }
    }
}

/// One exposed entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Friendly name followed by any aliases
    pub names: Vec<String>,
    pub domain: String,
    pub kind: EntityKind,
    pub state: Option<String>,
    pub areas: Vec<String>,
    pub attributes: BTreeMap<String, String>,
}

impl Entity {
    pub fn name(&self) -> &str {
        self.names.first().map(String::as_str).unwrap_or_default()
    }

    pub fn is_on(&self) -> bool {
        matches!(self.state.as_deref(), Some("on") | Some("open") | Some("unlocked") | Some("playing"))
    }

    pub fn has_name(&self, name: &str) -> bool {
        self.names.iter().any(|n| n.eq_ignore_ascii_case(name.trim()))
    }

    pub fn in_area(&self, area: &str) -> bool {
        self.areas.iter().any(|a| a.eq_ignore_ascii_case(area.trim()))
    }
}

/// One item of the YAML list, before normalization
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEntity {
    names: Option<Yaml>,
    domain: Option<String>,
    state: Option<Yaml>,
    areas: Option<Yaml>,
    attributes: BTreeMap<String, Yaml>,
}

impl RawEntity {
    fn into_entity(self) -> Option<Entity> {
        let names = self.names.as_ref().map(list).unwrap_or_default();
        if names.is_empty() {
            return None;
        }
        let domain = self.domain.unwrap_or_default();
        Some(Entity {
            names,
            kind: EntityKind::from_domain(&domain),
            domain,
            state: self.state.as_ref().and_then(scalar),
            areas: self.areas.as_ref().map(list).unwrap_or_default(),
            attributes: self
                .attributes
                .iter()
                .filter_map(|(key, value)| attribute(value).map(|v| (key.clone(), v)))
                .collect(),
        })
    }
}

/// Parsed `GetLiveContext` overview
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveContext {
    pub entities: Vec<Entity>,
}

impl LiveContext {
    /// Parse a `GetLiveContext` answer.
    ///
    /// Accepts the JSON envelope or the bare overview text. The prose
    /// header is skipped and items without a name are dropped.
    pub fn parse(text: &str) -> Result<Self> {
        let overview = unwrap_envelope(text)?;
        let Some(list) = entity_list(&overview) else {
            return Ok(Self::default());
        };

        let items: Vec<Yaml> = serde_yaml::from_str(list)
            .map_err(|e| Error::Protocol(format!("Invalid live context: {}", e)))?;
        let entities = items
            .into_iter()
            .filter_map(|item| serde_yaml::from_value::<RawEntity>(item).ok())
            .filter_map(RawEntity::into_entity)
            .collect();

        Ok(Self { entities })
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn by_kind(&self, kind: EntityKind) -> Vec<&Entity> {
        self.entities.iter().filter(|e| e.kind == kind).collect()
    }

    /// Entities in an area, case-insensitive
    pub fn in_area(&self, area: &str) -> Vec<&Entity> {
        self.entities.iter().filter(|e| e.in_area(area)).collect()
    }

    pub fn lights(&self) -> Vec<&Entity> {
        self.by_kind(EntityKind::Light)
    }

    pub fn find(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.has_name(name))
    }

    /// Sorted, de-duplicated area names
    pub fn areas(&self) -> Vec<String> {
        let mut areas: Vec<String> = self
            .entities
            .iter()
            .flat_map(|e| e.areas.iter().cloned())
            .collect();
        areas.sort();
        areas.dedup();
        areas
    }
}

/// Pull the overview out of `{"success": true, "result": "..."}`
fn unwrap_envelope(text: &str) -> Result<String> {
    let Ok(serde_json::Value::Object(envelope)) = serde_json::from_str(text.trim()) else {
        return Ok(text.to_string());
    };
    if envelope.get("success").and_then(|v| v.as_bool()) == Some(false) {
        let reason = envelope
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        return Err(Error::Protocol(format!("GetLiveContext failed: {}", reason)));
    }
    match envelope.get("result") {
        Some(serde_json::Value::String(result)) => Ok(result.clone()),
        _ => Err(Error::Protocol("GetLiveContext answer has no result".to_string())),
    }
}

/// The overview from its first list item on
fn entity_list(overview: &str) -> Option<&str> {
    if overview.starts_with("- ") {
        return Some(overview);
    }
    overview.find("\n- ").map(|at| &overview[at + 1..])
}

fn scalar(value: &Yaml) -> Option<String> {
    match value {
        Yaml::String(s) => Some(s.clone()),
        Yaml::Number(n) => Some(n.to_string()),
        Yaml::Bool(b) => Some(b.to_string()),
        Yaml::Tagged(tagged) => scalar(&tagged.value),
        _ => None,
    }
}

/// Names and areas come as `A, B` or as a YAML sequence
fn list(value: &Yaml) -> Vec<String> {
    match value {
        Yaml::Sequence(items) => items.iter().filter_map(scalar).collect(),
        other => scalar(other)
            .map(|s| {
                s.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn attribute(value: &Yaml) -> Option<String> {
    match value {
        Yaml::Sequence(items) => Some(items.iter().filter_map(scalar).collect::<Vec<_>>().join(", ")),
        other => scalar(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OVERVIEW: &str = "Live Context: An overview of the areas and the devices in this smart home:
- names: Kitchen Light, Ceiling
  domain: light
  state: 'on'
  areas: Kitchen
  attributes:
    brightness: '180'
    color_mode: brightness
- names: Living Room Lamp
  domain: light
  state: 'off'
  areas: Living Room
- names: Front Door
  domain: lock
  state: locked
  areas: Hallway
- names: Outdoor Temperature
  domain: sensor
  state: '12.5'
  areas: Garden
  attributes:
    unit_of_measurement: °C
- names: Kettle
  domain: switch
  state: 'off'
";

    #[test]
    fn test_parse_entities() {
        let ctx = LiveContext::parse(OVERVIEW).unwrap();
        assert_eq!(ctx.len(), 5);

        let kitchen = &ctx.entities[0];
        assert_eq!(kitchen.names, vec!["Kitchen Light", "Ceiling"]);
        assert_eq!(kitchen.kind, EntityKind::Light);
        assert_eq!(kitchen.state.as_deref(), Some("on"));
        assert!(kitchen.is_on());
        assert_eq!(kitchen.attributes["brightness"], "180");
        assert_eq!(kitchen.attributes["color_mode"], "brightness");
    }

    #[test]
    fn test_attributes_end_at_next_key() {
        let ctx = LiveContext::parse(OVERVIEW).unwrap();
        let sensor = ctx.find("outdoor temperature").unwrap();
        assert_eq!(sensor.attributes.len(), 1);
        assert_eq!(sensor.attributes["unit_of_measurement"], "°C");
        assert!(ctx.find("Living Room Lamp").unwrap().attributes.is_empty());
    }

    #[test]
    fn test_filters() {
        let ctx = LiveContext::parse(OVERVIEW).unwrap();
        assert_eq!(ctx.lights().len(), 2);
        assert_eq!(ctx.by_kind(EntityKind::Lock).len(), 1);
        assert_eq!(ctx.in_area("living room").len(), 1);
        assert!(ctx.in_area("Attic").is_empty());
        assert_eq!(ctx.areas(), vec!["Garden", "Hallway", "Kitchen", "Living Room"]);

        let kettle = ctx.find("Kettle").unwrap();
        assert!(kettle.areas.is_empty());
        assert!(!kettle.is_on());
    }

    #[test]
    fn test_entity_kind_from_domain() {
        assert_eq!(EntityKind::from_domain("light.kitchen"), EntityKind::Light);
        assert_eq!(EntityKind::from_domain("binary_sensor"), EntityKind::BinarySensor);
        assert_eq!(EntityKind::from_domain("media_player.tv"), EntityKind::MediaPlayer);
        assert_eq!(EntityKind::from_domain("vacuum"), EntityKind::Other);
    }

    #[test]
    fn test_parse_tolerates_noise() {
        assert!(LiveContext::parse("").unwrap().is_empty());
        assert!(LiveContext::parse("Live Context: nothing exposed").unwrap().is_empty());

        let ctx = LiveContext::parse("- domain: light\n  state: on\n- names: \"Desk Lamp\"\n  domain: light\n").unwrap();
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.entities[0].name(), "Desk Lamp");
        assert_eq!(ctx.entities[0].state, None);
    }

    #[test]
    fn test_parse_json_envelope() {
        let answer = serde_json::json!({"success": true, "result": OVERVIEW}).to_string();
        let ctx = LiveContext::parse(&answer).unwrap();
        assert_eq!(ctx.len(), 5);
        assert_eq!(ctx.find("Ceiling").unwrap().attributes["brightness"], "180");
        assert_eq!(ctx.find("Outdoor Temperature").unwrap().state.as_deref(), Some("12.5"));
    }

    #[test]
    fn test_parse_failed_envelope() {
        let answer = r#"{"success": false, "error": "No entities exposed"}"#;
        let err = LiveContext::parse(answer).unwrap_err();
        assert!(err.to_string().contains("No entities exposed"));
    }

    #[test]
    fn test_parse_yaml_forms() {
        let overview = "Live Context: overview\n\
- names: [Porch Light, Porch]\n  domain: light\n  state: 'on'\n  areas: [Porch, Outside]\n  attributes:\n    brightness: 255\n    effect_list: [none, rainbow]\n";
        let ctx = LiveContext::parse(overview).unwrap();
        let porch = ctx.find("porch").unwrap();
        assert_eq!(porch.names, vec!["Porch Light", "Porch"]);
        assert_eq!(porch.areas, vec!["Porch", "Outside"]);
        assert_eq!(porch.attributes["brightness"], "255");
        assert_eq!(porch.attributes["effect_list"], "none, rainbow");
    }

    #[test]
    fn test_parse_rejects_broken_yaml() {
        let err = LiveContext::parse("- names: [Kitchen\n  domain: light").unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
