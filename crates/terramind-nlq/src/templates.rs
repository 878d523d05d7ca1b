//! Deterministic query templates.
//!
//! The fast path for common questions: a normalized query is checked against
//! an ordered table of keyword rules and the first match produces an
//! [`OperationRequest`] without any model call. The table is static; more
//! specific templates sit above generic ones.
//!
//! Parameter extraction is independent of classification. Three patterns run
//! over the original text (so "San Francisco" keeps its casing) and fill
//! `{{distance}}`, `{{location}}` and `{{area}}` placeholders. A placeholder
//! with no extracted value is left out of the request, and validation later
//! reports the missing parameter.

use regex::Regex;
use serde_json::{Map, Value};
use terramind_core::{OperationKind, OperationRequest};

/// One row of the template table.
#[derive(Debug, Clone, Copy)]
pub struct QueryTemplate {
    pub pattern_id: &'static str,
    pub operation: OperationKind,
    pub layers: &'static [&'static str],
    /// Every group must have at least one keyword contained in the query.
    pub rule: &'static [&'static [&'static str]],
    /// Literal values, or `{{name}}` placeholders.
    pub parameters: &'static [(&'static str, &'static str)],
}

impl QueryTemplate {
    pub fn matches(&self, normalized_query: &str) -> bool {
        self.rule
            .iter()
            .all(|group| group.iter().any(|kw| normalized_query.contains(kw)))
    }

    /// Human-readable rule, e.g. `states & (border | borders)`.
    pub fn describe_rule(&self) -> String {
        self.rule
            .iter()
            .map(|group| match group {
                [one] => (*one).to_string(),
                many => format!("({})", many.join(" | ")),
            })
            .collect::<Vec<_>>()
            .join(" & ")
    }
}

const SIZE_WORDS: &[&str] = &["square mile", "square miles", "larger than", "bigger than"];

pub const TEMPLATES: &[QueryTemplate] = &[
    QueryTemplate {
        pattern_id: "state_borders",
        operation: OperationKind::Touches,
        layers: &["states"],
        rule: &[
            &["states"],
            &["border", "borders", "bordering", "adjacent to", "next to"],
        ],
        parameters: &[("target", "{{location}}"), ("targetLayer", "states")],
    },
    QueryTemplate {
        pattern_id: "coastal_buffer",
        operation: OperationKind::Buffer,
        layers: &["coastline"],
        rule: &[&["coast", "coastline", "coastal"], &["mile", "miles"]],
        parameters: &[("distance", "{{distance}}"), ("units", "miles")],
    },
    QueryTemplate {
        pattern_id: "cities_near",
        operation: OperationKind::Within,
        layers: &["cities"],
        rule: &[&["cities"], &["within", "near", "miles"]],
        parameters: &[
            ("target", "{{location}}"),
            ("targetLayer", "cities"),
            ("distance", "{{distance}}"),
            ("units", "miles"),
        ],
    },
    QueryTemplate {
        pattern_id: "rivers_through",
        operation: OperationKind::Intersects,
        layers: &["rivers"],
        rule: &[&["rivers"], &["through", "cross", "crosses", "flow", "flows"]],
        parameters: &[("target", "{{location}}"), ("targetLayer", "states")],
    },
    QueryTemplate {
        pattern_id: "lakes_by_area",
        operation: OperationKind::AreaFilter,
        layers: &["lakes"],
        rule: &[&["lakes"], SIZE_WORDS],
        parameters: &[("minArea", "{{area}}"), ("units", "square_miles")],
    },
    QueryTemplate {
        pattern_id: "states_by_area",
        operation: OperationKind::AreaFilter,
        layers: &["states"],
        rule: &[&["states"], SIZE_WORDS],
        parameters: &[("minArea", "{{area}}"), ("units", "square_miles")],
    },
    QueryTemplate {
        pattern_id: "states_union",
        operation: OperationKind::Union,
        layers: &["states"],
        rule: &[
            &["states"],
            &["union", "combine", "combined", "merge", "merged"],
        ],
        parameters: &[],
    },
    QueryTemplate {
        pattern_id: "water_intersection",
        operation: OperationKind::Intersects,
        layers: &["rivers", "lakes"],
        rule: &[&["intersect", "intersects", "intersecting"]],
        parameters: &[("target", "{{location}}"), ("targetLayer", "states")],
    },
];

/// Trim, lower-case and collapse internal whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// ============================================================================
// Parameter extraction
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedParameters {
    pub distance: Option<f64>,
    pub location: Option<String>,
    pub area: Option<f64>,
}

impl ExtractedParameters {
    fn value(&self, placeholder: &str) -> Option<Value> {
        match placeholder {
            "distance" => self.distance.map(Value::from),
            "location" => self.location.clone().map(Value::from),
            "area" => self.area.map(Value::from),
            _ => None,
        }
    }
}

/// Place phrase after an introducing word. Letters are any script; `St.`
/// style abbreviations stay inside the phrase, any other `.` ends it only
/// before whitespace or end of text.
const LOCATION_PATTERN: &str = concat!(
    r"(?i)\b(?:of|near|through|border|borders|bordering|adjacent\s+to|next\s+to|intersect|intersects|intersecting)\s+",
    r"(?:the\s+)?",
    r"((?:\b(?:st|ste|mt|ft|pt)\.\s?|\p{L})(?:\b(?:st|ste|mt|ft|pt)\.\s?|[\p{L}\p{M}'\-]|\s)*?)",
    r"\s*(?:[,?!;]|\.(?:\s|$)|\s(?:and|with|that|which|where)\b|$)",
);

#[derive(Debug, Clone)]
pub struct ParameterExtractor {
    distance: Regex,
    location: Regex,
    area: Regex,
}

impl ParameterExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            distance: Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?)\s*miles?\b")?,
            location: Regex::new(LOCATION_PATTERN)?,
            area: Regex::new(r"(?i)(\d[\d,]*(?:\.\d+)?)\s*square\s+miles?\b")?,
        })
    }

    pub fn extract(&self, text: &str) -> ExtractedParameters {
        let text = text.trim();
        ExtractedParameters {
            distance: first_number(&self.distance, text),
            location: self
                .location
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string())
                .filter(|s| !s.is_empty()),
            area: first_number(&self.area, text),
        }
    }
}

fn first_number(re: &Regex, text: &str) -> Option<f64> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse::<f64>().ok())
}

// ============================================================================
// Matcher
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMatch {
    pub pattern_id: &'static str,
    pub request: OperationRequest,
    /// Placeholders with no extracted value; their keys are absent from
    /// `request.parameters`.
    pub unresolved: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    templates: &'static [QueryTemplate],
    extractor: ParameterExtractor,
}

impl TemplateMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            templates: TEMPLATES,
            extractor: ParameterExtractor::new()?,
        })
    }

    pub fn templates(&self) -> &'static [QueryTemplate] {
        self.templates
    }

    pub fn classify(&self, query: &str) -> Option<&'static QueryTemplate> {
        let normalized = normalize_query(query);
        self.templates.iter().find(|t| t.matches(&normalized))
    }

    pub fn match_query(&self, query: &str) -> Option<TemplateMatch> {
        let template = self.classify(query)?;
        let extracted = self.extractor.extract(query);

        let mut parameters = Map::new();
        let mut unresolved = Vec::new();
        for (key, raw) in template.parameters {
            match placeholder_name(raw) {
                Some(name) => match extracted.value(name) {
                    Some(v) => {
                        parameters.insert((*key).to_string(), v);
                    }
                    None => unresolved.push(name.to_string()),
                },
                None => {
                    parameters.insert((*key).to_string(), Value::from(*raw));
                }
            }
        }

        tracing::debug!(
            pattern_id = template.pattern_id,
            unresolved = ?unresolved,
            "template matched"
        );

        Some(TemplateMatch {
            pattern_id: template.pattern_id,
            request: OperationRequest {
                kind: template.operation.as_str().to_string(),
                parameters,
                layers: template.layers.iter().map(|s| s.to_string()).collect(),
            },
            unresolved,
        })
    }

    pub fn extractor(&self) -> &ParameterExtractor {
        &self.extractor
    }
}

fn placeholder_name(raw: &str) -> Option<&str> {
    raw.strip_prefix("{{")?.strip_suffix("}}").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> TemplateMatcher {
        TemplateMatcher::new().unwrap()
    }

    #[test]
    fn border_template_wins_for_border_queries() {
        let m = matcher().match_query("Which states border Texas?").unwrap();
        assert_eq!(m.pattern_id, "state_borders");
        assert_eq!(m.request.kind, "TOUCHES");
        assert_eq!(m.request.parameters["target"], "Texas");
        assert_eq!(m.request.parameters["targetLayer"], "states");
        assert!(m.unresolved.is_empty());
    }

    #[test]
    fn proximity_template_extracts_distance_and_location() {
        let m = matcher()
            .match_query("cities within 50 miles of San Francisco")
            .unwrap();
        assert_eq!(m.pattern_id, "cities_near");
        assert_eq!(m.request.parameters["distance"], 50.0);
        assert_eq!(m.request.parameters["target"], "San Francisco");
        assert_eq!(m.request.layers, ["cities"]);
    }

    #[test]
    fn square_miles_is_not_a_distance() {
        let e = ParameterExtractor::new()
            .unwrap()
            .extract("lakes larger than 1,500 square miles");
        assert_eq!(e.area, Some(1500.0));
        assert_eq!(e.distance, None);
    }

    #[test]
    fn location_stops_at_clause_words() {
        let e = ParameterExtractor::new()
            .unwrap()
            .extract("rivers that flow through the Colorado Plateau and into Utah");
        assert_eq!(e.location.as_deref(), Some("Colorado Plateau"));
    }

    #[test]
    fn adjacency_and_intersection_phrasings_carry_a_location() {
        let m = matcher();
        for (query, pattern_id, target) in [
            ("states next to Texas", "state_borders", "Texas"),
            ("Which states are adjacent to Texas?", "state_borders", "Texas"),
            ("rivers that intersect Texas", "water_intersection", "Texas"),
            ("lakes intersecting Colorado", "water_intersection", "Colorado"),
        ] {
            let hit = m.match_query(query).unwrap();
            assert_eq!(hit.pattern_id, pattern_id, "{query}");
            assert_eq!(hit.request.parameters["target"], target, "{query}");
            assert!(hit.unresolved.is_empty(), "{query}");
        }
    }

    #[test]
    fn non_ascii_and_abbreviated_place_names() {
        let e = ParameterExtractor::new().unwrap();
        assert_eq!(
            e.extract("cities within 50 miles of Zürich").location.as_deref(),
            Some("Zürich")
        );
        assert_eq!(
            e.extract("cities near São Paulo?").location.as_deref(),
            Some("São Paulo")
        );
        assert_eq!(
            e.extract("cities within 20 miles of St. Louis").location.as_deref(),
            Some("St. Louis")
        );
        assert_eq!(
            e.extract("Cities near St. Louis. Sorted by size.").location.as_deref(),
            Some("St. Louis")
        );
    }

    #[test]
    fn missing_placeholder_is_left_out() {
        let m = matcher().match_query("show the coastline out to some miles").unwrap();
        assert_eq!(m.pattern_id, "coastal_buffer");
        assert!(!m.request.parameters.contains_key("distance"));
        assert_eq!(m.unresolved, ["distance"]);
        assert_eq!(m.request.parameters["units"], "miles");
    }

    #[test]
    fn specific_templates_precede_generic_ones() {
        // Mentions both "states" + "intersect"; the area rule is earlier.
        let m = matcher()
            .match_query("states larger than 100000 square miles that intersect rivers")
            .unwrap();
        assert_eq!(m.pattern_id, "states_by_area");
        assert_eq!(m.request.parameters["minArea"], 100000.0);
    }

    #[test]
    fn whitespace_and_case_are_normalized() {
        assert_eq!(normalize_query("  Lakes   BIGGER\tthan  "), "lakes bigger than");
        assert!(matcher().classify("what is the weather").is_none());
    }

    #[test]
    fn rule_description_is_readable() {
        let t = TEMPLATES.iter().find(|t| t.pattern_id == "coastal_buffer").unwrap();
        assert_eq!(t.describe_rule(), "(coast | coastline | coastal) & (mile | miles)");
    }
}
