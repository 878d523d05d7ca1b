//! Entity resolution: free-text place name → one feature of a layer.
//!
//! Resolution is an ordered list of named rules. Each rule is a selector over
//! per-feature match facts; the first rule that selects any feature wins, and
//! within a rule the first feature in layer order wins.
//!
//! ```text
//!   ambiguous_exact_preferred      "san francisco" + country = preferred
//!   ambiguous_contains_preferred   (ambiguous names only)
//!   exact_name                     case-insensitive equality
//!   contains_preferred             substring + preferred country
//!   first_contains                 substring, layer order
//! ```

use serde_json::Value;
use terramind_core::{Feature, GeoError, Result, NAME_FIELDS};

const COUNTRY_FIELDS: &[&str] = &[
    "adm0name",
    "ADM0NAME",
    "sov0name",
    "SOV0NAME",
    "country",
    "sovereignt",
    "SOVEREIGNT",
    "admin",
    "ADMIN",
    "iso_a2",
    "ISO_A2",
];

const US_ALIASES: &[&str] = &["united states", "united states of america", "usa", "us"];

const AMBIGUOUS_NAMES: &[&str] = &[
    "san francisco",
    "portland",
    "springfield",
    "paris",
    "london",
    "birmingham",
    "cambridge",
    "columbus",
];

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    pub name_fields: Vec<String>,
    pub country_fields: Vec<String>,
    /// Lower-cased spellings that identify the preferred country.
    pub preferred_country_aliases: Vec<String>,
    /// Lower-cased names that get the preferred-country rules first.
    pub ambiguous_names: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        let owned = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect();
        Self {
            name_fields: owned(NAME_FIELDS),
            country_fields: owned(COUNTRY_FIELDS),
            preferred_country_aliases: owned(US_ALIASES),
            ambiguous_names: owned(AMBIGUOUS_NAMES),
        }
    }
}

impl ResolverConfig {
    /// Any spelling of the United States keeps the full alias set; other
    /// countries match by their given name only.
    pub fn with_preferred_country(mut self, country: &str) -> Self {
        let country = country.trim().to_lowercase();
        if country.is_empty() || US_ALIASES.contains(&country.as_str()) {
            self.preferred_country_aliases = US_ALIASES.iter().map(|s| s.to_string()).collect();
        } else {
            self.preferred_country_aliases = vec![country];
        }
        self
    }
}

/// What the rules see about one feature.
#[derive(Debug, Clone, Copy)]
struct MatchFacts {
    exact: bool,
    contains: bool,
    preferred_country: bool,
}

#[derive(Clone, Copy)]
struct Rule {
    name: &'static str,
    ambiguous_only: bool,
    select: fn(&MatchFacts) -> bool,
}

fn exact_in_preferred(f: &MatchFacts) -> bool {
    f.exact && f.preferred_country
}

fn contains_in_preferred(f: &MatchFacts) -> bool {
    f.contains && f.preferred_country
}

fn exact(f: &MatchFacts) -> bool {
    f.exact
}

fn contains(f: &MatchFacts) -> bool {
    f.contains
}

const RULES: &[Rule] = &[
    Rule {
        name: "ambiguous_exact_preferred",
        ambiguous_only: true,
        select: exact_in_preferred,
    },
    Rule {
        name: "ambiguous_contains_preferred",
        ambiguous_only: true,
        select: contains_in_preferred,
    },
    Rule {
        name: "exact_name",
        ambiguous_only: false,
        select: exact,
    },
    Rule {
        name: "contains_preferred",
        ambiguous_only: false,
        select: contains_in_preferred,
    },
    Rule {
        name: "first_contains",
        ambiguous_only: false,
        select: contains,
    },
];

/// The rule names in evaluation order.
pub fn rule_names() -> impl Iterator<Item = &'static str> {
    RULES.iter().map(|r| r.name)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolution<'a> {
    pub feature: &'a Feature,
    /// Which rule selected the feature.
    pub rule: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct EntityResolver {
    config: ResolverConfig,
}

impl EntityResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolve `name` within `features`; `layer` only labels the error.
    pub fn resolve<'a>(&self, name: &str, layer: &str, features: &'a [Feature]) -> Result<Resolution<'a>> {
        let query = name.trim().to_lowercase();
        let not_found = || GeoError::EntityNotFound {
            name: name.trim().to_string(),
            searched: layer.to_string(),
        };
        if query.is_empty() {
            return Err(not_found());
        }

        let ambiguous = self.config.ambiguous_names.iter().any(|a| *a == query);
        let facts: Vec<MatchFacts> = features.iter().map(|f| self.facts(&query, f)).collect();

        for rule in RULES {
            if rule.ambiguous_only && !ambiguous {
                continue;
            }
            if let Some(i) = facts.iter().position(rule.select) {
                tracing::debug!(name = %name.trim(), layer = %layer, rule = rule.name, "entity resolved");
                return Ok(Resolution {
                    feature: &features[i],
                    rule: rule.name,
                });
            }
        }
        Err(not_found())
    }

    fn facts(&self, query: &str, feature: &Feature) -> MatchFacts {
        let names: Vec<String> = self
            .string_values(feature, &self.config.name_fields)
            .map(str::to_lowercase)
            .collect();
        MatchFacts {
            exact: names.iter().any(|n| n == query),
            contains: names.iter().any(|n| n.contains(query)),
            preferred_country: self
                .string_values(feature, &self.config.country_fields)
                .map(str::to_lowercase)
                .any(|c| self.config.preferred_country_aliases.contains(&c)),
        }
    }

    fn string_values<'f>(
        &self,
        feature: &'f Feature,
        fields: &'f [String],
    ) -> impl Iterator<Item = &'f str> + 'f {
        fields
            .iter()
            .filter_map(|k| feature.properties.get(k))
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::point;
    use terramind_core::ErrorKind;

    fn place(name: &str, country: &str, x: f64) -> Feature {
        Feature::new(point!(x: x, y: 0.0).into())
            .with_property("NAME", name)
            .with_property("ADM0NAME", country)
    }

    fn gazetteer() -> Vec<Feature> {
        vec![
            place("San Francisco", "Argentina", 1.0),
            place("San Francisco de Macoris", "Dominican Republic", 2.0),
            place("San Francisco", "United States of America", 3.0),
            place("South San Francisco", "United States of America", 4.0),
            place("Austin", "United States of America", 5.0),
            place("Paris", "France", 6.0),
        ]
    }

    #[test]
    fn ambiguous_name_prefers_the_us_feature() {
        let features = gazetteer();
        let r = EntityResolver::default()
            .resolve("san francisco", "cities", &features)
            .unwrap();
        assert_eq!(r.rule, "ambiguous_exact_preferred");
        assert_eq!(
            r.feature.properties["ADM0NAME"],
            "United States of America"
        );
    }

    #[test]
    fn ambiguous_name_prefers_a_us_substring_over_a_foreign_exact_match() {
        let features = vec![
            place("Portland", "United Kingdom", 1.0),
            place("South Portland", "United States of America", 2.0),
        ];
        let r = EntityResolver::default()
            .resolve("portland", "cities", &features)
            .unwrap();
        assert_eq!(r.rule, "ambiguous_contains_preferred");
        assert_eq!(r.feature.name(), Some("South Portland"));
    }

    #[test]
    fn ambiguous_name_falls_back_to_foreign_exact_match() {
        let features = gazetteer();
        let r = EntityResolver::default()
            .resolve("Paris", "cities", &features)
            .unwrap();
        assert_eq!(r.rule, "exact_name");
        assert_eq!(r.feature.properties["ADM0NAME"], "France");
    }

    #[test]
    fn substring_rules_prefer_the_preferred_country() {
        let features = gazetteer();
        let r = EntityResolver::default()
            .resolve("San Fran", "cities", &features)
            .unwrap();
        assert_eq!(r.rule, "contains_preferred");
        assert_eq!(r.feature.name(), Some("San Francisco"));
        assert_eq!(
            r.feature.properties["ADM0NAME"],
            "United States of America"
        );

        let r = EntityResolver::default()
            .resolve("macoris", "cities", &features)
            .unwrap();
        assert_eq!(r.rule, "first_contains");
    }

    #[test]
    fn preferred_country_is_configurable() {
        let features = gazetteer();
        let resolver =
            EntityResolver::new(ResolverConfig::default().with_preferred_country("Argentina"));
        let r = resolver.resolve("San Francisco", "cities", &features).unwrap();
        assert_eq!(r.feature.properties["ADM0NAME"], "Argentina");
    }

    #[test]
    fn blank_and_unknown_names_are_not_found() {
        let features = gazetteer();
        let resolver = EntityResolver::default();
        for name in ["", "   ", "Atlantis"] {
            let err = resolver.resolve(name, "cities", &features).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::EntityNotFound);
        }
    }

    #[test]
    fn rules_are_listed_in_order() {
        let names: Vec<_> = rule_names().collect();
        assert_eq!(names.first(), Some(&"ambiguous_exact_preferred"));
        assert_eq!(names.last(), Some(&"first_contains"));
    }
}
