//! Spatial operations: the untyped wire shape and the validated, typed form.
//!
//! Templates, the language-model oracle and inbound requests all produce an
//! [`OperationRequest`] (`{ type, parameters, layers }`). Nothing executes an
//! `OperationRequest` directly: it is first validated into an
//! [`Operation<TargetRef>`], a closed sum type whose variants carry exactly the
//! parameters their kind needs. Missing, malformed and unexpected parameters
//! are rejected here, before any layer is fetched.
//!
//! Named targets (`"target": "Texas"`) are bound to a concrete [`Feature`] by
//! the entity resolver, yielding an [`Operation<Feature>`] ([`BoundOperation`]),
//! which is the only form the engine accepts.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GeoError, Result};
use crate::feature::{feature_from_json_value, Feature};
use crate::units::{AreaUnit, LinearUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Buffer,
    Within,
    Touches,
    Intersects,
    AreaFilter,
    Union,
    Difference,
}

impl OperationKind {
    pub const ALL: [OperationKind; 7] = [
        OperationKind::Buffer,
        OperationKind::Within,
        OperationKind::Touches,
        OperationKind::Intersects,
        OperationKind::AreaFilter,
        OperationKind::Union,
        OperationKind::Difference,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Buffer => "BUFFER",
            OperationKind::Within => "WITHIN",
            OperationKind::Touches => "TOUCHES",
            OperationKind::Intersects => "INTERSECTS",
            OperationKind::AreaFilter => "AREA_FILTER",
            OperationKind::Union => "UNION",
            OperationKind::Difference => "DIFFERENCE",
        }
    }

    /// Case-insensitive; `-` and spaces are read as `_`.
    pub fn parse(s: &str) -> Result<Self> {
        let norm = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == norm)
            .ok_or_else(|| GeoError::UnsupportedOperation(s.trim().to_string()))
    }

    /// Parameter keys (canonical spelling) this kind accepts.
    pub fn allowed_parameters(self) -> &'static [&'static str] {
        match self {
            OperationKind::Buffer => &["distance", "units"],
            OperationKind::Within => &[
                "distance",
                "units",
                "targetGeometry",
                "target",
                "location",
                "targetLayer",
            ],
            OperationKind::Touches | OperationKind::Intersects => {
                &["targetGeometry", "target", "location", "targetLayer"]
            }
            OperationKind::AreaFilter => &["minArea", "units"],
            OperationKind::Union | OperationKind::Difference => &[],
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Wire shape
// ============================================================================

/// `{ type, parameters, layers }` as produced by templates, the oracle and
/// inbound requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub layers: Vec<String>,
}

impl OperationRequest {
    pub fn new(kind: OperationKind, layers: &[&str]) -> Self {
        Self {
            kind: kind.as_str().to_string(),
            parameters: Map::new(),
            layers: layers.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }
}

// ============================================================================
// Typed form
// ============================================================================

/// Where an operation's target geometry comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetRef {
    /// Geometry supplied inline (`targetGeometry`).
    Geometry(Feature),
    /// A place name to resolve, optionally against a specific layer.
    Named { name: String, layer: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferParams {
    pub distance: f64,
    pub units: LinearUnit,
}

impl BufferParams {
    pub fn meters(&self) -> f64 {
        self.units.to_meters(self.distance)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithinParams<T> {
    pub target: T,
    pub distance: f64,
    pub units: LinearUnit,
}

impl<T> WithinParams<T> {
    pub fn radius_meters(&self) -> f64 {
        self.units.to_meters(self.distance)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaFilterParams {
    pub min_area: f64,
    pub units: AreaUnit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationSpec<T> {
    Buffer(BufferParams),
    Within(WithinParams<T>),
    Touches { target: T },
    Intersects { target: T },
    AreaFilter(AreaFilterParams),
    Union,
    Difference,
}

impl<T> OperationSpec<T> {
    pub fn kind(&self) -> OperationKind {
        match self {
            OperationSpec::Buffer(_) => OperationKind::Buffer,
            OperationSpec::Within(_) => OperationKind::Within,
            OperationSpec::Touches { .. } => OperationKind::Touches,
            OperationSpec::Intersects { .. } => OperationKind::Intersects,
            OperationSpec::AreaFilter(_) => OperationKind::AreaFilter,
            OperationSpec::Union => OperationKind::Union,
            OperationSpec::Difference => OperationKind::Difference,
        }
    }

    pub fn target(&self) -> Option<&T> {
        match self {
            OperationSpec::Within(p) => Some(&p.target),
            OperationSpec::Touches { target } | OperationSpec::Intersects { target } => {
                Some(target)
            }
            _ => None,
        }
    }
}

/// A validated operation over an ordered, non-empty list of layers.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation<T = TargetRef> {
    pub spec: OperationSpec<T>,
    pub layers: Vec<String>,
}

/// An operation whose target (if any) has been resolved to a feature.
pub type BoundOperation = Operation<Feature>;

impl<T> Operation<T> {
    pub fn kind(&self) -> OperationKind {
        self.spec.kind()
    }

    pub fn target(&self) -> Option<&T> {
        self.spec.target()
    }

    /// Replace the target representation, leaving every other field intact.
    pub fn try_map_target<U, E>(
        self,
        f: impl FnOnce(T) -> std::result::Result<U, E>,
    ) -> std::result::Result<Operation<U>, E> {
        let spec = match self.spec {
            OperationSpec::Buffer(p) => OperationSpec::Buffer(p),
            OperationSpec::Within(p) => OperationSpec::Within(WithinParams {
                target: f(p.target)?,
                distance: p.distance,
                units: p.units,
            }),
            OperationSpec::Touches { target } => OperationSpec::Touches { target: f(target)? },
            OperationSpec::Intersects { target } => OperationSpec::Intersects {
                target: f(target)?,
            },
            OperationSpec::AreaFilter(p) => OperationSpec::AreaFilter(p),
            OperationSpec::Union => OperationSpec::Union,
            OperationSpec::Difference => OperationSpec::Difference,
        };
        Ok(Operation {
            spec,
            layers: self.layers,
        })
    }
}

impl Operation<TargetRef> {
    /// Validate a wire request against the set of layers the store can serve.
    pub fn from_request(request: &OperationRequest, available_layers: &[String]) -> Result<Self> {
        let kind = OperationKind::parse(&request.kind)?;
        let layers = validate_layers(kind, &request.layers, available_layers)?;
        let params = Params::collect(kind, &request.parameters)?;

        let spec = match kind {
            OperationKind::Buffer => {
                let distance = params.required_number(kind, "distance")?;
                if distance <= 0.0 {
                    return Err(GeoError::invalid(format!(
                        "BUFFER `distance` must be positive (got {distance})"
                    )));
                }
                OperationSpec::Buffer(BufferParams {
                    distance,
                    units: params.linear_units()?,
                })
            }
            OperationKind::Within => {
                let distance = params.required_number(kind, "distance")?;
                if distance < 0.0 {
                    return Err(GeoError::invalid(format!(
                        "WITHIN `distance` must not be negative (got {distance})"
                    )));
                }
                OperationSpec::Within(WithinParams {
                    target: params.target(kind)?,
                    distance,
                    units: params.linear_units()?,
                })
            }
            OperationKind::Touches => OperationSpec::Touches {
                target: params.target(kind)?,
            },
            OperationKind::Intersects => OperationSpec::Intersects {
                target: params.target(kind)?,
            },
            OperationKind::AreaFilter => {
                let min_area = params.required_number(kind, "minArea")?;
                if min_area < 0.0 {
                    return Err(GeoError::invalid(format!(
                        "AREA_FILTER `minArea` must not be negative (got {min_area})"
                    )));
                }
                OperationSpec::AreaFilter(AreaFilterParams {
                    min_area,
                    units: params.area_units()?,
                })
            }
            OperationKind::Union => OperationSpec::Union,
            OperationKind::Difference => OperationSpec::Difference,
        };

        Ok(Operation { spec, layers })
    }
}

fn validate_layers(
    kind: OperationKind,
    layers: &[String],
    available: &[String],
) -> Result<Vec<String>> {
    if layers.is_empty() {
        return Err(GeoError::invalid(format!("{kind} requires at least one layer")));
    }
    let mut out = Vec::with_capacity(layers.len());
    for layer in layers {
        let name = layer.trim();
        if name.is_empty() {
            return Err(GeoError::invalid("layer names must not be empty"));
        }
        if !available.iter().any(|a| a == name) {
            return Err(GeoError::invalid(format!(
                "unknown layer `{name}` (available: {})",
                if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                }
            )));
        }
        out.push(name.to_string());
    }
    Ok(out)
}

/// Parameters keyed by canonical spelling (`min_area` and `minArea` both land
/// on `minArea`). JSON `null` counts as absent.
struct Params<'a> {
    values: Vec<(&'static str, &'a Value)>,
}

impl<'a> Params<'a> {
    fn collect(kind: OperationKind, raw: &'a Map<String, Value>) -> Result<Self> {
        let allowed = kind.allowed_parameters();
        let mut values = Vec::new();
        for (key, value) in raw {
            if value.is_null() {
                continue;
            }
            let folded = fold_key(key);
            let Some(canonical) = allowed.iter().find(|a| fold_key(a) == folded) else {
                return Err(GeoError::invalid(format!(
                    "{kind} does not accept parameter `{key}`{}",
                    if allowed.is_empty() {
                        String::new()
                    } else {
                        format!(" (accepted: {})", allowed.join(", "))
                    }
                )));
            };
            if values.iter().any(|(k, _)| k == canonical) {
                return Err(GeoError::invalid(format!(
                    "parameter `{canonical}` given more than once"
                )));
            }
            values.push((*canonical, value));
        }
        Ok(Self { values })
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.values.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    fn required_number(&self, kind: OperationKind, key: &str) -> Result<f64> {
        let value = self
            .get(key)
            .ok_or_else(|| GeoError::invalid(format!("{kind} requires `{key}`")))?;
        let n = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
            _ => None,
        };
        match n {
            Some(n) if n.is_finite() => Ok(n),
            _ => Err(GeoError::invalid(format!(
                "`{key}` must be a finite number (got {value})"
            ))),
        }
    }

    fn optional_str(&self, key: &str) -> Result<Option<&'a str>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) if !s.trim().is_empty() => Ok(Some(s.trim())),
            Some(other) => Err(GeoError::invalid(format!(
                "`{key}` must be a non-empty string (got {other})"
            ))),
        }
    }

    fn linear_units(&self) -> Result<LinearUnit> {
        self.optional_str("units")?
            .map(LinearUnit::parse)
            .unwrap_or(Ok(LinearUnit::default()))
    }

    fn area_units(&self) -> Result<AreaUnit> {
        self.optional_str("units")?
            .map(AreaUnit::parse)
            .unwrap_or(Ok(AreaUnit::default()))
    }

    fn target(&self, kind: OperationKind) -> Result<TargetRef> {
        let layer = self.optional_str("targetLayer")?.map(str::to_string);
        if let Some(value) = self.get("targetGeometry") {
            // Oracles sometimes put a place name where geometry belongs.
            if let Value::String(name) = value {
                return named(name, layer);
            }
            return Ok(TargetRef::Geometry(feature_from_json_value(value)?));
        }
        if let Some(name) = self.optional_str("target")? {
            return named(name, layer);
        }
        if let Some(name) = self.optional_str("location")? {
            return named(name, layer);
        }
        Err(GeoError::invalid(format!(
            "{kind} requires `targetGeometry` or a place name in `target`/`location`"
        )))
    }
}

fn named(name: &str, layer: Option<String>) -> Result<TargetRef> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GeoError::invalid("target name must not be empty"));
    }
    Ok(TargetRef::Named {
        name: name.to_string(),
        layer,
    })
}

fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
