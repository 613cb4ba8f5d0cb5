//! MapLibre style generation.
//!
//! The style is derived from the selection itself: each `(band, provenance)`
//! pair gets layers that are visible exactly at the zooms it was assigned,
//! so no assigned zoom renders empty and fallback data can be drawn
//! differently from native data.
//!
//! Template layers (those with a `source-layer` but no `source`) are expanded
//! once per zoom run; every other template layer is copied as is.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use enc_common::{UsageBand, ZoomLevel, ZoomRange};

use crate::assembler::{BAND_PROPERTY, PROVENANCE_PROPERTY};
use crate::selector::Selection;

/// Knobs for style generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleOptions {
    /// Style name, also used as the style file stem
    pub name: String,
    /// Vector source id the generated layers read from
    pub source_name: String,
    /// Background colour as RGBA components in `[0, 1]`
    pub background: [f64; 4],
    /// Opacity applied to fallback layers; `None` leaves them as native
    pub fallback_opacity: Option<f64>,
}

impl Default for StyleOptions {
    fn default() -> Self {
        Self {
            name: "enc".to_string(),
            source_name: "enc".to_string(),
            background: [0.843, 0.827, 1.0, 1.0],
            fallback_opacity: Some(0.6),
        }
    }
}

/// A MapLibre style document (version 8).
///
/// Unknown top-level keys of a template (glyphs, sprite, ...) are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleDocument {
    pub version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub sources: Map<String, Value>,
    #[serde(default)]
    pub layers: Vec<Value>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl StyleDocument {
    pub fn layer(&self, id: &str) -> Option<&Value> {
        self.layers.iter().find(|l| l["id"] == id)
    }
}

/// Zooms over which one `(band, provenance)` pair is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StyleRun {
    pub band: UsageBand,
    pub provenance: &'static str,
    pub zooms: ZoomRange,
    /// Run reaches the deepest zoom of the selection and stays visible when
    /// overzoomed.
    pub open_ended: bool,
}

impl StyleRun {
    /// MapLibre `maxzoom` is exclusive; `None` for open-ended runs.
    pub fn maxzoom(&self) -> Option<u16> {
        (!self.open_ended).then(|| u16::from(self.zooms.max) + 1)
    }

    fn filter(&self) -> Value {
        json!([
            "all",
            ["==", ["get", BAND_PROPERTY], self.band.as_str()],
            ["==", ["get", PROVENANCE_PROPERTY], self.provenance]
        ])
    }
}

/// Collapse the selection into contiguous zoom runs per band/provenance.
pub fn style_runs(selection: &Selection) -> Vec<StyleRun> {
    let deepest = selection.zoom_levels().max();
    let mut zooms: BTreeMap<(UsageBand, &'static str), BTreeSet<ZoomLevel>> = BTreeMap::new();
    for assignment in selection.assignments() {
        for region in &assignment.regions {
            zooms
                .entry((region.band, region.provenance.kind()))
                .or_default()
                .insert(assignment.zoom);
        }
    }

    zooms
        .into_iter()
        .flat_map(|((band, provenance), levels)| {
            let levels: Vec<ZoomLevel> = levels.into_iter().collect();
            ZoomRange::runs(&levels)
                .into_iter()
                .map(move |zooms| StyleRun {
                    band,
                    provenance,
                    zooms,
                    open_ended: Some(zooms.max) == deepest,
                })
        })
        .collect()
}

/// Built-in layers for land, depth contours and soundings.
pub fn default_template(options: &StyleOptions) -> StyleDocument {
    StyleDocument {
        version: 8,
        name: Some(options.name.clone()),
        sources: Map::new(),
        layers: vec![
            json!({
                "id": "background",
                "type": "background",
                "paint": { "background-color": rgba(options.background) }
            }),
            json!({
                "id": "land",
                "type": "fill",
                "source-layer": "LNDARE",
                "paint": { "fill-color": "rgba(250, 234, 170, 1)", "fill-outline-color": "rgba(120, 110, 80, 1)" }
            }),
            json!({
                "id": "depth-contours",
                "type": "line",
                "source-layer": "DEPCNT",
                "paint": { "line-color": "rgba(90, 120, 180, 1)", "line-width": 0.8 }
            }),
            json!({
                "id": "soundings",
                "type": "symbol",
                "source-layer": "SOUNDG",
                "layout": { "text-field": ["to-string", ["round", ["get", "DEPTH"]]], "text-size": 10 },
                "paint": { "text-color": "rgba(40, 40, 60, 1)" }
            }),
        ],
        other: Map::new(),
    }
}

/// Expand `template` against the selection.
///
/// `archive_file` is the MBTiles file name the vector source points at.
pub fn derive_style(
    selection: &Selection,
    template: &StyleDocument,
    options: &StyleOptions,
    archive_file: &str,
) -> StyleDocument {
    let runs = style_runs(selection);

    let mut sources = template.sources.clone();
    sources.insert(
        options.source_name.clone(),
        json!({ "type": "vector", "url": format!("mbtiles://{}", archive_file) }),
    );

    let mut layers = Vec::new();
    for layer in &template.layers {
        if !is_template_layer(layer) {
            let mut layer = layer.clone();
            if layer["type"] == "background" {
                layer["paint"]["background-color"] = json!(rgba(options.background));
            }
            layers.push(layer);
            continue;
        }
        for run in &runs {
            layers.push(expand_layer(layer, run, options));
        }
    }

    StyleDocument {
        version: 8,
        name: Some(options.name.clone()),
        sources,
        layers,
        other: template.other.clone(),
    }
}

fn is_template_layer(layer: &Value) -> bool {
    layer.get("source-layer").is_some() && layer.get("source").is_none()
}

fn expand_layer(layer: &Value, run: &StyleRun, options: &StyleOptions) -> Value {
    let mut out = layer.clone();
    let id = layer["id"].as_str().unwrap_or("layer");
    out["id"] = json!(format!(
        "{}-{}-{}-z{}",
        id,
        run.band.as_str(),
        run.provenance,
        run.zooms.min
    ));
    out["source"] = json!(options.source_name);
    out["minzoom"] = json!(run.zooms.min);
    match run.maxzoom() {
        Some(maxzoom) => out["maxzoom"] = json!(maxzoom),
        None => {
            if let Some(fields) = out.as_object_mut() {
                fields.remove("maxzoom");
            }
        }
    }
    out["filter"] = match layer.get("filter") {
        Some(existing) => json!(["all", existing, run.filter()]),
        None => run.filter(),
    };

    if run.provenance == "fallback" {
        if let Some(opacity) = options.fallback_opacity {
            apply_opacity(&mut out, opacity);
        }
    }
    out
}

fn apply_opacity(layer: &mut Value, opacity: f64) {
    let keys: &[&str] = match layer["type"].as_str() {
        Some("fill") => &["fill-opacity"],
        Some("line") => &["line-opacity"],
        Some("circle") => &["circle-opacity"],
        Some("fill-extrusion") => &["fill-extrusion-opacity"],
        Some("symbol") => &["text-opacity", "icon-opacity"],
        _ => &[],
    };
    if keys.is_empty() {
        return;
    }
    if !layer["paint"].is_object() {
        layer["paint"] = json!({});
    }
    for key in keys {
        layer["paint"][*key] = json!(opacity);
    }
}

/// CSS colour string for RGBA components in `[0, 1]`.
pub fn rgba(color: [f64; 4]) -> String {
    let channel = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!(
        "rgba({}, {}, {}, {})",
        channel(color[0]),
        channel(color[1]),
        channel(color[2]),
        color[3].clamp(0.0, 1.0)
    )
}

/// `tileserver-gl` configuration serving the archive and the style.
pub fn tileserver_config(options: &StyleOptions, archive_file: &str) -> Value {
    json!({
        "options": {
            "paths": { "root": "", "mbtiles": ".", "styles": "styles" }
        },
        "data": {
            options.source_name.clone(): { "mbtiles": archive_file }
        },
        "styles": {
            options.name.clone(): {
                "style": format!("{}.json", options.name),
                "serve_data": true
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::resolve_coverage;
    use crate::selector::BandSelector;
    use crate::zoom_bands::ZoomBandMap;
    use enc_common::{BoundingBox, ChartCell};
    use std::sync::Arc;

    #[test]
    fn test_rgba_background() {
        assert_eq!(rgba([0.843, 0.827, 1.0, 1.0]), "rgba(215, 211, 255, 1)");
    }

    #[test]
    fn test_template_detection() {
        assert!(is_template_layer(&json!({"id": "x", "source-layer": "LNDARE"})));
        assert!(!is_template_layer(&json!({"id": "x", "source-layer": "LNDARE", "source": "other"})));
        assert!(!is_template_layer(&json!({"id": "background", "type": "background"})));
    }

    #[test]
    fn test_fallback_opacity_on_symbol() {
        let run = StyleRun {
            band: UsageBand::General,
            provenance: "fallback",
            zooms: ZoomRange::new(10, 11).unwrap(),
            open_ended: false,
        };
        let layer = json!({"id": "soundings", "type": "symbol", "source-layer": "SOUNDG"});
        let out = expand_layer(&layer, &run, &StyleOptions::default());

        assert_eq!(out["id"], "soundings-general-fallback-z10");
        assert_eq!(out["minzoom"], 10);
        assert_eq!(out["maxzoom"], 12);
        assert_eq!(out["paint"]["text-opacity"], 0.6);
        assert_eq!(out["source"], "enc");
    }

    #[test]
    fn test_existing_filter_is_combined() {
        let run = StyleRun {
            band: UsageBand::Harbor,
            provenance: "native",
            zooms: ZoomRange::single(14),
            open_ended: false,
        };
        let layer = json!({"id": "land", "type": "fill", "source-layer": "LNDARE", "filter": ["has", "OBJNAM"]});
        let out = expand_layer(&layer, &run, &StyleOptions::default());
        assert_eq!(out["filter"][0], "all");
        assert_eq!(out["filter"][1], json!(["has", "OBJNAM"]));
        assert!(out["paint"].get("fill-opacity").is_none());
    }

    #[test]
    fn test_deepest_run_is_open_ended() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let cells = vec![Arc::new(ChartCell::from_bbox("US2AAA01", UsageBand::General, bbox))];
        let coverage = resolve_coverage(&bbox, &cells);
        let selection = BandSelector::new(ZoomBandMap::default()).select(&coverage);
        let options = StyleOptions::default();
        let style = derive_style(&selection, &default_template(&options), &options, "enc.mbtiles");

        let general = style.layer("land-general-native-z6").unwrap();
        assert_eq!(general["maxzoom"], 10);

        let deepest = style.layer("land-general-fallback-z10").unwrap();
        assert_eq!(deepest["minzoom"], 10);
        assert!(deepest.get("maxzoom").is_none());

        let runs = style_runs(&selection);
        assert_eq!(runs.iter().filter(|run| run.open_ended).count(), 1);
    }

    #[test]
    fn test_tileserver_config_sections() {
        let config = tileserver_config(&StyleOptions::default(), "enc.mbtiles");
        assert_eq!(config["data"]["enc"]["mbtiles"], "enc.mbtiles");
        assert_eq!(config["styles"]["enc"]["style"], "enc.json");
        assert_eq!(config["styles"]["enc"]["serve_data"], true);
    }
}
