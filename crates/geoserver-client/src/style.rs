//! SLD generation from raster classifications.
//!
//! Upload clients send the classification as JSON. Two shapes are accepted:
//! an object with a `classes` array, or the array itself. Each class needs
//! an upper bound (`max`) and a colour; `min` and `label` are optional.
//!
//! ```json
//! {"classes": [{"min": 0, "max": 1.5, "color": "#ffffcc", "label": "Low"}, ...]}
//! ```

use serde::Deserialize;

/// One interval of a classification.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassBreak {
    #[serde(default)]
    pub min: Option<f64>,
    pub max: f64,
    pub color: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassificationShape {
    Wrapped { classes: Vec<ClassBreak> },
    Bare(Vec<ClassBreak>),
}

/// Extract valid class breaks, sorted by upper bound.
///
/// Returns `None` when the value does not describe any usable class, in
/// which case the layer keeps the server's default raster style.
pub fn parse_classification(value: &serde_json::Value) -> Option<Vec<ClassBreak>> {
    let shape: ClassificationShape = serde_json::from_value(value.clone()).ok()?;
    let mut classes = match shape {
        ClassificationShape::Wrapped { classes } => classes,
        ClassificationShape::Bare(classes) => classes,
    };

    classes.retain(|c| c.max.is_finite() && is_hex_color(&c.color));
    if classes.is_empty() {
        return None;
    }
    classes.sort_by(|a, b| a.max.total_cmp(&b.max));
    Some(classes)
}

/// Style name used for a layer's generated SLD.
pub fn style_name(external_name: &str) -> String {
    format!("{}_style", external_name)
}

/// Build an SLD 1.0 document with an intervals colour map.
pub fn build_raster_sld(style: &str, classes: &[ClassBreak]) -> String {
    let mut entries = String::new();

    // Values below the first class bound are transparent.
    if let Some(first_min) = classes.first().and_then(|c| c.min) {
        entries.push_str(&format!(
            "            <ColorMapEntry color=\"#000000\" quantity=\"{}\" opacity=\"0\"/>\n",
            first_min
        ));
    }

    for class in classes {
        let label = class
            .label
            .as_deref()
            .map(|l| format!(" label=\"{}\"", xml_escape(l)))
            .unwrap_or_default();
        entries.push_str(&format!(
            "            <ColorMapEntry color=\"{}\" quantity=\"{}\"{}/>\n",
            class.color.to_lowercase(),
            class.max,
            label
        ));
    }

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<StyledLayerDescriptor version="1.0.0"
    xmlns="http://www.opengis.net/sld"
    xmlns:ogc="http://www.opengis.net/ogc"
    xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance"
    xsi:schemaLocation="http://www.opengis.net/sld StyledLayerDescriptor.xsd">
  <NamedLayer>
    <Name>{name}</Name>
    <UserStyle>
      <Title>{name}</Title>
      <FeatureTypeStyle>
        <Rule>
          <RasterSymbolizer>
            <ColorMap type="intervals">
{entries}            </ColorMap>
          </RasterSymbolizer>
        </Rule>
      </FeatureTypeStyle>
    </UserStyle>
  </NamedLayer>
</StyledLayerDescriptor>
"#,
        name = xml_escape(style),
        entries = entries
    )
}

fn is_hex_color(color: &str) -> bool {
    color
        .strip_prefix('#')
        .is_some_and(|hex| matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_wrapped_and_bare() {
        let wrapped = json!({"classes": [{"max": 2.0, "color": "#ff0000"}, {"max": 1.0, "color": "#00ff00"}]});
        let classes = parse_classification(&wrapped).unwrap();
        assert_eq!(classes[0].max, 1.0);
        assert_eq!(classes[1].max, 2.0);

        let bare = json!([{"min": 0, "max": 5, "color": "#abc", "label": "Low"}]);
        let classes = parse_classification(&bare).unwrap();
        assert_eq!(classes[0].label.as_deref(), Some("Low"));
    }

    #[test]
    fn test_parse_rejects_unusable() {
        assert!(parse_classification(&json!({"method": "quantile"})).is_none());
        assert!(parse_classification(&json!([{"max": 1.0, "color": "red"}])).is_none());
        assert!(parse_classification(&json!([])).is_none());
    }

    #[test]
    fn test_build_sld() {
        let classes = vec![
            ClassBreak { min: Some(0.0), max: 1.5, color: "#FFFFCC".into(), label: Some("Low & dry".into()) },
            ClassBreak { min: Some(1.5), max: 3.0, color: "#800026".into(), label: None },
        ];
        let sld = build_raster_sld("laos_temp_rcp45_style", &classes);
        assert!(sld.contains("<Name>laos_temp_rcp45_style</Name>"));
        assert!(sld.contains(r##"<ColorMapEntry color="#000000" quantity="0" opacity="0"/>"##));
        assert!(sld.contains(r##"color="#ffffcc" quantity="1.5" label="Low &amp; dry""##));
        assert!(sld.contains(r##"color="#800026" quantity="3"/>"##));
    }
}
