//! Sankey figure construction and HTML serialization.
//!
//! The figure is assembled as Plotly.js JSON and embedded in a fragment that loads the
//! Plotly bundle and calls `Plotly.newPlot` on a freshly generated `<div>`.

use rand::Rng;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::{error::SankeyError, models::SankeyGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Margin {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkColor {
    Fixed(String),
    RandomPerLink { alpha: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SankeyStyle {
    pub node_pad: f64,
    pub node_thickness: f64,
    pub node_line_color: String,
    pub node_line_width: f64,
    pub node_color: Option<String>,
    pub title: String,
    pub title_font_size: u32,
    pub font_size: Option<u32>,
    pub margin: Option<Margin>,
    pub height: u32,
    pub width: u32,
    pub link_color: LinkColor,
}

impl SankeyStyle {
    /// Large layout used by the full-page overview.
    pub fn overview() -> Self {
        Self {
            node_pad: 30.0,
            node_thickness: 25.0,
            node_line_color: "blue".to_string(),
            node_line_width: 2.0,
            node_color: None,
            title: "Enhanced User Flow Sankey Diagram".to_string(),
            title_font_size: 20,
            font_size: Some(15),
            margin: Some(Margin {
                left: 75,
                right: 100,
                top: 220,
                bottom: 200,
            }),
            height: 830,
            width: 1600,
            link_color: LinkColor::RandomPerLink { alpha: 0.5 },
        }
    }

    /// Compact layout for the transitions leaving one screen.
    pub fn from_source(source: &str) -> Self {
        Self {
            node_pad: 15.0,
            node_thickness: 15.0,
            node_line_color: "black".to_string(),
            node_line_width: 0.5,
            node_color: Some("lightblue".to_string()),
            title: format!("Sankey Diagram from Source: {source}"),
            title_font_size: 24,
            font_size: None,
            margin: None,
            height: 600,
            width: 1000,
            link_color: LinkColor::Fixed("rgba(0,100,255,0.6)".to_string()),
        }
    }
}

pub fn build_figure<R: Rng + ?Sized>(
    graph: &SankeyGraph,
    style: &SankeyStyle,
    rng: &mut R,
) -> Result<Value, SankeyError> {
    let node_count = graph.nodes.len();
    if let Some(link) = graph
        .links
        .iter()
        .find(|l| l.source >= node_count || l.target >= node_count)
    {
        return Err(SankeyError::Render(format!(
            "Link {} -> {} references a node outside 0..{node_count}",
            link.source, link.target
        )));
    }

    let mut node = json!({
        "pad": style.node_pad,
        "thickness": style.node_thickness,
        "line": { "color": style.node_line_color, "width": style.node_line_width },
        "label": graph.nodes,
    });
    if let Some(color) = &style.node_color {
        node["color"] = json!(color);
    }

    let link_color = match &style.link_color {
        LinkColor::Fixed(color) => json!(color),
        LinkColor::RandomPerLink { alpha } => json!(graph
            .links
            .iter()
            .map(|_| random_rgba(&mut *rng, *alpha))
            .collect::<Vec<_>>()),
    };

    let link = json!({
        "source": graph.links.iter().map(|l| l.source).collect::<Vec<_>>(),
        "target": graph.links.iter().map(|l| l.target).collect::<Vec<_>>(),
        "value": graph.links.iter().map(|l| l.value).collect::<Vec<_>>(),
        "color": link_color,
    });

    let mut layout = json!({
        "title": { "text": style.title, "font": { "size": style.title_font_size } },
        "height": style.height,
        "width": style.width,
    });
    if let Some(size) = style.font_size {
        layout["font"] = json!({ "size": size });
    }
    if let Some(m) = style.margin {
        layout["margin"] = json!({ "l": m.left, "r": m.right, "t": m.top, "b": m.bottom });
    }

    Ok(json!({
        "data": [{ "type": "sankey", "node": node, "link": link }],
        "layout": layout,
    }))
}

/// Renders the chart as an embeddable fragment (no `<html>`/`<body>`).
pub fn render_fragment<R: Rng + ?Sized>(
    graph: &SankeyGraph,
    style: &SankeyStyle,
    plotly_js_url: &str,
    rng: &mut R,
) -> Result<String, SankeyError> {
    let figure = build_figure(graph, style, rng)?;
    let div_id = Uuid::new_v4().to_string();
    let data = script_safe_json(&figure["data"])?;
    let layout = script_safe_json(&figure["layout"])?;

    Ok(format!(
        r#"<div>
<script src="{src}" charset="utf-8"></script>
<div id="{div_id}" class="plotly-graph-div" style="height:{height}px; width:{width}px;"></div>
<script type="text/javascript">
window.PLOTLYENV = window.PLOTLYENV || {{}};
if (document.getElementById("{div_id}")) {{
    Plotly.newPlot("{div_id}", {data}, {layout}, {{"responsive": true}});
}}
</script>
</div>"#,
        src = html_escape(plotly_js_url),
        height = style.height,
        width = style.width,
    ))
}

pub fn wrap_page(fragment: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Sankey Chart</title>
</head>
<body>
{fragment}
</body>
</html>"#
    )
}

/// Quotes are left alone so warehouse messages come through verbatim.
pub fn error_fragment(message: &str) -> String {
    format!("<h1>Error: {}</h1>", escape_text(message))
}

fn random_rgba<R: Rng + ?Sized>(rng: &mut R, alpha: f32) -> String {
    format!(
        "rgba({},{},{},{alpha})",
        rng.gen::<u8>(),
        rng.gen::<u8>(),
        rng.gen::<u8>()
    )
}

// `</` would close the inline script early and `<!--` switches the parser into its
// escaped-comment states; both stay valid JSON once escaped.
fn script_safe_json(value: &Value) -> Result<String, SankeyError> {
    serde_json::to_string(value)
        .map(|s| s.replace("<!--", "<\\u0021--").replace("</", "<\\/"))
        .map_err(|err| SankeyError::Render(format!("Failed to encode figure: {err}")))
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn html_escape(s: &str) -> String {
    escape_text(s)
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::{
        models::{SankeyLink, TransitionRow},
        transform::build_sankey_graph,
    };

    const PLOTLY: &str = "https://cdn.example.test/plotly.min.js";

    fn sample_graph() -> SankeyGraph {
        build_sankey_graph(&[
            TransitionRow::new("Home", "Settings", 10),
            TransitionRow::new("Settings", "Home", 5),
            TransitionRow::new("Home", "Profile", 3),
        ])
    }

    #[test]
    fn overview_figure_carries_layout_and_one_color_per_link() {
        let mut rng = StdRng::seed_from_u64(7);
        let figure = build_figure(&sample_graph(), &SankeyStyle::overview(), &mut rng)
            .expect("figure");

        let trace = &figure["data"][0];
        assert_eq!(trace["type"], "sankey");
        assert_eq!(trace["node"]["pad"], 30.0);
        assert_eq!(trace["node"]["line"]["color"], "blue");
        assert_eq!(trace["link"]["value"], json!([10, 5, 3]));
        assert_eq!(trace["link"]["source"], json!([0, 1, 0]));
        assert_eq!(trace["link"]["target"], json!([1, 0, 2]));

        let colors = trace["link"]["color"].as_array().expect("color array");
        assert_eq!(colors.len(), 3);
        assert!(colors.iter().all(|c| {
            let c = c.as_str().unwrap_or_default();
            c.starts_with("rgba(") && c.ends_with(",0.5)")
        }));

        let layout = &figure["layout"];
        assert_eq!(layout["margin"], json!({ "l": 75, "r": 100, "t": 220, "b": 200 }));
        assert_eq!(layout["height"], 830);
        assert_eq!(layout["width"], 1600);
        assert_eq!(layout["font"]["size"], 15);
        assert_eq!(layout["title"]["font"]["size"], 20);
    }

    #[test]
    fn source_figure_uses_fixed_link_color_and_node_fill() {
        let mut rng = StdRng::seed_from_u64(7);
        let figure = build_figure(&sample_graph(), &SankeyStyle::from_source("Home"), &mut rng)
            .expect("figure");

        let trace = &figure["data"][0];
        assert_eq!(trace["link"]["color"], "rgba(0,100,255,0.6)");
        assert_eq!(trace["node"]["color"], "lightblue");
        assert_eq!(
            figure["layout"]["title"]["text"],
            "Sankey Diagram from Source: Home"
        );
        assert!(figure["layout"].get("margin").is_none());
    }

    #[test]
    fn out_of_range_link_is_a_render_error() {
        let graph = SankeyGraph {
            nodes: vec!["Home".to_string()],
            links: vec![SankeyLink {
                source: 0,
                target: 1,
                value: 4,
            }],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let err = build_figure(&graph, &SankeyStyle::overview(), &mut rng).unwrap_err();
        assert!(matches!(err, SankeyError::Render(_)));
    }

    #[test]
    fn empty_graph_renders_an_empty_chart() {
        let mut rng = StdRng::seed_from_u64(1);
        let html = render_fragment(
            &SankeyGraph::default(),
            &SankeyStyle::from_source("Nowhere"),
            PLOTLY,
            &mut rng,
        )
        .expect("fragment");
        assert!(html.contains("Plotly.newPlot"));
        assert!(html.contains(r#""label":[]"#));
        assert!(!html.contains("<html"));
    }

    #[test]
    fn labels_cannot_break_out_of_the_script_block() {
        let graph = build_sankey_graph(&[TransitionRow::new("</script><b>x", "Home", 1)]);
        let mut rng = StdRng::seed_from_u64(1);
        let html =
            render_fragment(&graph, &SankeyStyle::overview(), PLOTLY, &mut rng).expect("fragment");
        assert_eq!(html.matches("</script>").count(), 2);
        assert!(html.contains(r"<\/script><b>x"));
    }

    #[test]
    fn page_shell_wraps_fragment() {
        let page = wrap_page("<div>chart</div>");
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<title>Sankey Chart</title>"));
        assert!(page.contains("<body>\n<div>chart</div>\n</body>"));
    }

    #[test]
    fn error_fragment_escapes_markup() {
        assert_eq!(
            error_fragment("table not found"),
            "<h1>Error: table not found</h1>"
        );
        assert_eq!(error_fragment("a<b"), "<h1>Error: a&lt;b</h1>");
    }

    #[test]
    fn error_fragment_keeps_quotes_verbatim() {
        let message = r#"Syntax error: Unclosed string literal '"Home at [3:7]"#;
        assert_eq!(error_fragment(message), format!("<h1>Error: {message}</h1>"));
    }

    #[test]
    fn comment_openers_in_labels_are_escaped() {
        let graph = build_sankey_graph(&[TransitionRow::new("<!--<script>", "Home", 1)]);
        let mut rng = StdRng::seed_from_u64(1);
        let html =
            render_fragment(&graph, &SankeyStyle::overview(), PLOTLY, &mut rng).expect("fragment");
        assert!(!html.contains("<!--"));
        assert!(html.contains(r"<\u0021--<script>"));

        let mut rng = StdRng::seed_from_u64(1);
        let figure = build_figure(&graph, &SankeyStyle::overview(), &mut rng).expect("figure");
        let encoded = script_safe_json(&figure["data"]).expect("encode");
        let decoded: Value = serde_json::from_str(&encoded).expect("valid json");
        assert_eq!(decoded[0]["node"]["label"][0], "<!--<script>");
    }
}
