//! HTML rendering for the single-page form

use agronomicare::dataset::is_healthy_class;
use agronomicare::utils::format_score;

use crate::state::{Diagnosis, ExampleImage};

pub const MAIN_BACKGROUND: &str = "#EBEBEB";
pub const SIDEBAR_BACKGROUND: &str = "#edffcc";

/// Pixels per text line in the remedy boxes
const LINE_HEIGHT_PX: usize = 20;
const MIN_LINES: usize = 3;

pub const DISCLAIMER: &str = "Please note that Agronomicare can make mistakes. \
It's good practice to take photos from different angles and consult with your local dealer \
or botanist to get a reliable prediction.";

const DESCRIPTION: &str = "Using Agronomicare is really easy. To diagnose your crops, \
please take or upload a photo of a leaf of the plant according to the instructions on the left. \
Agronomicare will then use the power of neural networks to tell if the crop is healthy or not. \
If the crop is suffering from a disease, it will automatically suggest natural remedies and \
chemical pesticides.";

/// Escape text for HTML element content and attribute values
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Height of a remedy box: one line per text line, never fewer than three
pub fn text_area_height(text: &str) -> usize {
    let lines = text.matches('\n').count() + 1;
    lines.max(MIN_LINES) * LINE_HEIGHT_PX
}

fn style_block() -> String {
    format!(
        r#"<style>
body {{ background-color: {main}; font-family: sans-serif; margin: 0; display: flex; }}
.sidebar {{ background-color: {sidebar}; width: 220px; min-height: 100vh; padding: 1rem; }}
.sidebar figure {{ margin: 0 0 1rem 0; }}
.sidebar figcaption {{ font-size: 0.8rem; }}
main {{ flex: 1; padding: 1rem 3rem; max-width: 760px; }}
h1 {{ text-align: center; color: black; }}
textarea {{ width: 100%; resize: vertical; }}
.error {{ color: #a00000; }}
</style>"#,
        main = MAIN_BACKGROUND,
        sidebar = SIDEBAR_BACKGROUND
    )
}

fn sidebar(examples: &[ExampleImage]) -> String {
    let mut html = String::from("<aside class=\"sidebar\">\n<h2>How to: </h2>\n");
    for example in examples {
        html.push_str(&format!(
            "<figure><img src=\"{}\" width=\"144\" alt=\"{caption}\"><figcaption>{caption}</figcaption></figure>\n",
            escape_html(&example.url),
            caption = escape_html(&example.caption)
        ));
    }
    html.push_str("</aside>\n");
    html
}

fn upload_form() -> &'static str {
    r#"<form action="/diagnose" method="post" enctype="multipart/form-data">
<label for="file">Upload Image</label>
<input type="file" id="file" name="file" accept=".jpg,.jpeg,.png" required>
<button type="submit">Diagnose</button>
</form>
"#
}

fn page(examples: &[ExampleImage], content: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>Agronomicare</title>\n{style}\n</head>\n<body>\n{sidebar}<main>\n<h1>Agronomicare 🍃</h1>\n<h2>Welcome to Agronomicare, your one-stop crop diagnosis and remedy recommender.</h2>\n<p>{description}</p>\n{form}{content}</main>\n</body>\n</html>\n",
        style = style_block(),
        sidebar = sidebar(examples),
        description = DESCRIPTION,
        form = upload_form(),
        content = content
    )
}

fn disclaimer() -> String {
    format!("<hr>\n<p class=\"disclaimer\"><em>{}</em></p>\n", DISCLAIMER)
}

fn remedy_block(heading: &str, text: Option<&str>) -> String {
    let text = text.unwrap_or("");
    format!(
        "<h2 style='font-weight: bold;'>{}</h2>\n<textarea readonly style=\"height: {}px\">{}</textarea>\n",
        heading,
        text_area_height(text),
        escape_html(text)
    )
}

/// The empty form
pub fn index_page(examples: &[ExampleImage]) -> String {
    page(examples, "")
}

/// The form followed by a diagnosis
pub fn result_page(examples: &[ExampleImage], diagnosis: &Diagnosis) -> String {
    let prediction = &diagnosis.prediction;
    let class_name = escape_html(&prediction.class_name);

    let mut content = format!(
        "<section class=\"result\">\n<h2>{}</h2>\n<h3>score: {}</h3>\n",
        class_name,
        format_score(prediction.confidence)
    );

    if is_healthy_class(&prediction.class_name) {
        content.push_str("<p>Congratulations, your crop seems to be healthy!</p>\n");
        content.push_str("<p>There is no need for any remedy or pesticide.</p>\n");
        content.push_str("<p>Happy farming 🚜</p>\n");
    } else {
        content.push_str(&format!("<p>Your crop seems to be suffering from {}</p>\n", class_name));
        content.push_str(&remedy_block(
            "Natural Remedy Recommendation:",
            diagnosis.natural_remedy.as_deref(),
        ));
        content.push_str(&remedy_block(
            "Chemical Remedy Recommendation:",
            diagnosis.chemical_remedy.as_deref(),
        ));
    }

    content.push_str(&disclaimer());
    content.push_str("</section>\n");
    page(examples, &content)
}

/// The form with a short error message
pub fn error_page(examples: &[ExampleImage], message: &str) -> String {
    page(
        examples,
        &format!("<p class=\"error\">{}</p>\n", escape_html(message)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use agronomicare::inference::PredictionResult;

    fn diagnosis(class_name: &str, confidence: f32, natural: Option<&str>) -> Diagnosis {
        Diagnosis {
            prediction: PredictionResult {
                class_index: 0,
                class_name: class_name.to_string(),
                confidence,
            },
            natural_remedy: natural.map(str::to_string),
            chemical_remedy: Some("Copper fungicide".to_string()),
        }
    }

    #[test]
    fn test_text_area_height() {
        assert_eq!(text_area_height(""), 60);
        assert_eq!(text_area_height("one line"), 60);
        assert_eq!(text_area_height("a\nb\nc\nd"), 80);
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>\"x\" & 'y'</b>"), "&lt;b&gt;&quot;x&quot; &amp; &#39;y&#39;&lt;/b&gt;");
    }

    #[test]
    fn test_index_has_form_and_colors() {
        let html = index_page(&[ExampleImage {
            url: "/images/leaf.jpg".to_string(),
            caption: "uniform background, good focus".to_string(),
        }]);
        assert!(html.contains("enctype=\"multipart/form-data\""));
        assert!(html.contains("name=\"file\""));
        assert!(html.contains(MAIN_BACKGROUND));
        assert!(html.contains(SIDEBAR_BACKGROUND));
        assert!(html.contains("/images/leaf.jpg"));
        assert!(!html.contains(DISCLAIMER));
    }

    #[test]
    fn test_healthy_result_has_no_remedies() {
        let html = result_page(&[], &diagnosis("healthy", 0.98765, Some("unused")));
        assert!(html.contains("<h2>healthy</h2>"));
        assert!(html.contains("score: 98.7%"));
        assert!(html.contains("Congratulations, your crop seems to be healthy!"));
        assert!(!html.contains("Natural Remedy Recommendation"));
        assert!(html.contains(DISCLAIMER));
    }

    #[test]
    fn test_disease_result_shows_both_remedies() {
        let html = result_page(&[], &diagnosis("blast", 0.8, Some("Neem oil\nSilicon\nBurn stubble\nRotate")));
        assert!(html.contains("Your crop seems to be suffering from blast"));
        assert!(html.contains("Natural Remedy Recommendation:"));
        assert!(html.contains("Chemical Remedy Recommendation:"));
        assert!(html.contains("height: 80px"));
        assert!(html.contains("Copper fungicide"));
        assert!(html.contains("score: 80.0%"));
        assert!(html.contains(DISCLAIMER));
    }

    #[test]
    fn test_missing_remedy_renders_empty_block() {
        let html = result_page(&[], &diagnosis("tungro", 0.5, None));
        assert!(html.contains("<textarea readonly style=\"height: 60px\"></textarea>"));
    }
}
