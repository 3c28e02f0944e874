//! Result page shown after a reflow run

use crate::render::html::escape_html;
use std::fmt::Write;

const PAGE_STYLE: &str = "body { font-family: 'Helvetica Neue', Arial, sans-serif; line-height: 1.6; background-color: #f4f4f9; }
.container { max-width: 960px; margin: 2em auto; padding: 2em; background: white; border-radius: 8px; }
.content-box { border: 1px solid #ddd; padding: 1em; margin-top: 1em; max-height: 400px; overflow-y: auto; font-family: monospace; white-space: pre-wrap; }
.styled-content-box { border: 1px solid #ddd; padding: 1em; margin-top: 1em; max-height: 400px; overflow-y: auto; }
details { border: 1px solid #ccc; border-radius: 5px; padding: 0.5em; margin-bottom: 0.5em; }
summary { font-weight: bold; cursor: pointer; }
.info, .download-section, .failure { padding: 1em; border-radius: 8px; margin-bottom: 1.5em; }
.info, .download-section { background: #eef; }
.failure { background: #fee; color: #900; }
.image-gallery { display: flex; flex-wrap: wrap; gap: 15px; }
.image-gallery img { border: 2px solid #ddd; border-radius: 5px; max-width: 150px; }";

/// Everything the result page displays; text fields are raw and get escaped here
pub struct ResultPage<'a> {
    pub source_name: &'a str,
    pub run_dir: &'a str,
    /// Already-escaped preview fragment from the HTML renderer
    pub preview_html: &'a str,
    pub neo: &'a str,
    pub og: &'a str,
    pub sorted: &'a str,
    /// `/outputs/...` URLs of extracted images
    pub image_urls: &'a [String],
    /// `/outputs/...` URL of the recreated PDF, when rendering succeeded
    pub recreated_pdf_url: Option<&'a str>,
    pub render_error: Option<&'a str>,
}

impl ResultPage<'_> {
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        let _ = write!(
            html,
            "<!doctype html>\n<html lang=\"ja\">\n<head>\n<meta charset=\"UTF-8\">\n<title>Reflow result</title>\n<style>\n{}\n</style>\n</head>\n<body>\n<div class=\"container\">\n<h2>Reflow complete</h2>\n",
            PAGE_STYLE
        );
        let _ = write!(
            html,
            "<div class=\"info\"><p><strong>Source:</strong> {}</p><p><strong>Output folder:</strong> {}</p></div>\n",
            escape_html(self.source_name),
            escape_html(self.run_dir)
        );

        match self.recreated_pdf_url {
            Some(url) => {
                let _ = write!(
                    html,
                    "<div class=\"download-section\"><h3>Recreated PDF</h3><a href=\"{}\" download>Download</a></div>\n",
                    escape_html(url)
                );
            }
            None => {
                let _ = write!(
                    html,
                    "<div class=\"failure\"><p>PDF reconstruction failed{}</p></div>\n",
                    self.render_error
                        .map(|e| format!(": {}", escape_html(e)))
                        .unwrap_or_default()
                );
            }
        }

        let _ = write!(
            html,
            "<details><summary>Styled NEO preview</summary><div class=\"styled-content-box\">{}</div></details>\n",
            self.preview_html
        );
        for (title, text) in [
            ("NEO text", self.neo),
            ("OG text", self.og),
            ("Reading order", self.sorted),
        ] {
            let _ = write!(
                html,
                "<details><summary>{}</summary><div class=\"content-box\">{}</div></details>\n",
                title,
                escape_html(text)
            );
        }

        let gallery = if self.image_urls.is_empty() {
            "<p>No images were extracted.</p>".to_string()
        } else {
            self.image_urls
                .iter()
                .map(|url| {
                    let url = escape_html(url);
                    format!(
                        "<a href=\"{}\" target=\"_blank\"><img src=\"{}\" alt=\"image\"></a>",
                        url, url
                    )
                })
                .collect()
        };
        let _ = write!(
            html,
            "<details open><summary>Extracted images ({})</summary><div class=\"image-gallery\">{}</div></details>\n</div>\n</body>\n</html>\n",
            self.image_urls.len(),
            gallery
        );

        html
    }
}
