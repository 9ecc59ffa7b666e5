use std::env;
use std::fs;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde_json::{Value, json};

use crate::config::BlogConfig;

const DEFAULT_USER_AGENT: &str = "blogtool/0.2";
const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_RETRIES: usize = 2;
const DEFAULT_RETRY_DELAY_MS: u64 = 350;

pub const DEFAULT_MAX_FETCH_BYTES: usize = 1_000_000;
pub const DEFAULT_OLLAMA_MODEL: &str = "llama3.1";
pub const OPENAI_CHAT_MODEL: &str = "gpt-4";

pub const SUMMARY_PROMPT: &str = "\
I will provide a block of text content extracted from a web page.

Please provide a **concise three-sentence summary** of the blog post:
1. The first sentence should describe the **theme** of the blog post.
2. The second sentence should explain **what the post outlines or covers**.
3. The third sentence should describe the **result or conclusion** of the blog post.

Content:
";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SummaryBackend {
    Ollama { model: String },
    OpenAi,
}

impl SummaryBackend {
    /// `openai` selects the hosted API; anything else is an Ollama model name.
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("openai") {
            return Self::OpenAi;
        }
        Self::Ollama {
            model: value.to_string(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Ollama { model } => format!("ollama ({model})"),
            Self::OpenAi => format!("openai ({OPENAI_CHAT_MODEL})"),
        }
    }
}

impl Default for SummaryBackend {
    fn default() -> Self {
        Self::Ollama {
            model: DEFAULT_OLLAMA_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub content_type: String,
    pub text: String,
}

/// Fetch a page over HTTP. Only textual content types are accepted and the
/// body is capped at `max_bytes` before it is handed to a model.
pub fn fetch_url(url: &str, max_bytes: usize) -> Result<FetchedPage> {
    let client = summary_client()?;
    let response = client
        .client
        .get(url)
        .header("User-Agent", DEFAULT_USER_AGENT)
        .header("Accept", "text/html, text/plain;q=0.9,*/*;q=0.1")
        .send()
        .with_context(|| format!("failed to fetch {url}"))?;
    let status = response.status();
    if !status.is_success() {
        bail!("HTTP {} while fetching {}", status.as_u16(), url);
    }
    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string();
    let is_text = content_type.contains("text/html")
        || content_type.contains("text/plain")
        || content_type.contains("text/markdown");
    if !is_text {
        bail!("unsupported content-type: {content_type}");
    }
    let text = response.text().context("failed to read response body")?;
    let text = if text.len() > max_bytes {
        text.chars().take(max_bytes).collect::<String>()
    } else {
        text
    };

    Ok(FetchedPage {
        url: final_url,
        content_type,
        text,
    })
}

/// Reduce an HTML page to readable text: chrome elements (script, style,
/// header, footer, nav, aside) are dropped wholesale, remaining tags are
/// stripped, common entities decoded, and blank runs collapsed.
pub fn strip_html(html: &str) -> String {
    let mut text = html.to_string();
    for tag in ["script", "style", "header", "footer", "nav", "aside"] {
        text = drop_element(&text, tag);
    }

    let mut output = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                if in_tag {
                    in_tag = false;
                    output.push(' ');
                } else {
                    output.push(ch);
                }
            }
            _ if !in_tag => output.push(ch),
            _ => {}
        }
    }

    let decoded = output
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    let mut lines = Vec::new();
    let mut blank_pending = false;
    for line in decoded.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            blank_pending = !lines.is_empty();
            continue;
        }
        if blank_pending {
            lines.push(String::new());
            blank_pending = false;
        }
        lines.push(collapse_spaces(trimmed));
    }
    lines.join("\n")
}

fn collapse_spaces(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Remove `<tag ...>...</tag>` spans, case-insensitively. Unclosed elements
/// are dropped to the end of the document, which is the safe direction for
/// chrome elements.
fn drop_element(html: &str, tag: &str) -> String {
    let lower = html.to_ascii_lowercase();
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let mut output = String::with_capacity(html.len());
    let mut cursor = 0usize;

    while let Some(found) = lower[cursor..].find(&open) {
        let start = cursor + found;
        output.push_str(&html[cursor..start]);
        match lower[start..].find(&close) {
            Some(offset) => {
                cursor = start + offset + close.len();
            }
            None => {
                return output;
            }
        }
    }
    output.push_str(&html[cursor..]);
    output
}

/// Ask the configured model for a summary of `content`. Transport errors,
/// HTTP failures, and malformed payloads surface as errors carrying the
/// backend's diagnostic; the caller decides whether the surrounding
/// operation proceeds without a summary.
pub fn summarize(backend: &SummaryBackend, config: &BlogConfig, content: &str) -> Result<String> {
    let client = summary_client()?;
    match backend {
        SummaryBackend::Ollama { model } => summarize_with_ollama(&client, config, model, content),
        SummaryBackend::OpenAi => summarize_with_openai(&client, config, content),
    }
}

fn summarize_with_ollama(
    client: &SummaryClient,
    config: &BlogConfig,
    model: &str,
    content: &str,
) -> Result<String> {
    let url = format!("{}/api/generate", config.ollama_url());
    let body = json!({
        "model": model,
        "prompt": format!("{SUMMARY_PROMPT}{content}"),
        "stream": false,
    });
    let payload = client
        .post_json(&url, None, &body)
        .with_context(|| format!("ollama request to {url} failed"))?;
    payload
        .get("response")
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("ollama response had no `response` field"))
}

fn summarize_with_openai(
    client: &SummaryClient,
    config: &BlogConfig,
    content: &str,
) -> Result<String> {
    let api_key = load_openai_api_key(config)?;
    let url = format!("{}/v1/chat/completions", config.openai_url());
    let body = json!({
        "model": OPENAI_CHAT_MODEL,
        "messages": [
            {"role": "system", "content": "Summarize the following text:"},
            {"role": "user", "content": format!("{SUMMARY_PROMPT}{content}")},
        ],
    });
    let payload = client
        .post_json(&url, Some(&api_key), &body)
        .with_context(|| format!("openai request to {url} failed"))?;
    payload
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(Value::as_str)
        .map(|text| text.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("openai response had no message content"))
}

/// Resolve the OpenAI key: OPENAI_API_KEY in the environment wins, then the
/// configured key file.
pub fn load_openai_api_key(config: &BlogConfig) -> Result<String> {
    load_openai_api_key_with_lookup(config, |key| env::var(key).ok())
}

fn load_openai_api_key_with_lookup<F>(config: &BlogConfig, lookup_env: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup_env("OPENAI_API_KEY") {
        let trimmed = value.trim().to_string();
        if !trimmed.is_empty() {
            return Ok(trimmed);
        }
    }
    let Some(key_file) = config.openai_key_file() else {
        bail!("no OpenAI API key: set OPENAI_API_KEY or [summarize] openai_key_file");
    };
    let content = fs::read_to_string(&key_file).with_context(|| {
        format!("failed to read OpenAI key file {key_file}; create it or set OPENAI_API_KEY")
    })?;
    let key = content.trim().to_string();
    if key.is_empty() {
        bail!("OpenAI key file {key_file} is empty");
    }
    Ok(key)
}

struct SummaryClient {
    client: Client,
    retries: usize,
    retry_delay_ms: u64,
}

impl SummaryClient {
    fn post_json(&self, url: &str, bearer: Option<&str>, body: &Value) -> Result<Value> {
        let mut last_error = None::<String>;
        for attempt in 0..=self.retries {
            let mut request = self
                .client
                .post(url)
                .header("User-Agent", DEFAULT_USER_AGENT)
                .json(body);
            if let Some(token) = bearer {
                request = request.header("Authorization", format!("Bearer {token}"));
            }

            match request.send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        let status = response.status();
                        let detail = response.text().unwrap_or_default();
                        last_error = Some(format!("HTTP {status}: {}", detail.trim()));
                        if attempt < self.retries {
                            sleep(Duration::from_millis(
                                self.retry_delay_ms.saturating_mul(attempt as u64 + 1),
                            ));
                            continue;
                        }
                        break;
                    }
                    return response.json().context("failed to decode model JSON response");
                }
                Err(error) => {
                    last_error = Some(error.to_string());
                    if attempt < self.retries {
                        sleep(Duration::from_millis(
                            self.retry_delay_ms.saturating_mul(attempt as u64 + 1),
                        ));
                        continue;
                    }
                }
            }
        }

        let message = last_error.unwrap_or_else(|| "model request failed".to_string());
        bail!("{message}")
    }
}

fn summary_client() -> Result<SummaryClient> {
    let timeout_ms = env::var("BLOG_HTTP_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_MS);
    let retries = env::var("BLOG_HTTP_RETRIES")
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_RETRIES);
    let retry_delay_ms = env::var("BLOG_HTTP_RETRY_DELAY_MS")
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_DELAY_MS);
    let client = Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .context("failed to build HTTP client")?;
    Ok(SummaryClient {
        client,
        retries,
        retry_delay_ms,
    })
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{SummaryBackend, load_openai_api_key_with_lookup, strip_html};
    use crate::config::BlogConfig;

    #[test]
    fn backend_parse_routes_openai_and_ollama() {
        assert_eq!(SummaryBackend::parse("openai"), SummaryBackend::OpenAi);
        assert_eq!(SummaryBackend::parse("OpenAI"), SummaryBackend::OpenAi);
        assert_eq!(
            SummaryBackend::parse("llama3.1"),
            SummaryBackend::Ollama {
                model: "llama3.1".to_string()
            }
        );
    }

    #[test]
    fn strip_html_drops_chrome_and_tags() {
        let html = "<html><head><script>var x = 1;</script></head><body>\
                    <nav><a href=\"/\">Home</a></nav>\
                    <h1>Title</h1>\n\n\n<p>Body &amp; more.</p>\
                    <footer>fine print</footer></body></html>";
        let text = strip_html(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Body & more."));
        assert!(!text.contains("var x"));
        assert!(!text.contains("Home"));
        assert!(!text.contains("fine print"));
        assert!(!text.contains('<'));
    }

    #[test]
    fn strip_html_survives_unclosed_chrome_element() {
        let text = strip_html("<p>kept</p><nav>dangling to the end");
        assert_eq!(text, "kept");
    }

    #[test]
    fn api_key_env_wins_over_file() {
        let config = BlogConfig::default();
        let key = load_openai_api_key_with_lookup(&config, |name| {
            (name == "OPENAI_API_KEY").then(|| "sk-from-env".to_string())
        })
        .expect("key");
        assert_eq!(key, "sk-from-env");
    }

    #[test]
    fn api_key_falls_back_to_key_file() {
        let temp = tempdir().expect("tempdir");
        let key_file = temp.path().join("openai-key");
        fs::write(&key_file, "sk-from-file\n").expect("write key");

        let mut config = BlogConfig::default();
        config.summarize.openai_key_file = Some(key_file.to_string_lossy().to_string());

        let key = load_openai_api_key_with_lookup(&config, |_| None).expect("key");
        assert_eq!(key, "sk-from-file");
    }

    #[test]
    fn empty_key_file_is_an_error() {
        let temp = tempdir().expect("tempdir");
        let key_file = temp.path().join("openai-key");
        fs::write(&key_file, "  \n").expect("write key");

        let mut config = BlogConfig::default();
        config.summarize.openai_key_file = Some(key_file.to_string_lossy().to_string());

        let err = load_openai_api_key_with_lookup(&config, |_| None).expect_err("must fail");
        assert!(err.to_string().contains("is empty"));
    }

    #[test]
    fn missing_key_file_error_points_at_the_fix() {
        let mut config = BlogConfig::default();
        config.summarize.openai_key_file = Some("/nonexistent/openai-key".to_string());

        let err = load_openai_api_key_with_lookup(&config, |_| None).expect_err("must fail");
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
