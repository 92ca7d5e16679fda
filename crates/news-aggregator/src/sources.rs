use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use signal_core::{Article, NewsSource, SignalError, SocialPost, SocialSource, Symbol};
use std::time::Duration;

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

fn http_client() -> Client {
    Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent("market-sentinel/0.1")
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// RSS/Atom feed adapter. One instance per configured feed URL.
pub struct RssFeedSource {
    name: String,
    url: String,
    client: Client,
}

impl RssFeedSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl NewsSource for RssFeedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<Article>, SignalError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SignalError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SignalError::Network(format!(
                "{} returned HTTP {}",
                self.name,
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SignalError::Network(e.to_string()))?;
        let channel = rss::Channel::read_from(&bytes[..])
            .map_err(|e| SignalError::Network(format!("{} feed parse: {}", self.name, e)))?;

        let fetched_at = Utc::now();
        let articles = channel
            .items()
            .iter()
            .filter_map(|item| {
                let title = item.title()?.trim().to_string();
                if title.is_empty() {
                    return None;
                }
                let body = item
                    .description()
                    .map(|d| strip_markup(d))
                    .unwrap_or_default();
                let published_at = item
                    .pub_date()
                    .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or(fetched_at);
                if published_at < since {
                    return None;
                }

                let url = item.link().map(|l| l.to_string());
                Some(Article {
                    id: Article::compute_id(url.as_deref(), &self.name, &title, published_at),
                    symbol: None,
                    title,
                    body,
                    source: self.name.clone(),
                    url,
                    published_at,
                    fetched_at,
                    sentiment: None,
                    catalyst_tags: Vec::new(),
                })
            })
            .collect();

        Ok(articles)
    }
}

/// JSON article-list adapter for HTML/API feeds that expose
/// `{"articles": [{title, description, url, published_utc, ...}]}`.
pub struct JsonNewsSource {
    name: String,
    url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct JsonNewsResponse {
    #[serde(default, alias = "results")]
    articles: Vec<JsonNewsItem>,
}

#[derive(Debug, Deserialize)]
struct JsonNewsItem {
    title: Option<String>,
    #[serde(alias = "body")]
    description: Option<String>,
    #[serde(alias = "article_url")]
    url: Option<String>,
    #[serde(alias = "published_at")]
    published_utc: Option<String>,
    #[serde(default)]
    tickers: Vec<String>,
}

impl JsonNewsSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl NewsSource for JsonNewsSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<Article>, SignalError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SignalError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SignalError::Network(format!(
                "{} returned HTTP {}",
                self.name,
                response.status()
            )));
        }

        let payload: JsonNewsResponse = response
            .json()
            .await
            .map_err(|e| SignalError::Network(e.to_string()))?;

        let fetched_at = Utc::now();
        let articles = payload
            .articles
            .into_iter()
            .filter_map(|item| {
                let title = item.title?.trim().to_string();
                if title.is_empty() {
                    return None;
                }
                let published_at = item
                    .published_utc
                    .as_deref()
                    .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or(fetched_at);
                if published_at < since {
                    return None;
                }

                // Provider-tagged ticker beats text extraction downstream
                let symbol = item
                    .tickers
                    .first()
                    .and_then(|t| Symbol::new(t).ok());

                Some(Article {
                    id: Article::compute_id(item.url.as_deref(), &self.name, &title, published_at),
                    symbol,
                    title,
                    body: item.description.unwrap_or_default(),
                    source: self.name.clone(),
                    url: item.url,
                    published_at,
                    fetched_at,
                    sentiment: None,
                    catalyst_tags: Vec::new(),
                })
            })
            .collect();

        Ok(articles)
    }
}

/// JSON social-post adapter (`{"posts": [{id, symbol, text, engagement, created_at}]}`).
pub struct JsonSocialSource {
    name: String,
    url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct JsonSocialResponse {
    #[serde(default, alias = "results")]
    posts: Vec<JsonSocialItem>,
}

#[derive(Debug, Deserialize)]
struct JsonSocialItem {
    id: Option<String>,
    symbol: Option<String>,
    text: Option<String>,
    #[serde(default, alias = "score", alias = "likes")]
    engagement: f64,
    #[serde(alias = "posted_at")]
    created_at: Option<String>,
}

impl JsonSocialSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client: http_client(),
        }
    }
}

#[async_trait]
impl SocialSource for JsonSocialSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<SocialPost>, SignalError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SignalError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SignalError::Network(format!(
                "{} returned HTTP {}",
                self.name,
                response.status()
            )));
        }

        let payload: JsonSocialResponse = response
            .json()
            .await
            .map_err(|e| SignalError::Network(e.to_string()))?;

        let now = Utc::now();
        let posts = payload
            .posts
            .into_iter()
            .filter_map(|item| {
                let text = item.text?.trim().to_string();
                if text.is_empty() {
                    return None;
                }
                let posted_at = item
                    .created_at
                    .as_deref()
                    .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                    .map(|d| d.with_timezone(&Utc))
                    .unwrap_or(now);
                if posted_at < since {
                    return None;
                }

                Some(SocialPost {
                    id: item
                        .id
                        .unwrap_or_else(|| Article::compute_id(None, &self.name, &text, posted_at)),
                    symbol: item.symbol.as_deref().and_then(|s| Symbol::new(s).ok()),
                    text,
                    source: self.name.clone(),
                    engagement: item.engagement.max(0.0),
                    posted_at,
                })
            })
            .collect();

        Ok(posts)
    }
}

/// Drop HTML tags and entities from feed descriptions.
fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for c in input.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_markup() {
        let raw = "<p>Shares of <b>ACME</b> rose &amp; closed higher</p>";
        assert_eq!(strip_markup(raw), "Shares of ACME rose & closed higher");
    }

    #[test]
    fn test_json_news_parses_aliases() {
        let raw = r#"{"results":[{"title":"T","body":"B","article_url":"http://x","published_at":"2025-06-02T12:00:00Z","tickers":["TSLA"]}]}"#;
        let payload: JsonNewsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.articles.len(), 1);
        assert_eq!(payload.articles[0].tickers[0], "TSLA");
    }

    #[test]
    fn test_json_social_defaults() {
        let raw = r#"{"posts":[{"text":"to the moon","likes":12.0}]}"#;
        let payload: JsonSocialResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.posts.len(), 1);
        assert_eq!(payload.posts[0].engagement, 12.0);
    }
}
