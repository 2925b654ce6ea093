//! Social/link-preview crawler detection by User-Agent substring.

/// Crawlers that get fully rendered, cached responses.
pub const DEFAULT_BOT_PATTERNS: &[&str] = &[
    "facebookexternalhit",
    "facebot",
    "twitterbot",
    "whatsapp",
    "linkedinbot",
    "slackbot",
    "telegrambot",
    "discordbot",
    "pinterest",
];

#[derive(Debug, Clone)]
pub struct CrawlerMatcher {
    patterns: Vec<String>,
}

impl CrawlerMatcher {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        CrawlerMatcher { patterns }
    }

    /// Case-insensitive substring match. An absent header is never a crawler.
    pub fn is_crawler(&self, user_agent: Option<&str>) -> bool {
        let Some(ua) = user_agent else { return false };
        let ua = ua.to_lowercase();
        self.patterns.iter().any(|p| ua.contains(p.as_str()))
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for CrawlerMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_BOT_PATTERNS)
    }
}
