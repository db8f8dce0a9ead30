//! Host environment the SDK runs inside: landing URL, device facts and the
//! foreground (visibility) signal.

use std::sync::{Arc, Mutex, MutexGuard};

pub type ForegroundListener = Arc<dyn Fn() + Send + Sync>;

pub trait Environment: Send + Sync {
    fn current_url(&self) -> Option<String>;

    fn referrer(&self) -> Option<String>;

    fn user_agent(&self) -> Option<String>;

    fn language(&self) -> Option<String>;

    /// `(width, height)` in pixels.
    fn screen_size(&self) -> Option<(u32, u32)>;

    /// Registers a listener called whenever the host returns to the foreground.
    fn on_foreground(&self, listener: ForegroundListener);

    fn query_param(&self, name: &str) -> Option<String> {
        let url = url::Url::parse(&self.current_url()?).ok()?;
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
            .filter(|value| !value.is_empty())
    }

    /// Reads a `name:value` token from the URL fragment, e.g. `#r:abc123`.
    fn hash_token(&self, name: &str) -> Option<String> {
        let current = self.current_url()?;
        let (_, fragment) = current.split_once('#')?;
        let prefix = format!("{name}:");
        fragment
            .split(['&', '#', '?'])
            .find_map(|token| token.strip_prefix(prefix.as_str()))
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

impl<T> Environment for Arc<T>
where
    T: Environment + ?Sized,
{
    fn current_url(&self) -> Option<String> {
        (**self).current_url()
    }

    fn referrer(&self) -> Option<String> {
        (**self).referrer()
    }

    fn user_agent(&self) -> Option<String> {
        (**self).user_agent()
    }

    fn language(&self) -> Option<String> {
        (**self).language()
    }

    fn screen_size(&self) -> Option<(u32, u32)> {
        (**self).screen_size()
    }

    fn on_foreground(&self, listener: ForegroundListener) {
        (**self).on_foreground(listener)
    }

    fn query_param(&self, name: &str) -> Option<String> {
        (**self).query_param(name)
    }

    fn hash_token(&self, name: &str) -> Option<String> {
        (**self).hash_token(name)
    }
}

/// Fixed environment for command-line hosts and tests.
#[derive(Clone, Default)]
pub struct StaticEnvironment {
    url: Option<String>,
    referrer: Option<String>,
    user_agent: Option<String>,
    language: Option<String>,
    screen: Option<(u32, u32)>,
    listeners: Arc<Mutex<Vec<ForegroundListener>>>,
}

impl std::fmt::Debug for StaticEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticEnvironment")
            .field("url", &self.url)
            .field("referrer", &self.referrer)
            .field("user_agent", &self.user_agent)
            .field("language", &self.language)
            .field("screen", &self.screen)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl StaticEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_screen(mut self, width: u32, height: u32) -> Self {
        self.screen = Some((width, height));
        self
    }

    pub fn listener_count(&self) -> usize {
        self.listeners().len()
    }

    /// Simulates the host regaining the foreground.
    pub fn fire_foreground(&self) {
        let listeners = self.listeners().clone();
        for listener in listeners {
            listener();
        }
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<ForegroundListener>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Environment for StaticEnvironment {
    fn current_url(&self) -> Option<String> {
        self.url.clone()
    }

    fn referrer(&self) -> Option<String> {
        self.referrer.clone()
    }

    fn user_agent(&self) -> Option<String> {
        self.user_agent.clone()
    }

    fn language(&self) -> Option<String> {
        self.language.clone()
    }

    fn screen_size(&self) -> Option<(u32, u32)> {
        self.screen
    }

    fn on_foreground(&self, listener: ForegroundListener) {
        self.listeners().push(listener);
    }
}
