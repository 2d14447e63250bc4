use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::error::{BrowserError, BrowserResult};
use super::surface::{CdpSurface, DiscoverySurface};
use crate::config::ScoutConfig;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One live Chromium instance, handed out by a [`SessionFactory`].
#[async_trait(?Send)]
pub trait DiscoverySession {
    /// Opens a fresh page surface inside this session.
    async fn surface(&mut self) -> BrowserResult<Box<dyn DiscoverySurface>>;

    /// Releases the session. Consumes it, so the browser is closed
    /// exactly once on every path.
    async fn shutdown(self: Box<Self>) -> BrowserResult<()>;
}

#[async_trait(?Send)]
pub trait SessionFactory {
    async fn create(&self) -> BrowserResult<Box<dyn DiscoverySession>>;
}

/// Assembles Chromium launch configuration from `[chromium]`,
/// `[flags]` and `[user_agents]` and starts instances.
#[derive(Debug, Clone)]
pub struct SessionLauncher {
    config: Arc<ScoutConfig>,
}

impl SessionLauncher {
    pub fn new(config: Arc<ScoutConfig>) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoutConfig {
        &self.config
    }

    fn select_user_agent(&self) -> String {
        self.config
            .user_agents
            .pool
            .choose(&mut rand::thread_rng())
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string())
    }

    fn build_chromium_config(&self, user_agent: &str) -> BrowserResult<ChromiumConfig> {
        let chromium = &self.config.chromium;
        let flags = &self.config.flags;

        let mut builder = ChromiumConfig::builder();
        if let Some(executable) = &chromium.executable_path {
            builder = builder.chrome_executable(executable);
        }
        if !chromium.headless {
            builder = builder.with_head();
        }
        if !chromium.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(timeout) = chromium.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(timeout));
        }

        let mut args = vec![format!("--user-agent={user_agent}")];
        if chromium.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if flags.mute_audio {
            args.push("--mute-audio".into());
        }
        if let Some(policy) = &flags.autoplay_policy {
            args.push(format!("--autoplay-policy={policy}"));
        }
        if let Some(lang) = &flags.lang {
            args.push(format!("--lang={lang}"));
        }
        for feature in &flags.disable_blink_features {
            args.push(format!("--disable-blink-features={feature}"));
        }
        if flags.no_first_run {
            args.push("--no-first-run".into());
        }
        if flags.disable_automation_controlled {
            args.push("--disable-features=AutomationControlled".into());
        }
        if let Some(accept) = &flags.accept_language {
            args.push(format!("--accept-lang={accept}"));
        }
        args.push("--disable-background-timer-throttling".into());
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }

    pub async fn launch(&self) -> BrowserResult<CdpSession> {
        let user_agent = self.select_user_agent();
        let chromium_config = self.build_chromium_config(&user_agent)?;
        info!(
            ua = %user_agent,
            headless = self.config.chromium.headless,
            "launching chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "chromium handler reported error");
                }
            }
        });

        Ok(CdpSession {
            browser,
            handler_task: Some(handler_task),
            config: Arc::clone(&self.config),
            user_agent,
        })
    }
}

#[derive(Debug)]
pub struct CdpSession {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    config: Arc<ScoutConfig>,
    user_agent: String,
}

impl CdpSession {
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn configure_page(&self, page: &Page) -> BrowserResult<()> {
        page.enable_stealth_mode_with_agent(&self.user_agent)
            .await?;

        let mut params_builder =
            SetUserAgentOverrideParams::builder().user_agent(self.user_agent.clone());
        if let Some(accept) = &self.config.flags.accept_language {
            params_builder = params_builder.accept_language(accept.clone());
        }
        let params = params_builder
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;
        Ok(())
    }
}

#[async_trait(?Send)]
impl DiscoverySession for CdpSession {
    async fn surface(&mut self) -> BrowserResult<Box<dyn DiscoverySurface>> {
        let page = self
            .browser
            .new_page(CreateTargetParams::new("about:blank"))
            .await?;
        self.configure_page(&page).await?;
        let navigation_timeout =
            Duration::from_millis(self.config.discovery.navigation_timeout_ms);
        let surface = CdpSurface::attach(page, navigation_timeout).await?;
        Ok(Box::new(surface))
    }

    async fn shutdown(mut self: Box<Self>) -> BrowserResult<()> {
        info!("shutting down chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "browser handler join error");
            }
        }
        Ok(())
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("session dropped without explicit shutdown");
            }
        }
    }
}

/// Production [`SessionFactory`] backed by [`SessionLauncher`].
#[derive(Debug, Clone)]
pub struct CdpSessionFactory {
    launcher: SessionLauncher,
}

impl CdpSessionFactory {
    pub fn new(launcher: SessionLauncher) -> Self {
        Self { launcher }
    }
}

#[async_trait(?Send)]
impl SessionFactory for CdpSessionFactory {
    async fn create(&self) -> BrowserResult<Box<dyn DiscoverySession>> {
        let session = self.launcher.launch().await?;
        Ok(Box::new(session))
    }
}
