pub mod ui_components;
pub mod view;

use dropship::audit::{self, EventType};
use dropship::config::AppConfig;
use dropship::{Firewall, FirewallRule, elevation, http};
use iced::{Element, Font, Task};
use std::ffi::OsString;
use std::sync::Arc;

pub const FONT_FILE: &str = "fonts/Roboto-Regular.ttf";

pub const FONT_REGULAR: Font = Font::with_name("Roboto");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IptablesStatus {
    #[default]
    Checking,
    Available,
    Unavailable,
}

/// Popup shown over the dashboard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Modal {
    /// Offer to restart through pkexec
    Restart,
    DownloadResult(String),
    /// Ask before deleting the named rule
    ConfirmDelete(String),
    Error(String),
}

pub struct State {
    pub firewall: Arc<Firewall>,
    pub config: AppConfig,
    pub is_root: bool,
    pub pkexec_available: bool,
    pub iptables: IptablesStatus,
    pub rules: Vec<FirewallRule>,
    /// `None` until the first listing completes
    pub group_enabled: Option<bool>,
    pub busy: bool,
    pub downloading: bool,
    pub modal: Option<Modal>,
}

#[derive(Debug, Clone)]
pub enum Message {
    FontLoaded(Result<(), iced::font::Error>),
    IptablesChecked(bool),
    RefreshRules,
    RulesLoaded(Result<(Vec<FirewallRule>, bool), String>),
    ToggleRule(String, bool),
    DeleteRuleClicked(String),
    ConfirmDelete,
    ToggleGroup(bool),
    OperationCompleted(Result<(), String>),
    TestDownloadClicked,
    DownloadCompleted(Result<String, String>),
    RestartClicked,
    RestartConfirmed,
    RestartFailed(String),
    CloseModal,
    Exit,
    EventOccurred(iced::Event),
}

/// Popup text for the download test.
pub fn download_summary(result: &Result<String, String>, preview_chars: usize) -> String {
    match result {
        Ok(body) => {
            let preview: String = body.chars().take(preview_chars).collect();
            format!("Success!\n\n{preview}...")
        }
        Err(_) => "Failed to download.".to_string(),
    }
}

fn error_text(e: &dropship::Error) -> String {
    e.translate().to_string()
}

impl State {
    pub fn view(&self) -> Element<'_, Message> {
        view::view(self)
    }

    pub fn new() -> (Self, Task<Message>) {
        let config = dropship::config::load_config();
        let firewall = Arc::new(Firewall::system());

        let state = Self {
            firewall,
            config,
            is_root: elevation::is_root(),
            pkexec_available: elevation::is_pkexec_available(),
            iptables: IptablesStatus::Checking,
            rules: Vec::new(),
            group_enabled: None,
            busy: false,
            downloading: false,
            modal: None,
        };

        let font_path = dropship::utils::resource_dir().join(FONT_FILE);
        let font_task = match std::fs::read(&font_path) {
            Ok(bytes) => iced::font::load(bytes).map(Message::FontLoaded),
            Err(e) => {
                tracing::debug!("No bundled font at {}: {e}", font_path.display());
                Task::none()
            }
        };

        let tasks = Task::batch(vec![font_task, state.check_iptables(), state.load_rules()]);
        (state, tasks)
    }

    fn check_iptables(&self) -> Task<Message> {
        let firewall = Arc::clone(&self.firewall);
        Task::perform(
            async move {
                firewall.initialize().await.is_ok() && firewall.is_firewall_enabled().await
            },
            Message::IptablesChecked,
        )
    }

    fn load_rules(&self) -> Task<Message> {
        let firewall = Arc::clone(&self.firewall);
        let group = self.config.default_group.clone();
        Task::perform(
            async move {
                let rules = firewall.get_rules_in_group(&group).await?;
                let enabled = firewall.is_group_enabled(&group).await?;
                Ok::<_, dropship::Error>((rules, enabled))
            },
            |result| Message::RulesLoaded(result.map_err(|e| error_text(&e))),
        )
    }

    /// Runs a firewall mutation, audits it, and reports back.
    fn mutate<F, Fut>(
        &mut self,
        event_type: EventType,
        details: serde_json::Value,
        op: F,
    ) -> Task<Message>
    where
        F: FnOnce(Arc<Firewall>) -> Fut + Send + 'static,
        Fut: Future<Output = dropship::Result<()>> + Send + 'static,
    {
        if self.busy {
            return Task::none();
        }
        self.busy = true;

        let firewall = Arc::clone(&self.firewall);
        let audit_enabled = self.config.audit_log_enabled;
        Task::perform(
            async move {
                let result = op(firewall).await;
                audit::log_event(audit_enabled, event_type, details, &result).await;
                result.map_err(|e| error_text(&e))
            },
            Message::OperationCompleted,
        )
    }

    pub fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::FontLoaded(result) => {
                if let Err(e) = result {
                    tracing::warn!("Failed to load {FONT_FILE}: {e:?}");
                }
            }
            Message::IptablesChecked(available) => {
                self.iptables = if available {
                    IptablesStatus::Available
                } else {
                    IptablesStatus::Unavailable
                };
            }
            Message::RefreshRules => {
                return Task::batch(vec![self.check_iptables(), self.load_rules()]);
            }
            Message::RulesLoaded(result) => match result {
                Ok((rules, enabled)) => {
                    self.rules = rules;
                    self.group_enabled = Some(enabled);
                }
                Err(e) => {
                    tracing::warn!("Failed to list rules: {e}");
                    self.rules.clear();
                    self.group_enabled = None;
                }
            },
            Message::ToggleRule(name, enabled) => {
                let group = self.config.default_group.clone();
                let details = serde_json::json!({
                    "group": group,
                    "name": name,
                    "enabled": enabled,
                });
                return self.mutate(EventType::ToggleRule, details, move |fw| async move {
                    fw.set_rule_enabled(&group, &name, enabled).await
                });
            }
            Message::DeleteRuleClicked(name) => {
                self.modal = Some(Modal::ConfirmDelete(name));
            }
            Message::ConfirmDelete => {
                if let Some(Modal::ConfirmDelete(name)) = self.modal.take() {
                    let group = self.config.default_group.clone();
                    let details = serde_json::json!({ "group": group, "name": name });
                    return self.mutate(EventType::DeleteRule, details, move |fw| async move {
                        fw.delete_rule(&group, &name).await
                    });
                }
            }
            Message::ToggleGroup(enabled) => {
                let group = self.config.default_group.clone();
                let details = serde_json::json!({ "group": group, "enabled": enabled });
                return self.mutate(EventType::ToggleGroup, details, move |fw| async move {
                    fw.set_group_enabled(&group, enabled).await
                });
            }
            Message::OperationCompleted(result) => {
                self.busy = false;
                if let Err(e) = result {
                    self.modal = Some(Modal::Error(e));
                }
                return self.load_rules();
            }
            Message::TestDownloadClicked => {
                if self.downloading {
                    return Task::none();
                }
                self.downloading = true;
                let url = self.config.test_url.clone();
                return Task::perform(
                    async move { http::download_text(&url).await.map_err(|e| e.to_string()) },
                    Message::DownloadCompleted,
                );
            }
            Message::DownloadCompleted(result) => {
                self.downloading = false;
                if let Err(e) = &result {
                    tracing::warn!("Download test failed: {e}");
                }
                self.modal = Some(Modal::DownloadResult(download_summary(
                    &result,
                    self.config.preview_chars,
                )));
            }
            Message::RestartClicked => {
                self.modal = Some(Modal::Restart);
            }
            Message::RestartConfirmed => {
                self.modal = None;
                let audit_enabled = self.config.audit_log_enabled;
                let args: Vec<OsString> = std::env::args_os().skip(1).collect();
                return Task::perform(
                    async move {
                        let audit = audit::open_default(audit_enabled);
                        elevation::restart_with_pkexec(&args, audit.as_ref()).await
                    },
                    |result| match result {
                        Ok(never) => match never {},
                        Err(e) => Message::RestartFailed(e.to_string()),
                    },
                );
            }
            Message::RestartFailed(e) => {
                tracing::error!("Restart failed: {e}");
                self.modal = Some(Modal::Error(e));
            }
            Message::CloseModal => {
                self.modal = None;
            }
            Message::Exit => {
                self.firewall.shutdown();
                return iced::exit();
            }
            Message::EventOccurred(event) => return self.handle_event(&event),
        }
        Task::none()
    }

    fn handle_event(&mut self, event: &iced::Event) -> Task<Message> {
        if let iced::Event::Keyboard(iced::keyboard::Event::KeyPressed { key, .. }) = event
            && let iced::keyboard::Key::Named(iced::keyboard::key::Named::Escape) = key.as_ref()
        {
            if self.modal.is_some() {
                return Task::done(Message::CloseModal);
            }
            return Task::done(Message::Exit);
        }
        Task::none()
    }

    pub fn subscription(&self) -> iced::Subscription<Message> {
        iced::event::listen().map(Message::EventOccurred)
    }
}
