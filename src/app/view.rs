//! Dashboard rendering

use crate::app::ui_components::{
    DANGER, SUCCESS, TEXT_DIM, alert_container, card_container, danger_button, main_container,
    modal_backdrop, primary_button, secondary_button,
};
use crate::app::{FONT_REGULAR, IptablesStatus, Message, Modal, State};
use dropship::FirewallRule;
use iced::widget::{
    Space, button, center, column, container, opaque, row, rule, scrollable, stack, text, toggler,
};
use iced::{Alignment, Element, Length};

/// Main view entry point
pub fn view(state: &State) -> Element<'_, Message> {
    let content = column![
        text("Dropship").size(32).font(FONT_REGULAR),
        rule::horizontal(1),
        view_status(state),
        rule::horizontal(1),
        view_rules(state),
        rule::horizontal(1),
        view_actions(state),
    ]
    .spacing(16)
    .padding(24);

    let base = container(content)
        .width(Length::Fill)
        .height(Length::Fill)
        .style(main_container);

    // Always stack so the widget tree keeps its shape (preserves scroll state)
    match &state.modal {
        Some(modal) => stack![
            base,
            opaque(center(view_modal(state, modal)).style(modal_backdrop))
        ]
        .into(),
        None => stack![base, Space::new()].into(),
    }
}

fn view_status(state: &State) -> Element<'_, Message> {
    let privileges: Element<'_, Message> = if state.is_root {
        text("Running as root").color(SUCCESS).into()
    } else {
        row![
            text("Not running as root (firewall won't work)").color(DANGER),
            button(text("Restart with elevated privileges").size(14))
                .on_press(Message::RestartClicked)
                .padding([6, 12])
                .style(primary_button),
        ]
        .spacing(12)
        .align_y(Alignment::Center)
        .into()
    };

    let iptables = match state.iptables {
        IptablesStatus::Checking => text("iptables: Checking...").color(TEXT_DIM),
        IptablesStatus::Available => text("iptables: Available").color(SUCCESS),
        IptablesStatus::Unavailable => text("iptables: Not available").color(DANGER),
    };

    column![privileges, iptables].spacing(8).into()
}

fn view_rules(state: &State) -> Element<'_, Message> {
    let group = &state.config.default_group;

    let mut header = row![
        text(format!("Rules in {group}")).size(20),
        Space::new().width(Length::Fill),
    ]
    .spacing(12)
    .align_y(Alignment::Center);

    if let Some(enabled) = state.group_enabled
        && !state.rules.is_empty()
    {
        header = header.push(
            toggler(enabled)
                .label("Group active")
                .on_toggle_maybe((!state.busy).then_some(Message::ToggleGroup)),
        );
    }

    header = header.push(
        button(text("Refresh").size(14))
            .on_press(Message::RefreshRules)
            .padding([6, 12])
            .style(secondary_button),
    );

    let body: Element<'_, Message> = if state.rules.is_empty() {
        text("No rules in this group.").color(TEXT_DIM).into()
    } else {
        scrollable(
            column(state.rules.iter().map(|rule| view_rule(rule, state.busy)))
                .spacing(8)
                .padding([0, 12]),
        )
        .height(Length::Fill)
        .into()
    };

    column![header, body]
        .spacing(12)
        .height(Length::Fill)
        .into()
}

fn view_rule(rule: &FirewallRule, busy: bool) -> Element<'_, Message> {
    let addresses = rule
        .blocked_addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    let mut details = column![
        row![
            text(&rule.name).size(16),
            if rule.enabled {
                text("blocking").size(12).color(SUCCESS)
            } else {
                text("disabled").size(12).color(TEXT_DIM)
            },
        ]
        .spacing(8)
        .align_y(Alignment::Center),
    ]
    .spacing(4)
    .width(Length::Fill);

    if !rule.description.is_empty() {
        details = details.push(text(&rule.description).size(13).color(TEXT_DIM));
    }
    details = details.push(text(addresses).size(12));

    let toggle = button(text(if rule.enabled { "Disable" } else { "Enable" }).size(14))
        .on_press_maybe((!busy).then(|| Message::ToggleRule(rule.name.clone(), !rule.enabled)))
        .padding([6, 12])
        .style(secondary_button);

    let delete = button(text("Delete").size(14))
        .on_press_maybe((!busy).then(|| Message::DeleteRuleClicked(rule.name.clone())))
        .padding([6, 12])
        .style(danger_button);

    container(
        row![details, toggle, delete]
            .spacing(8)
            .align_y(Alignment::Center),
    )
    .padding(12)
    .style(card_container)
    .into()
}

fn view_actions(state: &State) -> Element<'_, Message> {
    let download_label = if state.downloading {
        "Downloading..."
    } else {
        "Test HTTP Download"
    };

    row![
        button(text(download_label).size(14))
            .on_press_maybe((!state.downloading).then_some(Message::TestDownloadClicked))
            .padding([8, 16])
            .style(primary_button),
        button(text("Exit").size(14))
            .on_press(Message::Exit)
            .padding([8, 16])
            .style(secondary_button),
    ]
    .spacing(12)
    .into()
}

fn view_modal<'a>(state: &'a State, modal: &'a Modal) -> Element<'a, Message> {
    match modal {
        Modal::Restart => view_restart_modal(state.pkexec_available),
        Modal::DownloadResult(summary) => view_message_modal("HTTP Test Result", summary, false),
        Modal::ConfirmDelete(name) => view_delete_modal(name),
        Modal::Error(message) => view_message_modal("Operation failed", message, true),
    }
}

fn view_restart_modal(pkexec_available: bool) -> Element<'static, Message> {
    let mut content = column![
        text("Restart as Root?").size(20),
        text("Dropship requires root privileges to manage firewall rules."),
        text("Would you like to restart with elevated privileges?"),
    ]
    .spacing(12);

    if !pkexec_available {
        content = content.push(
            column![
                text("pkexec is not available on this system.").color(DANGER),
                text("Please run: sudo ./dropship"),
            ]
            .spacing(4),
        );
    }

    let mut buttons = row![].spacing(12);
    if pkexec_available {
        buttons = buttons.push(
            button(text("Restart as Root").size(14))
                .on_press(Message::RestartConfirmed)
                .padding([8, 20])
                .style(primary_button),
        );
    }
    buttons = buttons.push(
        button(text("Cancel").size(14))
            .on_press(Message::CloseModal)
            .padding([8, 20])
            .style(secondary_button),
    );

    container(content.push(buttons).padding(24).max_width(520))
        .style(card_container)
        .into()
}

fn view_delete_modal(name: &str) -> Element<'_, Message> {
    container(
        column![
            text("Delete rule?").size(20),
            text(format!("'{name}' and all of its addresses will be removed.")),
            row![
                button(text("Cancel").size(14))
                    .on_press(Message::CloseModal)
                    .padding([8, 20])
                    .style(secondary_button),
                button(text("Delete").size(14))
                    .on_press(Message::ConfirmDelete)
                    .padding([8, 20])
                    .style(danger_button),
            ]
            .spacing(12),
        ]
        .spacing(16)
        .padding(24)
        .max_width(520),
    )
    .style(alert_container)
    .into()
}

fn view_message_modal<'a>(title: &'a str, message: &'a str, alert: bool) -> Element<'a, Message> {
    container(
        column![
            text(title).size(20),
            scrollable(text(message).size(14)).height(Length::Shrink),
            button(text("OK").size(14))
                .on_press(Message::CloseModal)
                .padding([8, 32])
                .style(primary_button),
        ]
        .spacing(16)
        .padding(24)
        .max_width(560),
    )
    .style(if alert { alert_container } else { card_container })
    .into()
}
