use iced::widget::{button, container};
use iced::{Border, Color, Shadow, Theme, Vector};

/// Status text for things that work
pub const SUCCESS: Color = Color::from_rgb(0.2, 0.8, 0.2);

/// Status text for things that don't
pub const DANGER: Color = Color::from_rgb(0.8, 0.2, 0.2);

pub const TEXT_DIM: Color = Color::from_rgb(0.45, 0.45, 0.45);

pub fn main_container(theme: &Theme) -> container::Style {
    let palette = theme.extended_palette();
    container::Style {
        background: Some(palette.background.base.color.into()),
        text_color: Some(palette.background.base.text),
        ..Default::default()
    }
}

pub fn card_container(theme: &Theme) -> container::Style {
    let palette = theme.extended_palette();
    container::Style {
        background: Some(palette.background.weak.color.into()),
        border: Border {
            color: palette.background.strong.color,
            width: 1.0,
            radius: 8.0.into(),
        },
        shadow: Shadow {
            color: Color::from_rgba(0.0, 0.0, 0.0, 0.1),
            offset: Vector::new(0.0, 2.0),
            blur_radius: 3.0,
        },
        ..Default::default()
    }
}

/// Card with a colored border, for popups that report a problem
pub fn alert_container(theme: &Theme) -> container::Style {
    let mut style = card_container(theme);
    style.border = Border {
        color: DANGER,
        width: 2.0,
        radius: 8.0.into(),
    };
    style
}

/// Semi-transparent modal backdrop
pub fn modal_backdrop(theme: &Theme) -> container::Style {
    container::Style {
        background: Some(
            Color {
                a: 0.85,
                ..theme.extended_palette().background.base.color
            }
            .into(),
        ),
        ..Default::default()
    }
}

fn filled_button(fill: Color, text_color: Color, status: button::Status) -> button::Style {
    let scale = |factor: f32| Color {
        r: (fill.r * factor).min(1.0),
        g: (fill.g * factor).min(1.0),
        b: (fill.b * factor).min(1.0),
        ..fill
    };

    let base = button::Style {
        background: Some(fill.into()),
        text_color,
        border: Border {
            radius: 4.0.into(),
            ..Default::default()
        },
        shadow: Shadow {
            color: Color::from_rgba(0.0, 0.0, 0.0, 0.15),
            offset: Vector::new(0.0, 2.0),
            blur_radius: 3.0,
        },
        ..Default::default()
    };

    match status {
        button::Status::Hovered => button::Style {
            background: Some(scale(1.08).into()),
            ..base
        },
        button::Status::Pressed => button::Style {
            background: Some(scale(0.95).into()),
            shadow: Shadow {
                offset: Vector::new(0.0, 0.5),
                blur_radius: 1.5,
                ..base.shadow
            },
            ..base
        },
        button::Status::Disabled => button::Style {
            background: Some(Color { a: 0.5, ..fill }.into()),
            text_color: Color {
                a: 0.5,
                ..text_color
            },
            shadow: Shadow::default(),
            ..base
        },
        button::Status::Active => base,
    }
}

pub fn primary_button(theme: &Theme, status: button::Status) -> button::Style {
    let primary = theme.extended_palette().primary.base;
    filled_button(primary.color, primary.text, status)
}

pub fn danger_button(_theme: &Theme, status: button::Status) -> button::Style {
    filled_button(DANGER, Color::WHITE, status)
}

pub fn secondary_button(theme: &Theme, status: button::Status) -> button::Style {
    let palette = theme.extended_palette();
    let mut style = filled_button(
        palette.background.strong.color,
        palette.background.base.text,
        status,
    );
    style.border.color = palette.background.strong.color;
    style.border.width = 1.0;
    style
}
