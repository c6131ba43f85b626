//! Tunable-parameter metadata for configuration front-ends.
//!
//! Pure metadata with no encoding side effects: the legal range of every
//! setting plus the visibility rules a configuration UI applies when the
//! rate-control mode changes. The rules here must stay consistent with the
//! policy translator (the lossless-compatible presets are the ones the
//! translator maps to a lossless preset variant a user would expect).

use crate::settings::{Preset, Profile, RateControl};

/// The user-selectable rate-control modes, in display order.
pub const RATE_CONTROL_OPTIONS: [RateControl; 4] = [
    RateControl::Cbr,
    RateControl::Vbr,
    RateControl::Cqp,
    RateControl::Lossless,
];

/// The user-selectable presets, in display order.
pub const PRESET_OPTIONS: [Preset; 7] = [
    Preset::Default,
    Preset::Hq,
    Preset::Hp,
    Preset::Bd,
    Preset::Ll,
    Preset::Llhq,
    Preset::Llhp,
];

/// The user-selectable profiles, in display order.
pub const PROFILE_OPTIONS: [Profile; 4] = [
    Profile::High,
    Profile::Main,
    Profile::Baseline,
    Profile::High444p,
];

/// The user-selectable level names, in display order.
pub const LEVEL_OPTIONS: [&str; 23] = [
    "auto", "1", "1.0", "1b", "1.0b", "1.1", "1.2", "1.3", "2", "2.0", "2.1", "2.2", "3", "3.0",
    "3.1", "3.2", "4", "4.0", "4.1", "4.2", "5", "5.0", "5.1",
];

/// Returns true if `level` is one of the legal level names.
#[must_use]
pub fn is_valid_level(level: &str) -> bool {
    LEVEL_OPTIONS.contains(&level)
}

/// Inclusive integer range with a UI step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    pub min: i64,
    pub max: i64,
    pub step: i64,
}

impl IntRange {
    /// Returns true if `value` lies in the range.
    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// One selectable option of a list property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOption {
    pub name: &'static str,
    /// Disabled options stay listed so a prior selection is preserved.
    pub enabled: bool,
}

/// The value shape of a property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    Int(IntRange),
    Bool,
    List(Vec<ListOption>),
}

/// One tunable parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub visible: bool,
}

/// The full parameter table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Properties {
    items: Vec<Property>,
}

impl Properties {
    /// Look up a property by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Property> {
        self.items.iter().find(|p| p.name == name)
    }

    fn get_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.items.iter_mut().find(|p| p.name == name)
    }

    /// Iterate the properties in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.items.iter()
    }
}

fn list(names: impl IntoIterator<Item = &'static str>) -> PropertyKind {
    PropertyKind::List(
        names
            .into_iter()
            .map(|name| ListOption {
                name,
                enabled: true,
            })
            .collect(),
    )
}

/// Build the parameter table with every field visible and enabled.
#[must_use]
pub fn encoder_properties() -> Properties {
    let items = vec![
        Property {
            name: "rate_control",
            kind: list(RATE_CONTROL_OPTIONS.iter().map(|rc| rc.as_str())),
            visible: true,
        },
        Property {
            name: "bitrate",
            kind: PropertyKind::Int(IntRange {
                min: 50,
                max: 300_000,
                step: 50,
            }),
            visible: true,
        },
        Property {
            name: "cqp",
            kind: PropertyKind::Int(IntRange {
                min: 0,
                max: 50,
                step: 1,
            }),
            visible: true,
        },
        Property {
            name: "keyint_sec",
            kind: PropertyKind::Int(IntRange {
                min: 0,
                max: 10,
                step: 1,
            }),
            visible: true,
        },
        Property {
            name: "preset",
            kind: list(PRESET_OPTIONS.iter().map(|p| p.as_str())),
            visible: true,
        },
        Property {
            name: "profile",
            kind: list(PROFILE_OPTIONS.iter().map(|p| p.as_str())),
            visible: true,
        },
        Property {
            name: "level",
            kind: list(LEVEL_OPTIONS),
            visible: true,
        },
        Property {
            name: "2pass",
            kind: PropertyKind::Bool,
            visible: true,
        },
        Property {
            name: "gpu",
            kind: PropertyKind::Int(IntRange {
                min: 0,
                max: 8,
                step: 1,
            }),
            visible: true,
        },
        Property {
            name: "bf",
            kind: PropertyKind::Int(IntRange {
                min: 0,
                max: 4,
                step: 1,
            }),
            visible: true,
        },
    ];

    Properties { items }
}

/// Apply the rate-control visibility rules.
///
/// Bitrate is hidden for the quality-driven modes, the quantizer is shown
/// only for CQP, and lossless narrows the preset list to its two compatible
/// entries ("default" and "hp") by disabling the rest in place.
pub fn refresh_rate_control(props: &mut Properties, rate_control: RateControl) {
    let cqp = rate_control == RateControl::Cqp;
    let lossless = rate_control == RateControl::Lossless;

    if let Some(p) = props.get_mut("bitrate") {
        p.visible = !cqp && !lossless;
    }
    if let Some(p) = props.get_mut("cqp") {
        p.visible = cqp;
    }

    if let Some(p) = props.get_mut("preset") {
        if let PropertyKind::List(options) = &mut p.kind {
            for (index, option) in options.iter_mut().enumerate() {
                let compatible = index == 0 || index == 2;
                option.enabled = !(lossless && !compatible);
            }
        }
    }
}
