//! Key vocabulary and role bindings
//!
//! Maps the symbolic key names stored in the settings file to the pair of
//! platform codes the daemon needs: one for input synthesis and one for
//! matching events delivered by the hook. Codes are macOS virtual key codes
//! (`kVK_*`); the event tap reports the same space that synthesis consumes,
//! so both columns are equal on this platform.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Code carried by an unbound role. Hook event codes are never negative.
pub const UNBOUND: i32 = -1;

/// Name the editing surface uses for "no key"
pub const NONE_NAME: &str = "None";

/// Name of the backtick key, which only the toggle role may use
pub const GRAVE_NAME: &str = "`(GRAVE)";

/// Modifier keys, reported by the tap as flag changes rather than key events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub enum Modifier {
    Shift,
    Control,
    Alt,
}

/// One entry of the key table
#[derive(Debug, PartialEq, Eq)]
pub struct KeyDef {
    /// Symbolic name as persisted in settings
    pub name: &'static str,
    /// Code passed to the synthesis backend
    pub synthesis: u16,
    /// Code matched against hook events
    pub hook: u16,
    /// Only valid when bound to the toggle role
    pub toggle_only: bool,
}

impl KeyDef {
    const fn key(name: &'static str, code: u16) -> Self {
        Self {
            name,
            synthesis: code,
            hook: code,
            toggle_only: false,
        }
    }

    /// Whether this key may be bound to `role`
    pub fn allowed_for(&self, role: KeyRole) -> bool {
        !self.toggle_only || role == KeyRole::Toggle
    }
}

static KEYS: [KeyDef; 42] = [
    KeyDef::key("A", 0x00),
    KeyDef::key("B", 0x0B),
    KeyDef::key("C", 0x08),
    KeyDef::key("D", 0x02),
    KeyDef::key("E", 0x0E),
    KeyDef::key("F", 0x03),
    KeyDef::key("G", 0x05),
    KeyDef::key("H", 0x04),
    KeyDef::key("I", 0x22),
    KeyDef::key("J", 0x26),
    KeyDef::key("K", 0x28),
    KeyDef::key("L", 0x25),
    KeyDef::key("M", 0x2E),
    KeyDef::key("N", 0x2D),
    KeyDef::key("O", 0x1F),
    KeyDef::key("P", 0x23),
    KeyDef::key("Q", 0x0C),
    KeyDef::key("R", 0x0F),
    KeyDef::key("S", 0x01),
    KeyDef::key("T", 0x11),
    KeyDef::key("U", 0x20),
    KeyDef::key("V", 0x09),
    KeyDef::key("W", 0x0D),
    KeyDef::key("X", 0x07),
    KeyDef::key("Y", 0x10),
    KeyDef::key("Z", 0x06),
    KeyDef::key("LShift", 0x38),
    KeyDef::key("LCtrl", 0x3B),
    KeyDef::key("LAlt", 0x3A),
    KeyDef::key("Space", 0x31),
    KeyDef::key("TAB", 0x30),
    KeyDef::key("1", 0x12),
    KeyDef::key("2", 0x13),
    KeyDef::key("3", 0x14),
    KeyDef::key("4", 0x15),
    KeyDef::key("5", 0x17),
    KeyDef::key("6", 0x16),
    KeyDef::key("7", 0x1A),
    KeyDef::key("8", 0x1C),
    KeyDef::key("9", 0x19),
    KeyDef::key("0", 0x1D),
    KeyDef {
        name: GRAVE_NAME,
        synthesis: 0x32,
        hook: 0x32,
        toggle_only: true,
    },
];

/// Resolved code pair for a symbolic name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyCodes {
    pub synthesis: i32,
    pub hook: i32,
}

impl KeyCodes {
    pub const UNBOUND: KeyCodes = KeyCodes {
        synthesis: UNBOUND,
        hook: UNBOUND,
    };
}

/// Every key the registry knows, in table order
pub fn vocabulary() -> impl Iterator<Item = &'static KeyDef> {
    KEYS.iter()
}

/// Names selectable for `role`, `"None"` first
pub fn names_for(role: KeyRole) -> Vec<&'static str> {
    std::iter::once(NONE_NAME)
        .chain(
            vocabulary()
                .filter(|def| def.allowed_for(role))
                .map(|def| def.name),
        )
        .collect()
}

/// Find the table entry for `name`
pub fn lookup(name: &str) -> Option<&'static KeyDef> {
    vocabulary().find(|def| def.name == name)
}

fn slot_of(name: &str) -> Option<u8> {
    KEYS.iter()
        .position(|def| def.name == name)
        .map(|index| index as u8)
}

/// Resolve a symbolic name to its code pair.
///
/// Absent names, `"None"` and anything outside the vocabulary all resolve to
/// the unbound pair `(-1, -1)`.
pub fn resolve(name: Option<&str>) -> KeyCodes {
    name.and_then(lookup)
        .map(|def| KeyCodes {
            synthesis: i32::from(def.synthesis),
            hook: i32::from(def.hook),
        })
        .unwrap_or(KeyCodes::UNBOUND)
}

/// Like [`resolve`], but keys not allowed for `role` resolve to unbound
pub fn resolve_for_role(role: KeyRole, name: Option<&str>) -> KeyCodes {
    KeyBinding::new(role, name).codes()
}

/// Which modifier a hook code reports, if any
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub fn modifier_for(hook_code: i32) -> Option<Modifier> {
    match hook_code {
        0x38 => Some(Modifier::Shift),
        0x3B => Some(Modifier::Control),
        0x3A => Some(Modifier::Alt),
        _ => None,
    }
}

// Left-hand device bits of CGEventFlags (IOKit NX_DEVICE*KEYMASK)
const NX_DEVICELSHIFTKEYMASK: u64 = 0x0000_0002;
const NX_DEVICELCTLKEYMASK: u64 = 0x0000_0001;
const NX_DEVICELALTKEYMASK: u64 = 0x0000_0020;

impl Modifier {
    /// Flag bit set only while the left-hand key of the pair is down.
    ///
    /// The device-independent Shift/Control/Alternate bits stay set while
    /// the right-hand key is held, so they cannot tell a left release apart.
    pub fn left_device_mask(self) -> u64 {
        match self {
            Modifier::Shift => NX_DEVICELSHIFTKEYMASK,
            Modifier::Control => NX_DEVICELCTLKEYMASK,
            Modifier::Alt => NX_DEVICELALTKEYMASK,
        }
    }
}

/// Press or release for a modifier flag change; `None` for other codes
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
pub fn modifier_pressed(hook_code: i32, flags: u64) -> Option<bool> {
    modifier_for(hook_code).map(|modifier| flags & modifier.left_device_mask() != 0)
}

/// The four roles a key can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    /// Selects the sword again after the trigger is released
    Primary,
    /// Selects the rod before the throw
    Secondary,
    /// Fires the macro while held
    Trigger,
    /// Enables and disables the macro
    Toggle,
}

impl KeyRole {
    pub const ALL: [KeyRole; 4] = [
        KeyRole::Primary,
        KeyRole::Secondary,
        KeyRole::Trigger,
        KeyRole::Toggle,
    ];
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRole::Primary => write!(f, "primary"),
            KeyRole::Secondary => write!(f, "secondary"),
            KeyRole::Trigger => write!(f, "trigger"),
            KeyRole::Toggle => write!(f, "toggle"),
        }
    }
}

/// A role bound to a registry entry, or unbound.
///
/// Stores the table slot rather than the codes so both codes always come
/// from the same entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBinding {
    role: KeyRole,
    slot: Option<u8>,
}

impl KeyBinding {
    pub(crate) const NO_SLOT: u8 = u8::MAX;

    /// Bind `role` to `name`; unknown names and keys the role may not use
    /// yield an unbound binding
    pub fn new(role: KeyRole, name: Option<&str>) -> Self {
        let slot = name
            .and_then(slot_of)
            .filter(|&slot| KEYS[usize::from(slot)].allowed_for(role));
        Self { role, slot }
    }

    pub fn unbound(role: KeyRole) -> Self {
        Self { role, slot: None }
    }

    pub(crate) fn from_slot(role: KeyRole, slot: u8) -> Self {
        let slot = (usize::from(slot) < KEYS.len()).then_some(slot);
        Self { role, slot }
    }

    pub(crate) fn slot(&self) -> u8 {
        self.slot.unwrap_or(Self::NO_SLOT)
    }

    pub fn role(&self) -> KeyRole {
        self.role
    }

    pub fn def(&self) -> Option<&'static KeyDef> {
        self.slot.map(|slot| &KEYS[usize::from(slot)])
    }

    pub fn is_bound(&self) -> bool {
        self.slot.is_some()
    }

    /// Symbolic name, or `"None"` when unbound
    pub fn symbolic_name(&self) -> &'static str {
        self.def().map_or(NONE_NAME, |def| def.name)
    }

    pub fn codes(&self) -> KeyCodes {
        resolve(self.def().map(|def| def.name))
    }

    pub fn synthesis_code(&self) -> i32 {
        self.codes().synthesis
    }

    pub fn hook_code(&self) -> i32 {
        self.codes().hook
    }

    /// Whether a hook event code belongs to this binding
    pub fn matches(&self, hook_code: i32) -> bool {
        self.is_bound() && self.hook_code() == hook_code
    }
}

impl fmt::Display for KeyBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.role(), self.symbolic_name())
    }
}
