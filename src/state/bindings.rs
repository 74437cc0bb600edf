//! Shared macro configuration
//!
//! The control side replaces bindings while the hook thread reads them on
//! every key event. The whole configuration is packed into one `AtomicU64`
//! (a table slot byte per role plus a flag byte), so a reader always sees a
//! complete snapshot with a single atomic load.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::hotkey::keys::{resolve_for_role, KeyCodes, NONE_NAME};
use crate::hotkey::{KeyBinding, KeyRole};
use crate::settings::Settings;

/// One consistent view of the four bindings and the return flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bindings {
    pub primary: KeyBinding,
    pub secondary: KeyBinding,
    pub trigger: KeyBinding,
    pub toggle: KeyBinding,
    pub return_to_primary_on_release: bool,
}

impl Default for Bindings {
    fn default() -> Self {
        Self {
            primary: KeyBinding::unbound(KeyRole::Primary),
            secondary: KeyBinding::unbound(KeyRole::Secondary),
            trigger: KeyBinding::unbound(KeyRole::Trigger),
            toggle: KeyBinding::unbound(KeyRole::Toggle),
            return_to_primary_on_release: false,
        }
    }
}

impl Bindings {
    /// Build bindings from persisted settings; unknown names become unbound
    pub fn from_settings(settings: &Settings) -> Self {
        let bind = |role: KeyRole| {
            let name = settings.key(role);
            if name.is_some_and(|name| name != NONE_NAME)
                && resolve_for_role(role, name) == KeyCodes::UNBOUND
            {
                warn!(%role, name = name.unwrap_or_default(), "unknown key name, leaving role unbound");
            }
            KeyBinding::new(role, name)
        };

        Self {
            primary: bind(KeyRole::Primary),
            secondary: bind(KeyRole::Secondary),
            trigger: bind(KeyRole::Trigger),
            toggle: bind(KeyRole::Toggle),
            return_to_primary_on_release: settings.return_to_primary,
        }
    }

    /// Persisted form; unbound roles become `null`
    pub fn to_settings(&self) -> Settings {
        let name = |binding: KeyBinding| binding.def().map(|def| def.name.to_owned());

        Settings {
            primary_key: name(self.primary),
            secondary_key: name(self.secondary),
            trigger_key: name(self.trigger),
            toggle_key: name(self.toggle),
            return_to_primary: self.return_to_primary_on_release,
        }
    }

    pub fn get(&self, role: KeyRole) -> KeyBinding {
        match role {
            KeyRole::Primary => self.primary,
            KeyRole::Secondary => self.secondary,
            KeyRole::Trigger => self.trigger,
            KeyRole::Toggle => self.toggle,
        }
    }

    fn pack(&self) -> u64 {
        let slots = KeyRole::ALL
            .iter()
            .enumerate()
            .fold(0u64, |packed, (index, &role)| {
                packed | u64::from(self.get(role).slot()) << (index * 8)
            });
        slots | u64::from(self.return_to_primary_on_release) << 32
    }

    fn unpack(packed: u64) -> Self {
        let slot = |index: usize| (packed >> (index * 8)) as u8;

        Self {
            primary: KeyBinding::from_slot(KeyRole::Primary, slot(0)),
            secondary: KeyBinding::from_slot(KeyRole::Secondary, slot(1)),
            trigger: KeyBinding::from_slot(KeyRole::Trigger, slot(2)),
            toggle: KeyBinding::from_slot(KeyRole::Toggle, slot(3)),
            return_to_primary_on_release: (packed >> 32) & 1 == 1,
        }
    }
}

/// Bindings shared between the control side (writer) and the hook thread
/// (reader)
#[derive(Debug)]
pub struct MacroConfig {
    packed: AtomicU64,
}

impl MacroConfig {
    pub fn new(bindings: Bindings) -> Self {
        Self {
            packed: AtomicU64::new(bindings.pack()),
        }
    }

    /// Current bindings, read with a single atomic load
    pub fn snapshot(&self) -> Bindings {
        Bindings::unpack(self.packed.load(Ordering::Acquire))
    }

    /// Replace every binding at once
    pub fn replace(&self, bindings: Bindings) {
        self.packed.store(bindings.pack(), Ordering::Release);
    }
}

impl Default for MacroConfig {
    fn default() -> Self {
        Self::new(Bindings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            primary_key: Some("S".into()),
            secondary_key: Some("R".into()),
            trigger_key: Some("LShift".into()),
            toggle_key: Some("LCtrl".into()),
            return_to_primary: true,
        }
    }

    #[test]
    fn test_default_is_unbound() {
        let config = MacroConfig::default();
        let bindings = config.snapshot();

        for role in KeyRole::ALL {
            assert!(!bindings.get(role).is_bound(), "{} should be unbound", role);
        }
        assert!(!bindings.return_to_primary_on_release);
    }

    #[test]
    fn test_snapshot_matches_replaced_bindings() {
        let config = MacroConfig::default();
        let bindings = Bindings::from_settings(&settings());

        config.replace(bindings);

        let snapshot = config.snapshot();
        assert_eq!(snapshot, bindings);
        assert_eq!(snapshot.trigger.symbolic_name(), "LShift");
        assert!(snapshot.return_to_primary_on_release);
    }

    #[test]
    fn test_partial_unbound_survives_packing() {
        let mut edited = settings();
        edited.secondary_key = None;
        edited.return_to_primary = false;
        let config = MacroConfig::new(Bindings::from_settings(&edited));

        let snapshot = config.snapshot();
        assert!(!snapshot.secondary.is_bound());
        assert_eq!(snapshot.primary.symbolic_name(), "S");
        assert!(!snapshot.return_to_primary_on_release);
    }

    #[test]
    fn test_settings_round_trip() {
        let bindings = Bindings::from_settings(&settings());
        assert_eq!(bindings.to_settings(), settings());
    }

    #[test]
    fn test_unknown_and_misplaced_names_become_unbound() {
        let edited = Settings {
            primary_key: Some("F13".into()),
            secondary_key: Some("None".into()),
            trigger_key: Some("`(GRAVE)".into()),
            toggle_key: Some("`(GRAVE)".into()),
            return_to_primary: false,
        };

        let bindings = Bindings::from_settings(&edited);
        assert!(!bindings.primary.is_bound());
        assert!(!bindings.secondary.is_bound());
        assert!(!bindings.trigger.is_bound());
        assert!(bindings.toggle.is_bound());

        let persisted = bindings.to_settings();
        assert_eq!(persisted.primary_key, None);
        assert_eq!(persisted.toggle_key.as_deref(), Some("`(GRAVE)"));
    }
}
